use async_trait::async_trait;
use lash_types::{Event, Filter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::{NodeError, RelayMessage, RelayNode};

/// In-process relay node.
///
/// Evaluates filters locally, fans live events out to subscribers, and can be
/// told to go offline, reject writes or respond slowly.
pub struct InMemoryRelay {
    url: String,
    events: Arc<RwLock<HashMap<String, Event>>>,
    live: broadcast::Sender<Event>,
    offline: AtomicBool,
    reject_publish: AtomicBool,
    latency_ms: AtomicU64,
    accepted: AtomicUsize,
}

impl InMemoryRelay {
    pub fn new(url: impl Into<String>) -> Self {
        let (live, _) = broadcast::channel(1024);
        Self {
            url: url.into(),
            events: Arc::new(RwLock::new(HashMap::new())),
            live,
            offline: AtomicBool::new(false),
            reject_publish: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            accepted: AtomicUsize::new(0),
        }
    }

    /// Store an event directly, as if another client had published it
    pub fn insert(&self, event: Event) {
        self.events
            .write()
            .unwrap()
            .insert(event.id.clone(), event.clone());
        let _ = self.live.send(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    /// Number of events accepted through `publish`
    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_publish(&self, reject: bool) {
        self.reject_publish.store(reject, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn ensure_online(&self) -> Result<(), NodeError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(NodeError::Unreachable(self.url.clone()))
        } else {
            Ok(())
        }
    }

    fn matching(&self, filter: &Filter) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .read()
            .unwrap()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        // Newest first, like relays answering a limited query
        events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        events
    }
}

#[async_trait]
impl RelayNode for InMemoryRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, NodeError> {
        self.simulate_latency().await;
        self.ensure_online()?;
        Ok(self.matching(filter))
    }

    async fn subscribe(&self, filter: &Filter) -> Result<mpsc::Receiver<RelayMessage>, NodeError> {
        self.ensure_online()?;

        // Subscribe to live events before taking the snapshot so nothing
        // published in between is lost; duplicates are dropped by the pool.
        let mut live = self.live.subscribe();
        let stored = self.matching(filter);
        let filter = filter.clone();
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            for event in stored {
                if tx.send(RelayMessage::Event(event)).await.is_err() {
                    return;
                }
            }
            if tx.send(RelayMessage::EndOfStoredEvents).await.is_err() {
                return;
            }
            loop {
                match live.recv().await {
                    Ok(event) => {
                        if filter.matches(&event)
                            && tx.send(RelayMessage::Event(event)).await.is_err()
                        {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = tx.send(RelayMessage::Closed("relay shut down".into())).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn publish(&self, event: &Event) -> Result<(), NodeError> {
        self.simulate_latency().await;
        self.ensure_online()?;

        if self.reject_publish.load(Ordering::SeqCst) {
            return Err(NodeError::Rejected {
                relay: self.url.clone(),
                reason: "blocked: write access denied".to_string(),
            });
        }
        if !event.has_valid_id() {
            return Err(NodeError::Rejected {
                relay: self.url.clone(),
                reason: "invalid: event id does not match".to_string(),
            });
        }

        let is_new = self
            .events
            .write()
            .unwrap()
            .insert(event.id.clone(), event.clone())
            .is_none();
        if is_new {
            self.accepted.fetch_add(1, Ordering::SeqCst);
            let _ = self.live.send(event.clone());
        }
        Ok(())
    }
}
