use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use lash_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use lash_types::{Event, Filter};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{NodeError, RelayError, RelayMessage, RelayNode};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound for a query across all nodes
    pub query_timeout: Duration,

    /// Upper bound for one node to acknowledge a publish
    pub publish_timeout: Duration,

    /// Per-node circuit breaker settings
    pub breaker: CircuitBreakerConfig,

    /// Event ids a live subscription remembers for deduplication
    pub dedupe_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            breaker: CircuitBreakerConfig::default(),
            dedupe_capacity: 4096,
        }
    }
}

/// Result of publishing to one node
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub relay: String,
    pub result: Result<(), NodeError>,
}

/// Per-node results of one publish. Success means at least one node accepted.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub event_id: String,
    pub outcomes: Vec<NodeOutcome>,
}

impl PublishReport {
    pub fn accepted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn is_success(&self) -> bool {
        self.accepted_count() > 0
    }

    /// Some, but not all, nodes accepted the event
    pub fn is_partial_failure(&self) -> bool {
        self.is_success() && self.accepted_count() < self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

struct PoolNode {
    node: Arc<dyn RelayNode>,
    breaker: CircuitBreaker,
}

impl PoolNode {
    async fn guarded<T, F, Fut>(&self, timeout: Duration, f: F) -> Result<T, NodeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let url = self.node.url();
        let result = self
            .breaker
            .call_async(|| async move {
                match tokio::time::timeout(timeout, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Timeout(url.to_string())),
                }
            })
            .await;
        match result {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open) => Err(NodeError::CircuitOpen(url.to_string())),
            Err(CircuitBreakerError::Operation(e)) => Err(e),
        }
    }
}

/// Event Source Adapter over a configured set of relay nodes.
///
/// Reads merge all nodes' answers by event id; writes go to every node and
/// report per-node outcomes.
pub struct RelayPool {
    nodes: Vec<PoolNode>,
    config: PoolConfig,
}

impl RelayPool {
    pub fn new(nodes: Vec<Arc<dyn RelayNode>>, config: PoolConfig) -> Result<Self, RelayError> {
        if nodes.is_empty() {
            return Err(RelayError::NoNodes);
        }
        let nodes = nodes
            .into_iter()
            .map(|node| PoolNode {
                breaker: CircuitBreaker::new(node.url(), config.breaker.clone()),
                node,
            })
            .collect();
        Ok(Self { nodes, config })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.node.url()).collect()
    }

    pub fn node_states(&self) -> Vec<(String, CircuitState)> {
        self.nodes
            .iter()
            .map(|n| (n.node.url().to_string(), n.breaker.state()))
            .collect()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub async fn query(&self, filter: &Filter) -> Result<Vec<Event>, RelayError> {
        self.query_with_timeout(filter, self.config.query_timeout)
            .await
    }

    /// Query every node concurrently and merge by event id.
    ///
    /// Nodes that fail or miss the deadline are skipped; their absence only
    /// makes the result partial. Fails when no node answered at all.
    pub async fn query_with_timeout(
        &self,
        filter: &Filter,
        timeout: Duration,
    ) -> Result<Vec<Event>, RelayError> {
        let mut pending: FuturesUnordered<_> = self
            .nodes
            .iter()
            .map(|n| async move {
                let result = n.guarded(timeout, || n.node.query(filter)).await;
                (n.node.url(), result)
            })
            .collect();

        let mut merged: HashMap<String, Event> = HashMap::new();
        let mut responded = 0usize;

        while let Some((url, result)) = pending.next().await {
            match result {
                Ok(events) => {
                    responded += 1;
                    debug!(relay = %url, count = events.len(), "relay query answered");
                    for event in events {
                        merged.entry(event.id.clone()).or_insert(event);
                    }
                }
                Err(e) => {
                    warn!(relay = %url, error = %e, "relay query failed");
                }
            }
        }

        if responded == 0 {
            return Err(RelayError::SourceUnavailable {
                attempted: self.nodes.len(),
            });
        }

        let mut events: Vec<Event> = merged.into_values().collect();
        events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// Publish to every node concurrently. One node's failure never blocks or
    /// cancels the others.
    pub async fn publish(&self, event: &Event) -> PublishReport {
        let timeout = self.config.publish_timeout;
        let outcomes = join_all(self.nodes.iter().map(|n| async move {
            let result = n.guarded(timeout, || n.node.publish(event)).await;
            NodeOutcome {
                relay: n.node.url().to_string(),
                result,
            }
        }))
        .await;

        let report = PublishReport {
            event_id: event.id.clone(),
            outcomes,
        };

        for failure in report.failures() {
            if let Err(e) = &failure.result {
                warn!(
                    relay = %failure.relay,
                    event_id = %report.event_id,
                    error = %e,
                    "relay did not accept event"
                );
            }
        }
        if !report.is_success() {
            warn!(event_id = %report.event_id, "event was not accepted by any relay");
        }

        report
    }

    /// Subscribe on every node. `on_event` sees each distinct event once
    /// among the last `dedupe_capacity` ids;
    /// `on_eose` fires once every subscribed node has finished replaying
    /// stored events (or dropped out).
    pub async fn subscribe<F, G>(
        &self,
        filter: &Filter,
        on_event: F,
        on_eose: G,
    ) -> Result<Subscription, RelayError>
    where
        F: Fn(Event) + Send + Sync + 'static,
        G: FnOnce() + Send + 'static,
    {
        let opened = join_all(self.nodes.iter().map(|n| async move {
            let result = n
                .guarded(self.config.query_timeout, || n.node.subscribe(filter))
                .await;
            (n.node.url(), result)
        }))
        .await;

        let mut receivers = Vec::new();
        for (url, result) in opened {
            match result {
                Ok(rx) => receivers.push(rx),
                Err(e) => warn!(relay = %url, error = %e, "relay subscription failed"),
            }
        }

        if receivers.is_empty() {
            return Err(RelayError::SourceUnavailable {
                attempted: self.nodes.len(),
            });
        }

        let node_count = receivers.len();
        let (merged_tx, mut merged_rx) = mpsc::channel::<(usize, RelayMessage)>(512);
        let mut tasks = Vec::with_capacity(node_count + 1);

        for (idx, mut rx) in receivers.into_iter().enumerate() {
            let tx = merged_tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if tx.send((idx, msg)).await.is_err() {
                        return;
                    }
                }
                let _ = tx
                    .send((idx, RelayMessage::Closed("stream ended".to_string())))
                    .await;
            }));
        }
        drop(merged_tx);

        let capacity = NonZeroUsize::new(self.config.dedupe_capacity).unwrap_or(NonZeroUsize::MIN);
        tasks.push(tokio::spawn(async move {
            let mut seen: LruCache<String, ()> = LruCache::new(capacity);
            let mut replaying: HashSet<usize> = (0..node_count).collect();
            let mut on_eose = Some(on_eose);

            while let Some((idx, msg)) = merged_rx.recv().await {
                match msg {
                    RelayMessage::Event(event) => {
                        if seen.put(event.id.clone(), ()).is_none() {
                            on_event(event);
                        }
                    }
                    RelayMessage::EndOfStoredEvents | RelayMessage::Closed(_) => {
                        replaying.remove(&idx);
                        if replaying.is_empty() {
                            if let Some(done) = on_eose.take() {
                                done();
                            }
                        }
                    }
                }
            }
        }));

        Ok(Subscription { tasks })
    }
}

/// Live multi-node subscription. Closing (or dropping) it stops delivery.
pub struct Subscription {
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
