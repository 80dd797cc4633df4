use lash_types::Event;
use std::collections::HashMap;

/// Identity of a parameterized replaceable event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplaceableKey {
    pub author: String,
    pub kind: u32,
    pub discriminator: String,
}

impl ReplaceableKey {
    /// `None` for events without a `d` tag; they cannot be replaced.
    pub fn of(event: &Event) -> Option<Self> {
        event.discriminator().map(|d| Self {
            author: event.pubkey.clone(),
            kind: event.kind,
            discriminator: d.to_string(),
        })
    }
}

/// Whether `candidate` replaces `current`: newer `created_at` wins, equal
/// timestamps go to the lexicographically greater id.
pub fn supersedes(candidate: &Event, current: &Event) -> bool {
    (candidate.created_at, candidate.id.as_str()) > (current.created_at, current.id.as_str())
}

/// Reduce a batch of events to the canonical event per replaceable key.
///
/// Order-independent and idempotent: duplicated or shuffled input resolves to
/// the same map.
pub fn resolve(events: &[Event]) -> HashMap<ReplaceableKey, Event> {
    let mut canonical: HashMap<ReplaceableKey, Event> = HashMap::new();

    for event in events {
        let Some(key) = ReplaceableKey::of(event) else {
            continue;
        };
        match canonical.get(&key) {
            Some(current) if !supersedes(event, current) => {}
            _ => {
                canonical.insert(key, event.clone());
            }
        }
    }

    canonical
}

/// Canonical events keyed by `lash_id`. When several authors claim one
/// `lash_id` the same tie-break picks a single winner.
pub fn resolve_by_lash(events: &[Event]) -> HashMap<String, Event> {
    let mut by_lash: HashMap<String, Event> = HashMap::new();

    for (key, event) in resolve(events) {
        match by_lash.get(&key.discriminator) {
            Some(current) if !supersedes(&event, current) => {}
            _ => {
                by_lash.insert(key.discriminator, event);
            }
        }
    }

    by_lash
}
