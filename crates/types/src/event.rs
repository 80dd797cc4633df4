use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Parameterized-replaceable kind carrying LASH tip records and their state
/// transitions. Events of this kind are replaced by (author, kind, `d` tag).
pub const LASH_KIND: u32 = 39_735;

/// Hashtag attached to every LASH event so relays can index them.
pub const LASH_HASHTAG: &str = "lash";

// Tag names used on LASH events
pub const TAG_D: &str = "d";
pub const TAG_SENDER: &str = "sender";
pub const TAG_RECIPIENT: &str = "p";
pub const TAG_SOURCE_EVENT: &str = "e";
pub const TAG_AMOUNT: &str = "amount";
pub const TAG_WALLET: &str = "wallet";
pub const TAG_STATE: &str = "state";
pub const TAG_TXID: &str = "txid";
pub const TAG_VOUT: &str = "vout";
pub const TAG_BLOCK: &str = "block";
pub const TAG_EXPIRATION: &str = "expiration";
pub const TAG_HASHTAG: &str = "t";

/// A signed event as stored and forwarded by relay nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// First tag with the given name
    pub fn tag(&self, name: &str) -> Option<&[String]> {
        find_tag(&self.tags, name)
    }

    /// Value (second element) of the first tag with the given name
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tag(name).and_then(|t| t.get(1)).map(String::as_str)
    }

    /// All values of tags with the given name
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    /// Discriminator (`d` tag) of a parameterized-replaceable event
    pub fn discriminator(&self) -> Option<&str> {
        self.tag_value(TAG_D)
    }

    /// Recompute the canonical id from the event body
    pub fn compute_id(&self) -> String {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Check that `id` commits to the event body. Signature verification is
    /// left to the signer boundary.
    pub fn has_valid_id(&self) -> bool {
        self.id == self.compute_id()
    }

    pub fn is_parameterized_replaceable(&self) -> bool {
        (30_000..40_000).contains(&self.kind)
    }
}

/// An event body waiting for an id and signature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(pubkey: impl Into<String>, created_at: u64, kind: u32) -> Self {
        Self {
            pubkey: pubkey.into(),
            created_at,
            kind,
            tags: Vec::new(),
            content: String::new(),
        }
    }

    pub fn tag<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn id(&self) -> String {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    pub fn tag_value(&self, name: &str) -> Option<&str> {
        find_tag(&self.tags, name)
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// Attach id and signature produced by a signer
    pub fn into_signed(self, sig: impl Into<String>) -> Event {
        let id = self.id();
        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: sig.into(),
        }
    }
}

fn find_tag<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a [String]> {
    tags.iter()
        .find(|t| t.first().map(String::as_str) == Some(name))
        .map(Vec::as_slice)
}

/// Hex SHA-256 of `[0, pubkey, created_at, kind, tags, content]`
pub fn compute_event_id(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let serialized = serde_json::json!([0, pubkey, created_at, kind, tags, content]).to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnsignedEvent {
        UnsignedEvent::new("alice", 100, LASH_KIND)
            .tag([TAG_D, "lash-1"])
            .tag([TAG_RECIPIENT, "bob"])
            .tag([TAG_HASHTAG, LASH_HASHTAG])
            .content("thanks")
    }

    #[test]
    fn test_id_is_deterministic() {
        assert_eq!(sample().id(), sample().id());
        assert_eq!(sample().id().len(), 64);
    }

    #[test]
    fn test_id_commits_to_tags() {
        let a = sample();
        let b = sample().tag([TAG_AMOUNT, "10"]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_signed_event_has_valid_id() {
        let event = sample().into_signed("sig");
        assert!(event.has_valid_id());

        let mut tampered = event.clone();
        tampered.content = "changed".to_string();
        assert!(!tampered.has_valid_id());
    }

    #[test]
    fn test_tag_lookup() {
        let event = sample().tag([TAG_HASHTAG, "tips"]).into_signed("sig");
        assert_eq!(event.discriminator(), Some("lash-1"));
        assert_eq!(event.tag_value(TAG_RECIPIENT), Some("bob"));
        assert_eq!(event.tag_value("missing"), None);
        let hashtags: Vec<_> = event.tag_values(TAG_HASHTAG).collect();
        assert_eq!(hashtags, vec!["lash", "tips"]);
        assert!(event.is_parameterized_replaceable());
    }
}
