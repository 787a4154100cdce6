//! In-process cache of conversation snapshots.
//!
//! Entries are keyed the way the conversation query is keyed elsewhere
//! (`["chat", id]`). Invalidating a key drops the snapshot and notifies
//! subscribers so views can refetch.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use dapur_core::types::Conversation;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Cache key for a conversation query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// `["chat", conversation_id]`
    pub fn chat(conversation_id: impl Into<String>) -> Self {
        Self(vec!["chat".to_string(), conversation_id.into()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Snapshot cache with invalidation notifications.
pub struct ConversationCache {
    entries: RwLock<HashMap<CacheKey, Conversation>>,
    events: broadcast::Sender<CacheKey>,
}

impl ConversationCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Conversation> {
        let entries = match self.entries.read() {
            Ok(e) => e,
            Err(_) => return None,
        };
        entries.get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, conversation: Conversation) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, conversation);
        }
    }

    /// Drop the snapshot for `key` and notify subscribers.
    ///
    /// Returns whether a snapshot was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = match self.entries.write() {
            Ok(mut entries) => entries.remove(key).is_some(),
            Err(_) => false,
        };
        tracing::debug!(key = %key, removed, "Cache key invalidated");
        // No subscribers is fine.
        let _ = self.events.send(key.clone());
        removed
    }

    /// Receive every key invalidated from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new()
    }
}
