//! In-memory state shared by all repaint tasks.
//!
//! Both stores are plain `RwLock<HashMap>`s and never hold a lock across an
//! await. Two tasks repainting the same photo at once may both miss the cache
//! and compute the same artifact; the later write wins.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::models::{ConversationId, FeatureMeta, MessageKey, PhotoMessage, PhotoRef};

#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub photo: Option<PhotoRef>,
    pub caption: Option<String>,
    pub meta: Option<FeatureMeta>,
}

/// Derived artifacts per photo message. No eviction.
#[derive(Default)]
pub struct ArtifactCache {
    entries: RwLock<HashMap<MessageKey, Artifacts>>,
}

impl ArtifactCache {
    #[cfg(test)]
    pub fn get(&self, key: &MessageKey) -> Option<Artifacts> {
        self.entries.read().get(key).cloned()
    }

    pub fn caption(&self, key: &MessageKey) -> Option<String> {
        self.entries.read().get(key).and_then(|a| a.caption.clone())
    }

    pub fn meta(&self, key: &MessageKey) -> Option<FeatureMeta> {
        self.entries.read().get(key).and_then(|a| a.meta.clone())
    }

    pub fn store_photo(&self, key: MessageKey, photo: PhotoRef) {
        self.entries.write().entry(key).or_default().photo = Some(photo);
    }

    pub fn store_caption(&self, key: MessageKey, caption: String) {
        self.entries.write().entry(key).or_default().caption = Some(caption);
    }

    pub fn store_meta(&self, key: MessageKey, meta: FeatureMeta) {
        self.entries.write().entry(key).or_default().meta = Some(meta);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[derive(Debug, Clone)]
pub struct ActivePhoto {
    pub photo: PhotoMessage,
    pub recorded_at: DateTime<Utc>,
}

/// Last photo seen per conversation.
#[derive(Default)]
pub struct SessionStore {
    active: RwLock<HashMap<ConversationId, ActivePhoto>>,
}

impl SessionStore {
    /// Replaces whatever photo the conversation had.
    pub fn record(&self, chat: ConversationId, photo: PhotoMessage) {
        self.active.write().insert(chat, ActivePhoto { photo, recorded_at: Utc::now() });
    }

    #[cfg(test)]
    pub fn active_photo(&self, chat: ConversationId) -> Option<PhotoMessage> {
        self.active.read().get(&chat).map(|a| a.photo.clone())
    }

    #[cfg(test)]
    pub fn entry(&self, chat: ConversationId) -> Option<ActivePhoto> {
        self.active.read().get(&chat).cloned()
    }

    /// Explicit reply wins over the remembered photo.
    pub fn resolve(&self, chat: ConversationId, explicit: Option<PhotoMessage>) -> Option<PhotoMessage> {
        if explicit.is_some() {
            return explicit;
        }
        let active = self.active.read().get(&chat).cloned()?;
        debug!(%chat, message = %active.photo.message_id, since = %active.recorded_at, "using remembered photo");
        Some(active.photo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use serde_json::json;

    fn photo(id: i64) -> PhotoMessage {
        PhotoMessage {
            message_id: MessageId(id),
            sizes: vec![PhotoRef { file_id: format!("f{id}"), width: 10, height: 10 }],
        }
    }

    #[test]
    fn newer_upload_replaces_active_photo() {
        let store = SessionStore::default();
        let chat = ConversationId(7);
        store.record(chat, photo(1));
        let first = store.entry(chat).unwrap().recorded_at;
        store.record(chat, photo(2));
        let entry = store.entry(chat).unwrap();
        assert_eq!(entry.photo.message_id, MessageId(2));
        assert!(entry.recorded_at >= first);
        assert!(store.active_photo(ConversationId(8)).is_none());
    }

    #[test]
    fn resolve_prefers_explicit_reply() {
        let store = SessionStore::default();
        let chat = ConversationId(1);
        assert!(store.resolve(chat, None).is_none());
        store.record(chat, photo(2));
        assert_eq!(store.resolve(chat, None).unwrap().message_id, MessageId(2));
        assert_eq!(store.resolve(chat, Some(photo(5))).unwrap().message_id, MessageId(5));
    }

    #[test]
    fn artifacts_fill_independently() {
        let cache = ArtifactCache::default();
        let key = MessageKey { chat: ConversationId(1), message: MessageId(3) };
        assert!(cache.get(&key).is_none());
        cache.store_caption(key, "a cat".into());
        assert_eq!(cache.caption(&key).as_deref(), Some("a cat"));
        assert!(cache.meta(&key).is_none());
        cache.store_meta(key, serde_json::from_value(json!({"object": "cat"})).unwrap());
        cache.store_photo(key, PhotoRef { file_id: "f".into(), width: 1, height: 2 });
        let all = cache.get(&key).unwrap();
        assert_eq!(all.caption.as_deref(), Some("a cat"));
        assert_eq!(all.meta.unwrap().text("object"), Some("cat"));
        assert_eq!(all.photo.unwrap().height, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn same_message_id_in_other_chat_is_separate() {
        let cache = ArtifactCache::default();
        cache.store_caption(MessageKey { chat: ConversationId(1), message: MessageId(3) }, "one".into());
        assert!(cache.caption(&MessageKey { chat: ConversationId(2), message: MessageId(3) }).is_none());
    }
}
