//! Cache synchronization engine.
//!
//! Single source of truth for the conversation list and per-conversation
//! message lists. Updates arrive from two directions, pull responses and
//! push events, in no guaranteed order; every merge is idempotent and
//! commutative so either arrival order converges to the same state.
//!
//! Invariants:
//! - conversation list is ordered by last activity descending, one entry
//!   per id
//! - message lists are ordered by creation instant ascending, ties broken
//!   by lexical id, one entry per id

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::api::ChatApi;
use crate::auth::SessionManager;
use crate::error::SessionError;
use crate::models::{Conversation, Message};

/// What a push merge did, so the runtime knows which signals to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The cache changed for this conversation.
    Merged { conversation_id: String },
    /// Duplicate or unmergeable push; cache unchanged.
    Ignored,
}

/// Result of removing a conversation on a pushed deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedConversation {
    pub conversation_id: String,
    /// Transient notice for the UI when someone else deleted it, naming
    /// the conversation.
    pub notice: Option<String>,
}

#[derive(Default)]
struct CacheInner {
    /// Ordered by `last_activity` descending
    conversations: Vec<Conversation>,
    conversations_seeded: bool,
    /// Presence of a key means the list is seeded; ordered ascending
    messages: HashMap<String, Vec<Message>>,
}

impl CacheInner {
    fn sort_conversations(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then(a.id.cmp(&b.id)));
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    fn has_conversation(&self, id: &str) -> bool {
        self.conversations.iter().any(|c| c.id == id)
    }

    /// Insert preserving order and id uniqueness. Returns false on duplicate.
    fn insert_message(&mut self, msg: Message) -> bool {
        let Some(list) = self.messages.get_mut(&msg.conversation_id) else {
            return false;
        };
        if list.iter().any(|m| m.id == msg.id) {
            return false;
        }
        let at = list.partition_point(|m| m.sort_key() <= msg.sort_key());
        list.insert(at, msg);
        true
    }
}

pub struct CacheSyncEngine {
    session: Arc<SessionManager>,
    api: Arc<dyn ChatApi>,
    inner: RwLock<CacheInner>,
}

impl CacheSyncEngine {
    pub fn new(session: Arc<SessionManager>, api: Arc<dyn ChatApi>) -> Self {
        Self {
            session,
            api,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Ordered conversation snapshot, fetching through the session layer
    /// on cold start.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        if self.inner.read().conversations_seeded {
            return Ok(self.inner.read().conversations.clone());
        }

        let api = self.api.clone();
        let fetched = self
            .session
            .execute(move |token| {
                let api = api.clone();
                async move { api.fetch_conversations(&token).await }
            })
            .await?;
        self.apply_fetched_conversations(fetched);
        Ok(self.inner.read().conversations.clone())
    }

    /// Ordered message snapshot for one conversation, fetching through
    /// the session layer on cold start or after invalidation.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, SessionError> {
        if let Some(list) = self.inner.read().messages.get(conversation_id) {
            return Ok(list.clone());
        }

        let api = self.api.clone();
        let id = conversation_id.to_string();
        let fetched = self
            .session
            .execute(move |token| {
                let api = api.clone();
                let id = id.clone();
                async move { api.fetch_messages(&token, &id).await }
            })
            .await?;
        self.apply_fetched_messages(conversation_id, fetched);
        Ok(self
            .inner
            .read()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Replace-or-seed the conversation list from a pull response.
    pub fn apply_fetched_conversations(&self, mut conversations: Vec<Conversation>) {
        conversations.sort_by(|a, b| a.id.cmp(&b.id));
        conversations.dedup_by(|a, b| a.id == b.id);

        let mut inner = self.inner.write();
        inner.conversations = conversations;
        inner.conversations_seeded = true;
        inner.sort_conversations();
    }

    /// Replace-or-seed one conversation's message list from a pull response.
    pub fn apply_fetched_messages(&self, conversation_id: &str, mut messages: Vec<Message>) {
        messages.retain(|m| m.conversation_id == conversation_id);
        messages.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        messages.dedup_by(|a, b| a.id == b.id);
        self.inner
            .write()
            .messages
            .insert(conversation_id.to_string(), messages);
    }

    /// Merge a pushed message: idempotent insert, then bump the owning
    /// conversation's summary and ordering. A conversation we have never
    /// seen is fetched lazily; if that fetch fails the merge degrades to
    /// a no-op rather than breaking the push pipeline.
    pub async fn apply_pushed_message(&self, msg: Message) -> MergeOutcome {
        if self.inner.read().conversations_seeded && !self.inner.read().has_conversation(&msg.conversation_id)
        {
            let api = self.api.clone();
            let id = msg.conversation_id.clone();
            let fetched = self
                .session
                .execute(move |token| {
                    let api = api.clone();
                    let id = id.clone();
                    async move { api.fetch_conversation(&token, &id).await }
                })
                .await;
            match fetched {
                Ok(conv) => {
                    self.apply_pushed_conversation_created(conv);
                }
                Err(err) => {
                    warn!(
                        conversation_id = %msg.conversation_id,
                        "dropping pushed message for unfetchable conversation: {err}"
                    );
                    return MergeOutcome::Ignored;
                }
            }
        }

        let mut inner = self.inner.write();
        let conversation_id = msg.conversation_id.clone();

        let inserted = if inner.messages.contains_key(&conversation_id) {
            inner.insert_message(msg.clone())
        } else {
            // Message list not cached: leave it uncached so the next read
            // pulls full history (this message included). The duplicate
            // guard falls back to the summary.
            let duplicate = inner
                .conversation_mut(&conversation_id)
                .and_then(|c| c.last_message.as_ref())
                .map(|s| s.id == msg.id)
                .unwrap_or(false);
            if duplicate {
                return MergeOutcome::Ignored;
            }
            true
        };

        if !inserted {
            debug!(message_id = %msg.id, "duplicate push ignored");
            return MergeOutcome::Ignored;
        }

        let seeded = inner.conversations_seeded;
        match inner.conversation_mut(&conversation_id) {
            Some(conv) => {
                conv.touch(&msg);
                inner.sort_conversations();
                MergeOutcome::Merged { conversation_id }
            }
            None if !seeded => {
                // Conversation list not loaded yet; the message list merge
                // alone is still a change worth signaling
                MergeOutcome::Merged { conversation_id }
            }
            None => {
                // The conversation vanished between the check and the
                // merge (e.g. a concurrent deletion). Invalidate the key
                // rather than keep a dangling list.
                inner.messages.remove(&conversation_id);
                MergeOutcome::Ignored
            }
        }
    }

    /// Idempotent front insert of a newly created conversation.
    pub fn apply_pushed_conversation_created(&self, conversation: Conversation) -> bool {
        let mut inner = self.inner.write();
        if inner.has_conversation(&conversation.id) {
            return false;
        }
        inner.conversations.push(conversation);
        inner.sort_conversations();
        true
    }

    /// Remove a deleted conversation and its messages. Returns `None` if
    /// it was not cached. The notice names the conversation when the
    /// deletion came from someone else.
    pub fn apply_pushed_conversation_deleted(
        &self,
        conversation_id: &str,
        deleted_by: &str,
        local_user_id: Option<&str>,
    ) -> Option<RemovedConversation> {
        let mut inner = self.inner.write();
        let pos = inner
            .conversations
            .iter()
            .position(|c| c.id == conversation_id)?;
        let conversation = inner.conversations.remove(pos);
        inner.messages.remove(conversation_id);

        let notice = if Some(deleted_by) != local_user_id {
            Some(format!(
                "\"{}\" was deleted",
                conversation.display_name(local_user_id)
            ))
        } else {
            None
        };

        Some(RemovedConversation {
            conversation_id: conversation_id.to_string(),
            notice,
        })
    }

    /// Drop one conversation's cached message list; the next read
    /// re-fetches from source.
    pub fn invalidate_messages(&self, conversation_id: &str) {
        self.inner.write().messages.remove(conversation_id);
    }

    /// Forget everything, e.g. on logout.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.conversations.clear();
        inner.conversations_seeded = false;
        inner.messages.clear();
    }
}
