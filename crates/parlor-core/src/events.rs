/// Signals emitted to the UI collaborator. The UI owns all rendering and
/// routing; it reacts to these by re-reading the relevant snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    ConversationsUpdated,
    MessagesUpdated { conversation_id: String },
    UnreadChanged { total: u64 },
    Connectivity { connected: bool },
    /// A conversation was removed; `notice` carries the transient
    /// user-facing text when someone else deleted it.
    ConversationRemoved {
        conversation_id: String,
        notice: Option<String>,
    },
    /// The conversation the user had open was removed; clear the
    /// selection.
    ActiveConversationCleared,
    /// Terminal session failure; redirect to the login surface.
    SessionExpired,
}
