pub mod cache;
pub mod unread;

pub use cache::{CacheSyncEngine, MergeOutcome, RemovedConversation};
pub use unread::UnreadTracker;
