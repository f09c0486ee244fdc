pub mod conversation;
pub mod credential;
pub mod message;

pub use conversation::{Conversation, MessageSummary, Participant};
pub use credential::{Claims, Credential};
pub use message::Message;
