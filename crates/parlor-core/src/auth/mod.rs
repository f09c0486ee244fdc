pub mod session;
pub mod token_store;

pub use session::{SessionManager, SessionSignal};
pub use token_store::TokenStore;
