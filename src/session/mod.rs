pub mod events;
pub mod refresh;
pub mod token_store;

pub use events::{SessionEvent, SessionEvents};
pub use refresh::{RefreshCoordinator, TokenGrant};
pub use token_store::TokenStore;
