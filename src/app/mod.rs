pub mod auth_context;

pub use auth_context::{AuthContext, BootOutcome};
