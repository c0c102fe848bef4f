//! CourseHub client core: authenticated session lifecycle and API gateway
//! for the CourseHub learning platform.
//!
//! The crate owns the access token, decorates every outbound request with
//! it, intercepts 401 responses, renews the session through a single-flight
//! refresh protocol and broadcasts session invalidation to whatever UI layer
//! sits on top. Domain endpoint wrappers (courses, lessons, enrollments,
//! progress) ride on the same gateway and inherit the protocol for free.

pub mod app;
pub mod domain;
pub mod gateway;
pub mod infra;
pub mod session;
pub mod shared;
pub mod test_support;

pub use app::{AuthContext, BootOutcome};
pub use gateway::{ApiGateway, ApiRequest, HttpTransport, Transport};
pub use infra::config::ClientConfig;
pub use session::{SessionEvent, SessionEvents, TokenStore};
pub use shared::error::{AppError, AppResult};
