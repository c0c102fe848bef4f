pub mod client;
pub mod request;
pub mod transport;

pub use client::ApiGateway;
pub use request::{ApiBody, ApiRequest, Method, MultipartField};
pub use transport::{HttpTransport, Transport, TransportResponse};
