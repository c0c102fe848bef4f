//! Usage: HTTP transport seam (reqwest in production, a scripted mock in tests).

use crate::gateway::request::{ApiBody, ApiRequest, Method};
use crate::infra::config::ClientConfig;
use crate::shared::error::AppResult;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

/// Raw outcome of one HTTP exchange. A non-2xx status is not an error at
/// this layer; the gateway decides what a status means.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request with an optional bearer credential already resolved by
/// the gateway. Implementations must not retry or reinterpret statuses.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> impl Future<Output = AppResult<TransportResponse>> + Send;
}

pub(crate) fn bearer_header_value(token: &str) -> String {
    format!("Bearer {}", token.trim())
}

/// Production transport over reqwest. Cookies are kept in an in-memory jar
/// so the server-managed refresh cookie set at sign-in rides along with
/// every renewal call.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
            .cookie_store(true)
            .build()
            .map_err(|e| format!("SYSTEM_ERROR: failed to build http client: {e}"))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn build(&self, request: &ApiRequest, bearer: Option<&str>) -> AppResult<reqwest::RequestBuilder> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        if let Some(token) = bearer {
            builder = builder.header(reqwest::header::AUTHORIZATION, bearer_header_value(token));
        }

        builder = match &request.body {
            ApiBody::Empty => builder,
            ApiBody::Json(value) => {
                let encoded = serde_json::to_vec(value)
                    .map_err(|e| format!("SYSTEM_ERROR: failed to encode request body: {e}"))?;
                builder
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(encoded)
            }
            ApiBody::Multipart(fields) => {
                let mut form = reqwest::multipart::Form::new();
                for field in fields {
                    let mut part = reqwest::multipart::Part::bytes(field.data.to_vec());
                    if let Some(file_name) = &field.file_name {
                        part = part.file_name(file_name.clone());
                    }
                    if let Some(content_type) = &field.content_type {
                        part = part.mime_str(content_type).map_err(|e| {
                            format!("SEC_INVALID_INPUT: invalid part content type: {e}")
                        })?;
                    }
                    form = form.part(field.name.clone(), part);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> AppResult<TransportResponse> {
        let response = self
            .build(request, bearer)?
            .send()
            .await
            .map_err(|e| format!("API_TRANSPORT: request failed: {e}"))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| format!("API_TRANSPORT: response read failed: {e}"))?;

        Ok(TransportResponse { status, body })
    }
}
