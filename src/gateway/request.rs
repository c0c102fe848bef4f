//! Usage: Request description handed to the transport (method, path, body, auth markers).

use bytes::Bytes;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One field of a multipart form. `data` is cheap to clone, so the same
/// request can be resubmitted after a token renewal without re-reading files.
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into().into_bytes()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ApiBody {
    Empty,
    Json(Value),
    Multipart(Vec<MultipartField>),
}

/// A request as the domain layer describes it, before the gateway attaches
/// credentials. Paths are server-relative (`/courses/3/`).
///
/// The two `skip_*` markers exist for the token endpoints themselves:
/// `skip_auth_header` leaves the bearer header off, `skip_auth_refresh`
/// makes a 401 terminal instead of triggering a renewal. `retried` is set
/// by the gateway once a request has been resubmitted, so no request ever
/// loops through the renewal path twice.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: ApiBody,
    pub skip_auth_header: bool,
    pub skip_auth_refresh: bool,
    pub(crate) retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: ApiBody::Empty,
            skip_auth_header: false,
            skip_auth_refresh: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = ApiBody::Json(body);
        self
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = ApiBody::Multipart(fields);
        self
    }

    pub fn skip_auth_header(mut self) -> Self {
        self.skip_auth_header = true;
        self
    }

    pub fn skip_auth_refresh(mut self) -> Self {
        self.skip_auth_refresh = true;
        self
    }
}
