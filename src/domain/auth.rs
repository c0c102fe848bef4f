//! Usage: Account and session endpoints (/auth/*, /me/).

use crate::gateway::client::parse_token_grant;
use crate::gateway::request::ApiRequest;
use crate::gateway::transport::Transport;
use crate::gateway::ApiGateway;
use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Student,
    Instructor,
}

impl Role {
    /// Accepts unknown role strings instead of failing the whole profile
    /// decode; anything unrecognized is treated as a student.
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "instructor" => Role::Instructor,
            _ => Role::Student,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse_lossy(&value)
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// Shape of `GET /me/`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
}

pub async fn register<T: Transport>(
    gateway: &ApiGateway<T>,
    request: &RegisterRequest,
) -> AppResult<RegisteredUser> {
    let body = serde_json::to_value(request)
        .map_err(|e| format!("SEC_INVALID_INPUT: failed to encode registration: {e}"))?;
    gateway
        .request_json(ApiRequest::post("/auth/register/").json(body))
        .await
}

/// Signs in and returns the new access token. The server moves the refresh
/// credential into an HTTP-only cookie, so only the access token comes back
/// in the body.
pub async fn login<T: Transport>(
    gateway: &ApiGateway<T>,
    username: &str,
    password: &str,
) -> AppResult<String> {
    let response = gateway
        .execute(ApiRequest::post("/auth/token/").json(serde_json::json!({
            "username": username.trim(),
            "password": password,
        })))
        .await?;

    let grant = parse_token_grant(&response.body)?;
    grant
        .access
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| "API_DECODE: sign-in response missing access token".into())
}

pub async fn me<T: Transport>(gateway: &ApiGateway<T>) -> AppResult<UserProfile> {
    gateway.request_json(ApiRequest::get("/me/")).await
}

/// Tells the server to blacklist the refresh cookie. A 401 here must not
/// kick off a renewal: signing out of a dead session is still a sign-out.
pub async fn logout<T: Transport>(gateway: &ApiGateway<T>) -> AppResult<()> {
    gateway
        .request_unit(
            ApiRequest::post("/auth/logout/")
                .json(serde_json::json!({}))
                .skip_auth_refresh(),
        )
        .await
}
