//! Usage: Authenticated API gateway (bearer injection, 401 interception, single retry).

use crate::gateway::request::ApiRequest;
use crate::gateway::transport::{Transport, TransportResponse};
use crate::session::events::SessionEvents;
use crate::session::refresh::{RefreshCoordinator, TokenGrant};
use crate::session::token_store::TokenStore;
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use serde_json::Value;
use std::sync::Arc;

/// The one endpoint whose 401 must never trigger another renewal attempt.
pub(crate) const REFRESH_PATH: &str = "/auth/token/refresh/";

const ERROR_BODY_SNIPPET_LIMIT: usize = 500;

/// Front door for every server call. Attaches the stored bearer token,
/// intercepts 401 responses, renews the session through the coordinator and
/// resubmits the failed request exactly once.
///
/// Guarantee: a request either succeeds, fails with its original non-401
/// error, or fails with exactly one normalized logged-out error. It never
/// loops.
pub struct ApiGateway<T: Transport> {
    transport: T,
    store: Arc<TokenStore>,
    events: Arc<SessionEvents>,
    coordinator: RefreshCoordinator,
}

impl<T: Transport> ApiGateway<T> {
    pub fn new(transport: T, store: Arc<TokenStore>, events: Arc<SessionEvents>) -> Self {
        let coordinator = RefreshCoordinator::new(Arc::clone(&store), Arc::clone(&events));
        Self {
            transport,
            store,
            events,
            coordinator,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<SessionEvents> {
        &self.events
    }

    /// Executes a request and decodes a 2xx response body as JSON.
    pub async fn request_json<R>(&self, request: ApiRequest) -> AppResult<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let path = request.path.clone();
        let response = self.execute(request).await?;
        serde_json::from_slice(&response.body)
            .map_err(|e| format!("API_DECODE: {path} returned an unreadable body: {e}").into())
    }

    /// Executes a request where the caller only cares that it succeeded
    /// (deletes, 204 responses).
    pub async fn request_unit(&self, request: ApiRequest) -> AppResult<()> {
        self.execute(request).await.map(|_| ())
    }

    pub async fn execute(&self, mut request: ApiRequest) -> AppResult<TransportResponse> {
        let trace_id = new_trace_id();
        let bearer = if request.skip_auth_header {
            None
        } else {
            self.store.access()
        };
        tracing::debug!(
            trace_id = %trace_id,
            method = request.method.as_str(),
            path = %request.path,
            authenticated = bearer.is_some(),
            "dispatching request"
        );

        let response = self.transport.send(&request, bearer.as_deref()).await?;
        if response.status != 401 {
            return finish(&trace_id, &request, response);
        }

        if is_terminal_unauthorized(&request) {
            tracing::warn!(trace_id = %trace_id, path = %request.path, "unrecoverable 401; ending session");
            return Err(self.end_session());
        }

        request.retried = true;
        let token = self
            .coordinator
            .request_refresh(|| self.call_refresh_endpoint())
            .await?;
        tracing::debug!(
            trace_id = %trace_id,
            path = %request.path,
            token = %mask_token(&token),
            "resubmitting after session renewal"
        );

        // The marker still binds on the retry: a request that asked for no
        // bearer is resubmitted without one.
        let retry_bearer = if request.skip_auth_header {
            None
        } else {
            Some(token.as_str())
        };
        let response = self.transport.send(&request, retry_bearer).await?;
        if response.status == 401 {
            // The renewed token was rejected too; one retry is the limit.
            tracing::warn!(trace_id = %trace_id, path = %request.path, "retry rejected with 401; ending session");
            return Err(self.end_session());
        }
        finish(&trace_id, &request, response)
    }

    /// Leader-only refresh call, run at most once per 401 wave by the
    /// coordinator. The server reads the refresh credential from its
    /// HTTP-only cookie, so the body is empty and no bearer is attached.
    async fn call_refresh_endpoint(&self) -> AppResult<TokenGrant> {
        let request = ApiRequest::post(REFRESH_PATH)
            .json(serde_json::json!({}))
            .skip_auth_header()
            .skip_auth_refresh();

        let response = self.transport.send(&request, None).await?;
        if !response.is_success() {
            let snippet = sanitize_error_body_snippet(&response.body_text());
            return Err(format!(
                "API_HTTP_STATUS: refresh endpoint returned status={} body={snippet}",
                response.status
            )
            .into());
        }

        parse_token_grant(&response.body)
    }

    fn end_session(&self) -> AppError {
        let _ = self.store.clear();
        self.events.notify_logged_out();
        AppError::session_expired()
    }
}

fn is_terminal_unauthorized(request: &ApiRequest) -> bool {
    request.path == REFRESH_PATH || request.skip_auth_refresh || request.retried
}

fn finish(
    trace_id: &str,
    request: &ApiRequest,
    response: TransportResponse,
) -> AppResult<TransportResponse> {
    if response.is_success() {
        tracing::debug!(trace_id = %trace_id, path = %request.path, status = response.status, "request succeeded");
        return Ok(response);
    }

    let snippet = sanitize_error_body_snippet(&response.body_text());
    tracing::warn!(trace_id = %trace_id, path = %request.path, status = response.status, "request failed");
    Err(AppError::new(
        "API_HTTP_STATUS",
        format!(
            "{} {} returned status={} body={snippet}",
            request.method.as_str(),
            request.path,
            response.status
        ),
    ))
}

/// Extracts the access token from a token endpoint response. SimpleJWT
/// sends `access`; the older deployments used `access_token`. Both are
/// accepted, missing-or-blank is reported by the coordinator.
pub(crate) fn parse_token_grant(body: &[u8]) -> AppResult<TokenGrant> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| format!("AUTH_REFRESH_MALFORMED: token response json invalid: {e}"))?;

    let access = ["access", "access_token"]
        .iter()
        .find_map(|key| value.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    Ok(TokenGrant { access })
}

fn new_trace_id() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token")
        || key_lc.contains("secret")
        || key_lc.contains("password")
        || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_BODY_SNIPPET_LIMIT).collect();
        }
    }
    body.chars().take(ERROR_BODY_SNIPPET_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::SessionEvent;
    use crate::test_support::MockTransport;
    use serde_json::json;

    fn gateway(dir: &tempfile::TempDir) -> ApiGateway<MockTransport> {
        let store = Arc::new(TokenStore::open(dir.path()).unwrap());
        let events = Arc::new(SessionEvents::new());
        ApiGateway::new(MockTransport::new(), store, events)
    }

    #[tokio::test]
    async fn attaches_stored_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        gw.transport.script_json("/me/", 200, json!({"id": 1, "username": "ana", "role": "student"}));

        let profile: Value = gw.request_json(ApiRequest::get("/me/")).await.unwrap();

        assert_eq!(profile["username"], "ana");
        let recorded = gw.transport.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].bearer.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn skip_auth_header_sends_no_bearer() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        gw.transport.script_json("/courses/", 200, json!([]));

        let _: Value = gw
            .request_json(ApiRequest::get("/courses/").skip_auth_header())
            .await
            .unwrap();

        assert_eq!(gw.transport.recorded()[0].bearer, None);
    }

    #[tokio::test]
    async fn non_401_error_passes_through_without_renewal() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        gw.transport
            .script_json("/courses/9/", 404, json!({"detail": "Not found."}));

        let err = gw.execute(ApiRequest::get("/courses/9/")).await.unwrap_err();

        assert_eq!(err.code(), "API_HTTP_STATUS");
        assert!(err.message().contains("status=404"), "got {err}");
        assert!(!err.is_logged_out());
        assert_eq!(gw.store().access().as_deref(), Some("t1"));
        assert_eq!(gw.transport.hits(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn renews_once_and_resubmits_with_new_token() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        gw.transport.script_json("/courses/", 401, json!({"detail": "expired"}));
        gw.transport.script_json(REFRESH_PATH, 200, json!({"access": "t2"}));
        gw.transport.script_json("/courses/", 200, json!([{"id": 1}]));

        let courses: Value = gw.request_json(ApiRequest::get("/courses/")).await.unwrap();

        assert_eq!(courses[0]["id"], 1);
        assert_eq!(gw.store().access().as_deref(), Some("t2"));

        let recorded = gw.transport.recorded();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0].bearer.as_deref(), Some("t1"));
        assert_eq!(recorded[1].path, REFRESH_PATH);
        assert_eq!(recorded[1].bearer, None, "refresh call carries no bearer");
        assert_eq!(
            recorded[2].bearer.as_deref(),
            Some("t2"),
            "retry must carry the renewed token"
        );
    }

    #[tokio::test]
    async fn second_401_after_retry_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        let mut rx = gw.events().subscribe();
        gw.transport.script_json("/me/", 401, json!({}));
        gw.transport.script_json(REFRESH_PATH, 200, json!({"access": "t2"}));
        gw.transport.script_json("/me/", 401, json!({}));

        let err = gw.execute(ApiRequest::get("/me/")).await.unwrap_err();

        assert!(err.is_logged_out());
        assert_eq!(gw.store().access(), None);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedOut);
        // No third attempt on the original path, one refresh in total.
        assert_eq!(gw.transport.hits("/me/"), 2);
        assert_eq!(gw.transport.hits(REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn failed_renewal_clears_and_broadcasts_once() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        let mut rx = gw.events().subscribe();
        gw.transport.script_json("/me/", 401, json!({}));
        gw.transport
            .script_json(REFRESH_PATH, 401, json!({"detail": "cookie expired"}));

        let err = gw.execute(ApiRequest::get("/me/")).await.unwrap_err();

        assert!(err.is_logged_out());
        assert_eq!(gw.store().access(), None);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedOut);
        assert!(rx.try_recv().is_err(), "exactly one broadcast");
        assert_eq!(gw.transport.hits("/me/"), 1, "no retry after failed renewal");
    }

    #[tokio::test]
    async fn skip_auth_refresh_401_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        gw.transport.script_json("/auth/logout/", 401, json!({}));

        let err = gw
            .execute(ApiRequest::post("/auth/logout/").skip_auth_refresh())
            .await
            .unwrap_err();

        assert!(err.is_logged_out());
        assert_eq!(gw.transport.hits(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_renewal() {
        let dir = tempfile::tempdir().unwrap();
        let gw = Arc::new(gateway(&dir));
        gw.store().set_access("t1").unwrap();

        // Hold the refresh endpoint closed until both callers have failed
        // with 401 and reached the coordinator.
        let gate = gw.transport.gate(REFRESH_PATH);
        gw.transport.script_json("/courses/", 401, json!({}));
        gw.transport.script_json("/myenrollments/", 401, json!({}));
        gw.transport.script_json(REFRESH_PATH, 200, json!({"access": "t2"}));
        gw.transport.script_json("/courses/", 200, json!([]));
        gw.transport.script_json("/myenrollments/", 200, json!([]));

        let a = tokio::spawn({
            let gw = Arc::clone(&gw);
            async move { gw.execute(ApiRequest::get("/courses/")).await }
        });
        let b = tokio::spawn({
            let gw = Arc::clone(&gw);
            async move { gw.execute(ApiRequest::get("/myenrollments/")).await }
        });

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(gw.transport.hits(REFRESH_PATH), 1, "renewal must be single-flight");
        assert_eq!(gw.store().access().as_deref(), Some("t2"));
        let retried_bearers: Vec<_> = gw
            .transport
            .recorded()
            .into_iter()
            .filter(|r| r.path != REFRESH_PATH && r.bearer.as_deref() == Some("t2"))
            .collect();
        assert_eq!(retried_bearers.len(), 2, "both retries carry the renewed token");
    }

    #[test]
    fn parse_token_grant_accepts_both_key_spellings() {
        let grant = parse_token_grant(br#"{"access": "t2"}"#).unwrap();
        assert_eq!(grant.access.as_deref(), Some("t2"));

        let legacy = parse_token_grant(br#"{"access_token": "t3"}"#).unwrap();
        assert_eq!(legacy.access.as_deref(), Some("t3"));

        let missing = parse_token_grant(br#"{"detail": "ok"}"#).unwrap();
        assert_eq!(missing.access, None);
    }

    #[test]
    fn parse_token_grant_rejects_invalid_json() {
        let err = parse_token_grant(b"<html>gateway timeout</html>").unwrap_err();
        assert_eq!(err.code(), "AUTH_REFRESH_MALFORMED");
    }

    #[test]
    fn sanitize_error_body_snippet_masks_credentials() {
        let raw = r#"{"detail": "bad", "access_token": "abcdef1234567890"}"#;
        let snippet = sanitize_error_body_snippet(raw);
        assert!(!snippet.contains("abcdef1234567890"));
        assert!(snippet.contains("abcdef...7890"));
    }

    #[test]
    fn sanitize_error_body_snippet_survives_multibyte_credentials() {
        // Server error bodies are untrusted input; masking must not choke
        // on non-ASCII token values.
        let raw = r#"{"access_token": "a€€€€xyz"}"#;
        let snippet = sanitize_error_body_snippet(raw);
        assert!(!snippet.contains("a€€€€xyz"));
        assert!(snippet.contains("********"));
    }

    #[tokio::test]
    async fn multibyte_error_body_still_yields_http_status_error() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        gw.transport.script_json(
            "/courses/9/",
            500,
            json!({"detail": "boom", "secret": "a€€€€xyz"}),
        );

        let err = gw.execute(ApiRequest::get("/courses/9/")).await.unwrap_err();

        assert_eq!(err.code(), "API_HTTP_STATUS");
        assert!(!err.message().contains("a€€€€xyz"));
    }

    #[tokio::test]
    async fn retry_respects_skip_auth_header() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.store().set_access("t1").unwrap();
        gw.transport.script_json("/courses/", 401, json!({}));
        gw.transport.script_json(REFRESH_PATH, 200, json!({"access": "t2"}));
        gw.transport.script_json("/courses/", 200, json!([]));

        let _: Value = gw
            .request_json(ApiRequest::get("/courses/").skip_auth_header())
            .await
            .unwrap();

        let recorded = gw.transport.recorded();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0].bearer, None);
        assert_eq!(
            recorded[2].bearer, None,
            "a no-bearer request must stay bearer-free on the retry"
        );
        // The renewal itself still went through and persisted.
        assert_eq!(gw.store().access().as_deref(), Some("t2"));
    }
}
