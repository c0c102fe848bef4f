//! Usage: Access-token persistence (single source of truth for the session credential).

use crate::shared::error::AppResult;
use crate::shared::mutex_ext::MutexExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SESSION_FILE: &str = "session.json";
const ACCESS_TOKEN_KEY: &str = "access_token";

/// Holds the current access token and mirrors it to durable storage so the
/// session survives a client restart.
///
/// The refresh token is never stored here: the server manages it as an
/// HTTP-only cookie. Earlier deployments kept a `refresh_token` key in this
/// file; every write drops that key so stale mode-1 state cannot linger.
pub struct TokenStore {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl TokenStore {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| format!("failed to create data dir: {e}"))?;
        let path = data_dir.join(SESSION_FILE);
        let cached = load_access_token(&path)?;
        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    /// Returns the current access token, or `None` when logged out.
    pub fn access(&self) -> Option<String> {
        self.cached.lock_or_recover().clone()
    }

    /// Persists a new access token. Blank input is a silent no-op: a valid
    /// token must never be clobbered by an empty one.
    pub fn set_access(&self, token: &str) -> AppResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(());
        }

        persist_access_token(&self.path, token)?;
        *self.cached.lock_or_recover() = Some(token.to_string());
        Ok(())
    }

    /// Removes all stored credentials. Idempotent.
    pub fn clear(&self) -> AppResult<()> {
        *self.cached.lock_or_recover() = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| format!("failed to clear session file: {e}"))?;
        }
        Ok(())
    }
}

fn load_access_token(path: &Path) -> AppResult<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read session file: {e}"))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse session file: {e}"))?;

    Ok(value
        .get(ACCESS_TOKEN_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string))
}

fn persist_access_token(path: &Path, token: &str) -> AppResult<()> {
    // Only the access token is written; any legacy refresh_token key in an
    // existing file is dropped by this full rewrite.
    let content = serde_json::to_vec_pretty(&serde_json::json!({ ACCESS_TOKEN_KEY: token }))
        .map_err(|e| format!("failed to serialize session file: {e}"))?;

    let tmp_path = path.with_file_name("session.json.tmp");
    let backup_path = path.with_file_name("session.json.bak");

    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("failed to write temp session file: {e}"))?;

    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }

    if path.exists() {
        std::fs::rename(path, &backup_path)
            .map_err(|e| format!("failed to create session backup: {e}"))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::rename(&backup_path, path);
        return Err(format!("failed to finalize session file: {e}").into());
    }

    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }

    Ok(())
}
