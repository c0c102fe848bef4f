//! Usage: Persisted client configuration (schema + read/write helpers).

use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 2;
const SCHEMA_VERSION_ADD_REQUEST_TIMEOUT: u32 = 2;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u32 = 30;
const MAX_REQUEST_TIMEOUT_SECONDS: u32 = 10 * 60;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub schema_version: u32,
    /// Origin + prefix of the remote LMS REST API. No trailing slash.
    pub base_url: String,
    pub request_timeout_seconds: u32,
    /// Overrides where session state is kept. `None` means the caller's
    /// platform default.
    pub data_dir: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            data_dir: None,
        }
    }
}

fn sanitize_data_dir(config: &mut ClientConfig) -> bool {
    let sanitized = config
        .data_dir
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    if sanitized == config.data_dir {
        return false;
    }
    config.data_dir = sanitized;
    true
}

fn sanitize_base_url(config: &mut ClientConfig) -> bool {
    let trimmed = config.base_url.trim().trim_end_matches('/');
    if trimmed == config.base_url {
        return false;
    }
    config.base_url = trimmed.to_string();
    true
}

fn sanitize_request_timeout(config: &mut ClientConfig) -> bool {
    let mut changed = false;

    if config.request_timeout_seconds == 0 {
        config.request_timeout_seconds = DEFAULT_REQUEST_TIMEOUT_SECONDS;
        changed = true;
    }
    if config.request_timeout_seconds > MAX_REQUEST_TIMEOUT_SECONDS {
        config.request_timeout_seconds = MAX_REQUEST_TIMEOUT_SECONDS;
        changed = true;
    }

    changed
}

/// Schema migration for versions that only bump `schema_version`.
/// Returns `true` if the settings were modified.
fn migrate_bump_schema_version(
    config: &mut ClientConfig,
    schema_version_present: bool,
    target_version: u32,
) -> bool {
    if schema_version_present && config.schema_version >= target_version {
        return false;
    }

    let mut changed = false;

    // If schema_version is missing, force a write to persist it so we don't
    // keep "migrating" on every startup.
    if !schema_version_present {
        changed = true;
    }

    if config.schema_version != target_version {
        config.schema_version = target_version;
        changed = true;
    }

    changed
}

fn migrate_add_request_timeout(config: &mut ClientConfig, schema_version_present: bool) -> bool {
    // v2: request_timeout_seconds added (default 30).
    migrate_bump_schema_version(
        config,
        schema_version_present,
        SCHEMA_VERSION_ADD_REQUEST_TIMEOUT,
    )
}

fn parse_config_json(content: &str) -> AppResult<(ClientConfig, bool)> {
    let raw: serde_json::Value =
        serde_json::from_str(content).map_err(|e| format!("failed to parse config.json: {e}"))?;
    let schema_version_present = raw.get("schema_version").is_some();
    let config: ClientConfig =
        serde_json::from_value(raw).map_err(|e| format!("failed to parse config.json: {e}"))?;
    Ok((config, schema_version_present))
}

pub fn read(path: &Path) -> AppResult<ClientConfig> {
    if !path.exists() {
        let config = ClientConfig::default();
        // Best-effort: create config.json on first read so it is discoverable.
        let _ = write(path, &config);
        return Ok(config);
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {e}"))?;
    let (mut config, schema_version_present) = parse_config_json(&content)?;

    if config.base_url.trim().is_empty() {
        return Err("SEC_INVALID_INPUT: invalid config.json: base_url is required"
            .to_string()
            .into());
    }

    let mut repaired = false;
    repaired |= migrate_add_request_timeout(&mut config, schema_version_present);
    repaired |= sanitize_base_url(&mut config);
    repaired |= sanitize_request_timeout(&mut config);
    repaired |= sanitize_data_dir(&mut config);
    if repaired {
        // Best-effort: persist repaired values while keeping read semantics.
        let _ = write(path, &config);
    }

    Ok(config)
}

pub fn write(path: &Path, config: &ClientConfig) -> AppResult<()> {
    if config.base_url.trim().is_empty() {
        return Err("SEC_INVALID_INPUT: base_url is required".into());
    }
    if config.request_timeout_seconds == 0 {
        return Err("SEC_INVALID_INPUT: request_timeout_seconds must be >= 1".into());
    }
    if config.request_timeout_seconds > MAX_REQUEST_TIMEOUT_SECONDS {
        return Err(format!(
            "SEC_INVALID_INPUT: request_timeout_seconds must be <= {MAX_REQUEST_TIMEOUT_SECONDS}"
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_file_name("config.json.tmp");
    let backup_path = path.with_file_name("config.json.bak");

    let content = serde_json::to_vec_pretty(config)
        .map_err(|e| format!("failed to serialize config: {e}"))?;

    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("failed to write temp config file: {e}"))?;

    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }

    if path.exists() {
        std::fs::rename(path, &backup_path)
            .map_err(|e| format!("failed to create config backup: {e}"))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::rename(&backup_path, path);
        return Err(format!("failed to finalize config: {e}").into());
    }

    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }

    Ok(())
}
