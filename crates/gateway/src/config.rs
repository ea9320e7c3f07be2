use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_bind: String,
    /// HS256 secret shared with the auth collaborator that issues session tokens.
    pub auth_secret: String,
    /// When set, `POST /events` requires a matching `x-gateway-key` header.
    pub publish_key: Option<String>,
    pub call_token_api_key: String,
    pub call_token_api_secret: String,
    pub call_token_ttl_seconds: i64,
    pub session_queue_capacity: usize,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            auth_secret: "dev-auth-secret".into(),
            publish_key: None,
            call_token_api_key: "devkey".into(),
            call_token_api_secret: "devsecret".into(),
            call_token_ttl_seconds: 3600,
            session_queue_capacity: 256,
            max_body_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    auth_secret: Option<String>,
    publish_key: Option<String>,
    call_token_api_key: Option<String>,
    call_token_api_secret: Option<String>,
    call_token_ttl_seconds: Option<i64>,
    session_queue_capacity: Option<usize>,
    max_body_bytes: Option<usize>,
}

/// Defaults, then `gateway.toml` when present, then environment variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    if Path::new(DEFAULT_CONFIG_FILE).exists() {
        let raw = fs::read_to_string(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("failed to read {DEFAULT_CONFIG_FILE}"))?;
        apply_file(&mut settings, &raw)?;
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw).context("invalid gateway config file")?;

    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.auth_secret {
        settings.auth_secret = v;
    }
    if let Some(v) = file_cfg.publish_key {
        settings.publish_key = Some(v);
    }
    if let Some(v) = file_cfg.call_token_api_key {
        settings.call_token_api_key = v;
    }
    if let Some(v) = file_cfg.call_token_api_secret {
        settings.call_token_api_secret = v;
    }
    if let Some(v) = file_cfg.call_token_ttl_seconds {
        settings.call_token_ttl_seconds = v;
    }
    if let Some(v) = file_cfg.session_queue_capacity {
        settings.session_queue_capacity = v.max(1);
    }
    if let Some(v) = file_cfg.max_body_bytes {
        settings.max_body_bytes = v;
    }
    Ok(())
}

pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("GATEWAY_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = lookup("APP__AUTH_SECRET") {
        settings.auth_secret = v;
    }

    if let Some(v) = lookup("APP__PUBLISH_KEY") {
        settings.publish_key = Some(v).filter(|key| !key.trim().is_empty());
    }

    if let Some(v) = lookup("APP__CALL_TOKEN_API_KEY") {
        settings.call_token_api_key = v;
    }
    if let Some(v) = lookup("APP__CALL_TOKEN_API_SECRET") {
        settings.call_token_api_secret = v;
    }

    if let Some(v) = lookup("APP__CALL_TOKEN_TTL_SECONDS") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.call_token_ttl_seconds = parsed;
        }
    }
    if let Some(v) = lookup("APP__SESSION_QUEUE_CAPACITY") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.session_queue_capacity = parsed.max(1);
        }
    }
    if let Some(v) = lookup("APP__MAX_BODY_BYTES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_body_bytes = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
