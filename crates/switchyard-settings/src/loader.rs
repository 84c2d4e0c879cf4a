//! Settings loading with deep merge, environment overrides and validation.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewayConfig::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `SWITCHYARD_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{GatewayConfig, TransportConfig};

/// Default settings file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "switchyard.json";

/// Resolve the settings path: explicit path, else `SWITCHYARD_CONFIG`, else
/// [`DEFAULT_CONFIG_FILE`].
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(
        || {
            read_env_string("SWITCHYARD_CONFIG")
                .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
        },
        Path::to_path_buf,
    )
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns (validated) defaults. If the file
/// contains invalid JSON or fails validation, returns an error.
pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig> {
    let defaults = serde_json::to_value(GatewayConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut config: GatewayConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Some(v) = read_env_string("SWITCHYARD_HOST") {
        config.host = v;
    }
    if let Some(v) = read_env_u16("SWITCHYARD_PORT", 1, 65535) {
        config.http_port = v;
    }
    if let Some(v) = read_env_string("SWITCHYARD_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = read_env_bool("SWITCHYARD_LOG_JSON") {
        config.log_json = v;
    }
    if let Some(v) = read_env_usize("SWITCHYARD_MAX_CONNECTIONS", 1, 100_000) {
        config.admission.max_connections = v;
    }
    if let Some(v) = read_env_u64("SWITCHYARD_REFRESH_INTERVAL_MS", 0, 86_400_000) {
        config.registry.refresh_interval_ms = v;
    }
    if let Some(token) = read_env_string("SWITCHYARD_AUTH_TOKEN") {
        config.auth.enabled = true;
        if !config.auth.tokens.contains(&token) {
            config.auth.tokens.push(token);
        }
    }
}

/// Check cross-field invariants that serde cannot express.
pub fn validate(config: &GatewayConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for upstream in &config.upstreams {
        let name = upstream.name.trim();
        if name.is_empty() {
            return invalid("upstream name must not be empty");
        }
        if !seen.insert(name) {
            return invalid(format!("duplicate upstream name `{name}`"));
        }
        match &upstream.transport {
            TransportConfig::Stdio(s) if s.command.trim().is_empty() => {
                return invalid(format!("upstream `{name}`: stdio command must not be empty"));
            }
            TransportConfig::Stdio(_) => {}
            TransportConfig::Ws(r) => {
                if !has_scheme(&r.url, &["ws://", "wss://", "http://", "https://"]) {
                    return invalid(format!("upstream `{name}`: invalid url `{}`", r.url));
                }
            }
            TransportConfig::Http(r) | TransportConfig::Sse(r) => {
                if !has_scheme(&r.url, &["http://", "https://"]) {
                    return invalid(format!("upstream `{name}`: invalid url `{}`", r.url));
                }
            }
        }
        let policy = &upstream.reconnect;
        if policy.factor < 1.0 || !policy.factor.is_finite() {
            return invalid(format!("upstream `{name}`: reconnect factor must be >= 1"));
        }
        if policy.initial_delay_ms > policy.max_delay_ms {
            return invalid(format!(
                "upstream `{name}`: initialDelayMs exceeds maxDelayMs"
            ));
        }
        if upstream.limits.max_concurrent_calls == Some(0) {
            return invalid(format!("upstream `{name}`: maxConcurrentCalls must be > 0"));
        }
    }

    let ratio = config.sessions.warning_ratio;
    if !(ratio > 0.0 && ratio < 1.0) {
        return invalid("sessions.warningRatio must be between 0 and 1");
    }
    if config.sessions.sweep_interval_ms == 0 || config.sessions.heartbeat_interval_ms == 0 {
        return invalid("session intervals must be > 0");
    }
    if config.sessions.channel_capacity == 0 {
        return invalid("sessions.channelCapacity must be > 0");
    }
    if config.auth.enabled && config.auth.tokens.is_empty() {
        return invalid("auth.enabled requires at least one token");
    }
    Ok(())
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    let lower = url.to_ascii_lowercase();
    schemes.iter().any(|s| lower.starts_with(s) && lower.len() > s.len())
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(SettingsError::InvalidValue(message.into()))
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UpstreamConfig;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::io::Write;

    fn write_config(value: &Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{value}").unwrap();
        file
    }

    // ── deep_merge ──

    #[test]
    fn merge_objects_recursively() {
        let merged = deep_merge(
            json!({"a": {"x": 1, "y": 2}, "b": 3}),
            json!({"a": {"y": 20}}),
        );
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20}, "b": 3}));
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(json!({"u": [1, 2, 3]}), json!({"u": [9]}));
        assert_eq!(merged, json!({"u": [9]}));
    }

    #[test]
    fn merge_skips_nulls() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null, "b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    // ── Loading ──

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.server_name, "switchyard");
        assert!(config.upstreams.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(&json!({
            "serverName": "edge",
            "admission": {"maxPerSource": 2},
            "upstreams": [{"name": "math", "transport": "stdio", "command": "math-server"}]
        }));
        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.server_name, "edge");
        assert_eq!(config.admission.max_per_source, 2);
        assert_eq!(config.admission.max_connections, 100);
        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.upstreams[0].namespace(), "math");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert_matches!(load_config_from_path(file.path()), Err(SettingsError::Json(_)));
    }

    // ── Validation ──

    #[test]
    fn duplicate_names_rejected() {
        let config = GatewayConfig {
            upstreams: vec![UpstreamConfig::stdio("a", "x"), UpstreamConfig::stdio("a", "y")],
            ..GatewayConfig::default()
        };
        assert_matches!(validate(&config), Err(SettingsError::InvalidValue(m)) if m.contains("duplicate"));
    }

    #[test]
    fn empty_command_rejected() {
        let config = GatewayConfig {
            upstreams: vec![UpstreamConfig::stdio("a", " ")],
            ..GatewayConfig::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn http_url_must_have_scheme() {
        let config = GatewayConfig {
            upstreams: vec![UpstreamConfig::http("h", "localhost:8080/mcp")],
            ..GatewayConfig::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn factor_below_one_rejected() {
        let mut u = UpstreamConfig::stdio("a", "x");
        u.reconnect.factor = 0.5;
        let config = GatewayConfig { upstreams: vec![u], ..GatewayConfig::default() };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn auth_without_tokens_rejected() {
        let mut config = GatewayConfig::default();
        config.auth.enabled = true;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&GatewayConfig::default()).is_ok());
    }

    // ── Parsing helpers ──

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
        assert_eq!(parse_usize_range("5", 1, 10), Some(5));
    }

    #[test]
    fn explicit_config_path_wins() {
        assert_eq!(config_path(Some(Path::new("/etc/sy.json"))), PathBuf::from("/etc/sy.json"));
    }
}
