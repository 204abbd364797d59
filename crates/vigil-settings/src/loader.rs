//! Settings loading: defaults, then the user file, then environment.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::VigilSettings;

/// Resolve the path to the settings file (`~/.vigil/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`VigilSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VigilSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `VIGIL_*` environment overrides to loaded settings.
///
/// Out-of-range or unparseable values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut VigilSettings) {
    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("VIGIL_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = read_env_url("VIGIL_WS_URL", &["ws", "wss"]) {
        settings.connection.ws_base_url = v;
    }
    if let Some(v) = read_env_u64("VIGIL_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.connection.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("VIGIL_RECONNECT_BASE_MS", 100, 60_000) {
        settings.connection.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("VIGIL_RECONNECT_MAX_MS", 1000, 600_000) {
        settings.connection.reconnect.max_delay_ms = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("VIGIL_MESSAGE_TTL_MS", 1000, 86_400_000) {
        settings.store.message_ttl_ms = v;
    }
    if let Some(v) = read_env_usize("VIGIL_MAX_MESSAGES", 1, 100_000) {
        settings.store.max_messages = v;
    }

    // ── Tracker ─────────────────────────────────────────────────────
    if let Some(v) = read_env_url("VIGIL_API_URL", &["http", "https"]) {
        settings.tracker.api_base_url = v;
    }
    if let Some(v) = read_env_u64("VIGIL_POLL_INTERVAL_MS", 100, 600_000) {
        settings.tracker.poll_interval_ms = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Accept a base URL whose scheme is one of `schemes`, trailing `/` removed.
pub fn parse_base_url(val: &str, schemes: &[&str]) -> Option<String> {
    let trimmed = val.trim().trim_end_matches('/');
    let (scheme, rest) = trimmed.split_once("://")?;
    let scheme_ok = schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme));
    (scheme_ok && !rest.is_empty()).then(|| trimmed.to_string())
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

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, min, max, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, min, max, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_url(name: &str, schemes: &[&str]) -> Option<String> {
    let val = read_env_string(name)?;
    let result = parse_base_url(&val, schemes);
    if result.is_none() {
        warn!(key = name, value = %val, ?schemes, "invalid URL env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn write_settings(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"store": {"maxMessages": 100, "messageTtlMs": 300_000}});
        let source = serde_json::json!({"store": {"maxMessages": 20}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["store"]["maxMessages"], 20);
        assert_eq!(merged["store"]["messageTtlMs"], 300_000);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let merged = deep_merge(target, serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replaces() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let merged = deep_merge(target, serde_json::json!({"items": [4]}));
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let merged = deep_merge(target, serde_json::json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    #[test]
    fn merge_empty_source_is_identity() {
        let target = serde_json::json!({"a": 1, "b": {"c": 2}});
        let merged = deep_merge(target.clone(), serde_json::json!({}));
        assert_eq!(merged, target);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.store.max_messages, 100);
        assert_eq!(settings.tracker.poll_interval_ms, 2000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let (_dir, path) = write_settings(
            r#"{"connection": {"wsBaseUrl": "wss://vigil.example"}, "store": {"maxMessages": 25}}"#,
        );
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.connection.ws_base_url, "wss://vigil.example");
        assert_eq!(settings.store.max_messages, 25);
        assert_eq!(settings.connection.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn load_nested_reconnect_policy() {
        let (_dir, path) = write_settings(r#"{"connection": {"reconnect": {"maxDelayMs": 5000}}}"#);
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.connection.reconnect.max_delay_ms, 5000);
        assert_eq!(settings.connection.reconnect.base_delay_ms, 1000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let (_dir, path) = write_settings("not valid json");
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_zero_capacity_fails_validation() {
        let (_dir, path) = write_settings(r#"{"store": {"maxMessages": 0}}"#);
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn load_zero_timer_intervals_fail_validation() {
        for content in [
            r#"{"store": {"sweepIntervalMs": 0}}"#,
            r#"{"connection": {"livenessCheckIntervalMs": 0}}"#,
            r#"{"store": {"messageTtlMs": 18446744073709551615}}"#,
        ] {
            let (_dir, path) = write_settings(content);
            assert_matches!(
                load_settings_from_path(&path),
                Err(SettingsError::InvalidValue(_)),
                "accepted {content}"
            );
        }
    }

    #[test]
    fn settings_path_ends_in_vigil_dir() {
        let path = settings_path();
        assert!(path.ends_with(".vigil/settings.json"));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "on", "TRUE", " On "] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "off", "No"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("1000", 1000, 600_000), Some(1000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("700000", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("50", 1, 100_000), Some(50));
        assert_eq!(parse_usize_range("0", 1, 100_000), None);
        assert_eq!(parse_usize_range("-3", 1, 100_000), None);
    }

    #[test]
    fn parse_base_url_checks_scheme() {
        assert_eq!(
            parse_base_url("wss://vigil.example/", &["ws", "wss"]),
            Some("wss://vigil.example".to_string())
        );
        assert_eq!(parse_base_url("http://vigil.example", &["ws", "wss"]), None);
        assert_eq!(parse_base_url("ws://", &["ws"]), None);
        assert_eq!(parse_base_url("vigil.example", &["http"]), None);
    }
}
