//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HostlinkSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `HOSTLINK_*` environment variable overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::HostlinkSettings;

/// Resolve the default settings path (`~/.hostlink/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".hostlink").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HostlinkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HostlinkSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<HostlinkSettings> {
    let defaults = serde_json::to_value(HostlinkSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HostlinkSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
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

/// Apply `HOSTLINK_*` overrides read through `env`.
///
/// Invalid values are logged and ignored.
fn apply_overrides(settings: &mut HostlinkSettings, env: impl Fn(&str) -> Option<String>) {
    let env = EnvReader(env);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.read_string("HOSTLINK_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.read_u16("HOSTLINK_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.read_string("HOSTLINK_BASE_PATH") {
        settings.server.base_path = v;
    }
    if let Some(v) = env.read_u64("HOSTLINK_KEEP_ALIVE_SECS", 1, 3600) {
        settings.server.keep_alive_secs = v;
    }

    // ── Host ────────────────────────────────────────────────────────
    if let Some(v) = env.read_u64("HOSTLINK_TICK_MS", 1, 10_000) {
        settings.host.tick_interval_ms = v;
    }
    if let Some(v) = env.read_usize("HOSTLINK_QUEUE_CAPACITY", 0, 1_000_000) {
        settings.host.queue_capacity = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.read_string("HOSTLINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.read_bool("HOSTLINK_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.read_bool("HOSTLINK_HOST_CONSOLE") {
        settings.logging.host_console = v;
    }
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

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn read_string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.0)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid {kind} env var, ignoring");
        }
        result
    }

    fn read_bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "boolean", parse_bool)
    }

    fn read_u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn read_u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn read_usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8888, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings.server.port, 8888);
        assert_eq!(settings.server.base_path, "/api");
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "host": {"queueCapacity": 32}}"#,
        )
        .unwrap();

        let settings = load_with(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.base_path, "/api");
        assert_eq!(settings.host.queue_capacity, 32);
        assert_eq!(settings.host.tick_interval_ms, 16);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_with(&path, no_env);
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_invalid_value_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"basePath": "api"}}"#).unwrap();

        let result = load_with(&path, no_env);
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9090}}"#).unwrap();

        let env = env_of(&[
            ("HOSTLINK_PORT", "7000"),
            ("HOSTLINK_TICK_MS", "5"),
            ("HOSTLINK_LOG_JSON", "yes"),
            ("HOSTLINK_HOST_CONSOLE", "off"),
        ]);
        let settings = load_with(&path, env).unwrap();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.host.tick_interval_ms, 5);
        assert!(settings.logging.json);
        assert!(!settings.logging.host_console);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let env = env_of(&[
            ("HOSTLINK_PORT", "99999"),
            ("HOSTLINK_TICK_MS", "0"),
            ("HOSTLINK_LOG_JSON", "maybe"),
            ("HOSTLINK_HOST", ""),
        ]);
        let settings = load_with(Path::new("/nonexistent/settings.json"), env).unwrap();
        assert_eq!(settings.server.port, 8888);
        assert_eq!(settings.host.tick_interval_ms, 16);
        assert!(!settings.logging.json);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8888", 1, 65535), Some(8888));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
        assert_eq!(parse_usize_range("10", 0, 10), Some(10));
        assert_eq!(parse_usize_range("11", 0, 10), None);
    }
}
