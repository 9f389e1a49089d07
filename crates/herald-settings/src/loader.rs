//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HeraldSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use herald_core::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::HeraldSettings;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "HERALD_SETTINGS";

/// Resolve the settings file path.
///
/// `HERALD_SETTINGS` wins; otherwise `~/.herald/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os(SETTINGS_PATH_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
fn load_file_layer(path: &Path) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut HeraldSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Anything else is logged
/// and ignored, leaving the file/default value in place.
pub fn apply_overrides_from<F>(settings: &mut HeraldSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("HERALD_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Liveness ────────────────────────────────────────────────────
    if let Some(v) = env.u64("HERALD_PROBE_INTERVAL", 1, 3600) {
        settings.liveness.probe_interval_secs = v;
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_CHANNEL") {
        settings.relay.channel = v;
    }
    if let Some(v) = env.string("REDIS_URL") {
        settings.relay.redis_url = Some(v);
    }

    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = env.string("DATABASE_URL") {
        settings.database.url = Some(v);
    }
    if let Some(v) = env.u32("DB_POOL_SIZE", 0, 1000) {
        settings.database.pool_size = v;
    }
    if let Some(v) = env.u32("DB_MAX_CONNECTIONS", 1, 1000) {
        settings.database.max_connections = v;
    }

    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = env.bool("HERALD_CACHE_ENABLED") {
        settings.cache.enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("HERALD_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => tracing::warn!(key = "HERALD_LOG_FORMAT", value = %v, error = %e, "ignoring"),
        }
    }
}

/// Reject combinations that cannot work at runtime.
pub fn validate(settings: &HeraldSettings) -> Result<()> {
    if settings.liveness.probe_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "liveness.probeIntervalSecs must be at least 1".to_string(),
        ));
    }
    if settings.server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueueCapacity must be at least 1".to_string(),
        ));
    }
    if settings.relay.outbox_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "relay.outboxCapacity must be at least 1".to_string(),
        ));
    }
    if settings.relay.channel.is_empty() {
        return Err(SettingsError::InvalidValue(
            "relay.channel must not be empty".to_string(),
        ));
    }
    if settings.database.pool_size > settings.database.max_connections {
        return Err(SettingsError::InvalidValue(format!(
            "database.poolSize ({}) exceeds database.maxConnections ({})",
            settings.database.pool_size, settings.database.max_connections
        )));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = (self.lookup)(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
