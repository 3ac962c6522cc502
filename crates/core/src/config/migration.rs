//! Versioned upgrades for raw configuration documents.
//!
//! Schema 0 is the legacy flat layout: durations in seconds or minutes,
//! screenshot settings prefixed with `screenshot_`, the crop rectangle as a
//! string. Schema 1 is the current [`AppConfig`](super::AppConfig) layout.
//! Documents without a `schema_version` are treated as schema 0 when they
//! carry any legacy key, otherwise as current.

use serde_json::{Map, Value};

use super::{ConfigError, SCHEMA_VERSION};

/// Keys that only exist in schema 0.
const LEGACY_KEYS: &[&str] = &[
    "request_timeout",
    "retry_delay",
    "cache_expire_time",
    "max_cache_size",
    "screenshot_wait_time",
    "enable_screenshot",
    "screenshot_quality",
    "screenshot_width",
    "screenshot_height",
    "screenshot_full_page",
    "screenshot_format",
    "enable_crop",
    "crop_area",
    "allowed_domains",
    "blocked_domains",
    "enable_no_protocol_url",
    "send_content_type",
    "extract_types",
];

/// Upgrade a raw document to the current schema.
///
/// # Errors
///
/// Returns `ConfigError::UnsupportedVersion` for versions newer than this
/// build understands, and `ConfigError::LoadFailed` when the document is not
/// a table.
pub fn migrate(document: Value) -> Result<Value, ConfigError> {
    let mut table = match document {
        Value::Object(table) => table,
        Value::Null => Map::new(),
        other => return Err(ConfigError::LoadFailed(format!("expected a table, found {other}"))),
    };

    let mut version = detect_version(&table)?;
    while version < SCHEMA_VERSION {
        table = match version {
            0 => v0_to_v1(table),
            _ => return Err(ConfigError::UnsupportedVersion(version)),
        };
        version += 1;
        tracing::info!(version, "Migrated configuration document");
    }

    table.insert("schema_version".into(), Value::from(SCHEMA_VERSION));
    Ok(Value::Object(table))
}

fn detect_version(table: &Map<String, Value>) -> Result<u32, ConfigError> {
    match table.get("schema_version") {
        Some(value) => {
            let version = value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| ConfigError::Invalid {
                    field: "schema_version".into(),
                    reason: format!("not an integer: {value}"),
                })?;
            let version =
                u32::try_from(version).map_err(|_| ConfigError::UnsupportedVersion(u32::MAX))?;
            if version > SCHEMA_VERSION {
                return Err(ConfigError::UnsupportedVersion(version));
            }
            Ok(version)
        }
        None if LEGACY_KEYS.iter().any(|key| table.contains_key(*key)) => Ok(0),
        None => Ok(SCHEMA_VERSION),
    }
}

fn v0_to_v1(mut old: Map<String, Value>) -> Map<String, Value> {
    let mut screenshot = match old.remove("screenshot") {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };

    scale(&mut old, "request_timeout", "timeout_ms", 1_000);
    scale(&mut old, "retry_delay", "retry_delay_ms", 1_000);
    scale(&mut old, "cache_expire_time", "cache_ttl_minutes", 1);
    rename(&mut old, "max_cache_size", "cache_max_size");
    rename(&mut old, "enable_no_protocol_url", "allow_protocolless_urls");
    rename(&mut old, "send_content_type", "content_mode");

    for (from, to) in [
        ("allowed_domains", "allowlist_domains"),
        ("blocked_domains", "denylist_domains"),
        ("extract_types", "specific_extraction"),
    ] {
        if let Some(value) = old.remove(from) {
            old.insert(to.into(), split_list(value));
        }
    }

    if let Some(wait) = old.remove("screenshot_wait_time") {
        screenshot.insert("wait_ms".into(), wait);
    }
    for (from, to) in [
        ("enable_screenshot", "enabled"),
        ("screenshot_quality", "quality"),
        ("screenshot_width", "width"),
        ("screenshot_height", "height"),
        ("screenshot_full_page", "full_page"),
        ("screenshot_format", "format"),
    ] {
        if let Some(value) = old.remove(from) {
            screenshot.insert(to.into(), value);
        }
    }

    let crop_enabled = old.remove("enable_crop").and_then(|v| v.as_bool()).unwrap_or(false);
    if let Some(area) = old.remove("crop_area")
        && crop_enabled
    {
        match parse_crop(&area) {
            Some(rect) => {
                screenshot.insert("crop".into(), Value::from(rect.to_vec()));
            }
            None => tracing::warn!(%area, "Ignoring malformed legacy crop_area"),
        }
    }

    if !screenshot.is_empty() {
        old.insert("screenshot".into(), Value::Object(screenshot));
    }
    old
}

fn rename(table: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = table.remove(from) {
        table.insert(to.into(), value);
    }
}

fn scale(table: &mut Map<String, Value>, from: &str, to: &str, factor: u64) {
    let Some(value) = table.remove(from) else { return };
    let scaled = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));

    match scaled {
        Some(n) => {
            table.insert(to.into(), Value::from(n.saturating_mul(factor)));
        }
        None => tracing::warn!(key = from, %value, "Ignoring non-numeric legacy value"),
    }
}

/// Legacy lists were newline or comma separated strings.
fn split_list(value: Value) -> Value {
    match value {
        Value::String(s) => Value::from(
            s.split([',', '\n'])
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
        ),
        other => other,
    }
}

fn parse_crop(value: &Value) -> Option<[u32; 4]> {
    let numbers: Vec<u32> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_u64())
            .filter_map(|v| u32::try_from(v).ok())
            .collect(),
        Value::String(s) => s
            .trim_matches(|c| c == '[' || c == ']' || char::is_whitespace(c))
            .split(',')
            .map(|part| part.trim().parse().ok())
            .collect::<Option<Vec<u32>>>()?,
        _ => return None,
    };

    <[u32; 4]>::try_from(numbers).ok()
}
