//! `settings.json` loading: deep-merge over built-in defaults, version
//! migrations, and unknown-key retention. Spec §4.1, §6.

use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::warn;

pub const SETTINGS_VERSION: i64 = 1;

/// Built-in default settings tree covering the keys named in spec §6.
pub fn default_settings() -> Value {
    json!({
        "version": SETTINGS_VERSION,
        "api": {
            "host": "127.0.0.1",
            "port": 8080,
            "api_key": null,
            "cors_origins": [],
            "default_limit": 100,
            "max_page_size": 500,
        },
        "server": {
            "host": "0.0.0.0",
            "lan_refuse": true,
        },
        "orchestrator": {
            "enable": true,
            "poll_ms": 1000,
            "concurrency": { "heavy_ai_gpu": 1, "light_cpu": 2, "io_light": 2 },
            "backoff": { "base_s": 2, "max_s": 300 },
            "lease_ttl_s": 120,
            "heartbeat_s": 5,
            "gpu": { "hard_requirement": false, "safety_margin_mb": 512 },
        },
        "assistant": {
            "enable": false,
            "runtime": "ollama",
            "model": null,
            "ctx": 8192,
            "temperature": 0.2,
            "tools_enabled": true,
            "tool_budget": 8,
            "rag": {
                "enable": true,
                "top_k": 8,
                "min_score": 0.2,
                "embed_model": null,
                "index": "catalog",
                "refresh_on_start": false,
            },
        },
        "gpu": {
            "policy": "AUTO",
            "allow_hwaccel_video": true,
            "min_free_vram_mb": 8192,
            "max_gpu_workers": 1,
        },
        "diagnostics": {
            "enable": true,
            "gpu_hard_requirement": false,
            "smoke_timeouts_s": { "default": 10, "gpu": 30 },
            "sample_sizes": { "default": 25 },
            "logs_keep_days": 14,
        },
    })
}

/// Deep-merge `override_doc` onto `base`, object-by-object; scalars and
/// arrays in `override_doc` replace the base value outright.
pub fn deep_merge(base: &mut Value, override_doc: &Value) {
    match (base, override_doc) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, value) => {
            *base_slot = value.clone();
        }
    }
}

/// Recognized top-level keys; anything else is logged to
/// `logs/settings_unknown.json` but retained in the merged document.
const RECOGNIZED_TOP_LEVEL_KEYS: &[&str] = &[
    "version",
    "api",
    "server",
    "orchestrator",
    "assistant",
    "gpu",
    "diagnostics",
    "working_dir",
    "catalog_db",
];

#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub document: Value,
    pub unknown_keys: Vec<String>,
}

/// Load `settings.json` (if present), apply migrations, and deep-merge
/// onto the built-in defaults. Never fails: a missing or corrupt file
/// yields the default tree, matching the resolver's always-succeeds
/// contract.
pub fn load_settings(settings_path: &Path) -> LoadedSettings {
    let mut merged = default_settings();
    let mut unknown_keys = Vec::new();

    if let Ok(contents) = std::fs::read_to_string(settings_path) {
        match serde_json::from_str::<Value>(&contents) {
            Ok(mut doc) => {
                migrate(&mut doc);
                if let Value::Object(map) = &doc {
                    unknown_keys = unrecognized_keys(map);
                }
                deep_merge(&mut merged, &doc);
            }
            Err(err) => {
                warn!(error = %err, path = %settings_path.display(), "failed to parse settings.json, using defaults");
            }
        }
    }

    LoadedSettings {
        document: merged,
        unknown_keys,
    }
}

fn unrecognized_keys(map: &Map<String, Value>) -> Vec<String> {
    map.keys()
        .filter(|k| !RECOGNIZED_TOP_LEVEL_KEYS.contains(&k.as_str()))
        .cloned()
        .collect()
}

/// Write any unrecognized keys to `logs/settings_unknown.json`, per
/// spec §4.1. Best-effort: failures are logged, never propagated.
pub fn persist_unknown_keys(logs_dir: &Path, settings: &LoadedSettings) {
    if settings.unknown_keys.is_empty() {
        return;
    }
    let path = logs_dir.join("settings_unknown.json");
    let payload = json!({ "unknown_keys": settings.unknown_keys });
    if let Err(err) = std::fs::write(&path, serde_json::to_vec_pretty(&payload).unwrap_or_default())
    {
        warn!(error = %err, path = %path.display(), "failed to persist settings_unknown.json");
    }
}

/// Each migration is a pure function of the previous document; `version`
/// is bumped monotonically. Only one migration exists today (there is
/// no version 0 in this port) but the shape matches the original's
/// `upgrade_db.py`-style incremental approach.
fn migrate(doc: &mut Value) {
    let current_version = doc.get("version").and_then(|v| v.as_i64()).unwrap_or(0);
    if current_version < SETTINGS_VERSION {
        if let Value::Object(map) = doc {
            map.insert("version".to_string(), json!(SETTINGS_VERSION));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overrides_nested_scalars_only() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let override_doc = json!({"a": {"x": 10}});
        deep_merge(&mut base, &override_doc);
        assert_eq!(base, json!({"a": {"x": 10, "y": 2}, "b": 3}));
    }

    #[test]
    fn load_settings_falls_back_to_defaults_when_missing() {
        let loaded = load_settings(Path::new("/nonexistent/settings.json"));
        assert_eq!(
            loaded.document["api"]["default_limit"],
            json!(100)
        );
        assert!(loaded.unknown_keys.is_empty());
    }

    #[test]
    fn load_settings_retains_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"version": 1, "mystery_key": 42}"#).unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.unknown_keys, vec!["mystery_key".to_string()]);
        assert_eq!(loaded.document["mystery_key"], json!(42));
    }
}
