//! Compose [`vc_core::settings`] with environment and CLI overrides into
//! a typed [`Settings`] value, layering file → env → CLI in that order.

use std::path::Path;

use tracing::warn;

use vc_core::paths::ResolvedPaths;
use vc_core::settings::{load_settings, persist_unknown_keys, LoadedSettings};

use crate::model::Settings;

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
}

impl ConfigOverrides {
    /// Environment overrides named in spec §6: `VIDEOCATALOG_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            host: None,
            port: None,
            api_key: std::env::var("VIDEOCATALOG_API_KEY").ok(),
        }
    }

    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(host) = &self.host {
            settings.api.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.api.port = port;
        }
        if let Some(api_key) = &self.api_key {
            settings.api.api_key = Some(api_key.clone());
        }
        settings
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub settings: Settings,
    pub paths: ResolvedPaths,
    pub unknown_keys: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("settings.json failed schema validation: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Load the merged settings document from `paths.settings_path()`,
/// overlay `overrides`, and produce a fully typed [`Settings`]. Unknown
/// top-level keys are persisted to `logs/settings_unknown.json` and also
/// returned for the caller to report (e.g. at `/v1/diagnostics/preflight`).
pub fn load(paths: &ResolvedPaths, overrides: &ConfigOverrides) -> Result<ConfigLoad, ConfigLoadError> {
    let LoadedSettings {
        document,
        unknown_keys,
    } = load_settings(&paths.settings_path());

    if !unknown_keys.is_empty() {
        warn!(keys = ?unknown_keys, "settings.json has unrecognized top-level keys");
        persist_unknown_keys(
            &paths.logs_dir(),
            &LoadedSettings {
                document: document.clone(),
                unknown_keys: unknown_keys.clone(),
            },
        );
    }

    let settings = Settings::from_merged(&document)?;
    let settings = overrides.apply(settings);

    Ok(ConfigLoad {
        settings,
        paths: paths.clone(),
        unknown_keys,
    })
}

/// Convenience wrapper used by `main`: resolve the working directory
/// (honoring an explicit `--working-dir` override), ensure its
/// structure, then load settings from it.
pub fn load_from_resolved_home(
    working_dir_override: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ConfigLoad, ConfigLoadError> {
    let working_dir = match working_dir_override {
        Some(dir) => dir.to_path_buf(),
        None => vc_core::paths::resolve_working_dir(),
    };
    let paths = ResolvedPaths::new(working_dir);
    if let Err(err) = paths.ensure_structure() {
        warn!(error = %err, "failed to create full working-directory structure");
    }
    load(&paths, overrides)
}
