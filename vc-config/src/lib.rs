//! Typed configuration and CLI argument handling for the VideoCatalog
//! service, layered on [`vc_core::settings`].

pub mod cli;
pub mod loader;
pub mod model;

pub use cli::Args;
pub use loader::{ConfigLoad, ConfigLoadError, ConfigOverrides};
pub use model::Settings;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_resolved_home_produces_defaults_in_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides::default();
        let load = loader::load_from_resolved_home(Some(dir.path()), &overrides).unwrap();
        assert_eq!(load.settings.api.port, 8080);
        assert!(load.unknown_keys.is_empty());
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn cli_overrides_take_priority_over_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides {
            host: Some("127.0.0.1".to_string()),
            port: Some(9090),
            api_key: Some("secret".to_string()),
        };
        let load = loader::load_from_resolved_home(Some(dir.path()), &overrides).unwrap();
        assert_eq!(load.settings.api.host, "127.0.0.1");
        assert_eq!(load.settings.api.port, 9090);
        assert_eq!(load.settings.api.api_key.as_deref(), Some("secret"));
    }
}
