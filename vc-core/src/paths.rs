//! Working-directory resolution and on-disk layout. Spec §4.1 and §6.
//!
//! Grounded on the original `core/paths.py`: try each candidate in order,
//! first one that is writable (can create+remove a file) wins. The
//! resolver always succeeds — if nothing is writable it falls back to
//! `~/VideoCatalog` and proceeds without surfacing an error to callers.

use std::path::{Path, PathBuf};

use crate::model::safe_label;

/// Resolved, immutable working-directory layout. Constructed once at
/// startup and cloned into every component — no process-global state
/// (spec §9).
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub working_dir: PathBuf,
}

impl ResolvedPaths {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.working_dir.join("data")
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.data_dir().join("catalog.db")
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.data_dir().join("shards")
    }

    pub fn shard_db_path(&self, label: &str) -> PathBuf {
        self.shards_dir().join(format!("{}.db", safe_label(label)))
    }

    pub fn orchestrator_db_path(&self) -> PathBuf {
        self.data_dir().join("orchestrator.db")
    }

    pub fn web_metrics_db_path(&self) -> PathBuf {
        self.data_dir().join("web_metrics.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.working_dir.join("logs")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.working_dir.join("exports")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.working_dir.join("vectors")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.working_dir.join("settings.json")
    }

    pub fn settings_unknown_path(&self) -> PathBuf {
        self.logs_dir().join("settings_unknown.json")
    }

    pub fn testruns_dir(&self) -> PathBuf {
        self.exports_dir().join("testruns")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.exports_dir().join("backups")
    }

    /// Create every directory the layout needs, idempotently.
    pub fn ensure_structure(&self) -> std::io::Result<()> {
        for dir in [
            self.working_dir.clone(),
            self.data_dir(),
            self.shards_dir(),
            self.logs_dir(),
            self.exports_dir(),
            self.testruns_dir(),
            self.backups_dir(),
            self.vectors_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn expand(value: &str) -> PathBuf {
    let expanded = shellexpand::tilde(value);
    PathBuf::from(expanded.as_ref())
}

fn is_writable_dir(path: &Path) -> bool {
    if std::fs::create_dir_all(path).is_err() {
        return false;
    }
    let probe = path.join(format!(".write_test_{}", std::process::id()));
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn prepare(candidate: PathBuf) -> Option<PathBuf> {
    if !is_writable_dir(&candidate) {
        return None;
    }
    if std::fs::create_dir_all(candidate.join("data")).is_err() {
        return None;
    }
    Some(candidate)
}

/// Resolve the working directory per the order in spec §4.1:
/// 1. `VIDEOCATALOG_HOME`
/// 2. `working_dir`/`catalog_db` in a legacy settings file
/// 3. system-wide data directory
/// 4. local app-data directory
/// 5. `~/VideoCatalog`
pub fn resolve_working_dir() -> PathBuf {
    if let Ok(env_home) = std::env::var("VIDEOCATALOG_HOME") {
        if !env_home.trim().is_empty() {
            if let Some(prepared) = prepare(expand(&env_home)) {
                return prepared;
            }
        }
    }

    let program_data = std::env::var("ProgramData").ok().map(|v| expand(&v));

    let mut legacy_candidates = Vec::new();
    if let Some(pd) = &program_data {
        legacy_candidates.push(pd.join("VideoCatalog").join("settings.json"));
    }
    legacy_candidates.push(PathBuf::from("settings.json"));

    for legacy_path in legacy_candidates {
        if let Some(candidate) = read_legacy_working_dir(&legacy_path) {
            if let Some(prepared) = prepare(candidate) {
                return prepared;
            }
        }
    }

    if let Some(pd) = &program_data {
        if let Some(prepared) = prepare(pd.join("VideoCatalog")) {
            return prepared;
        }
    }

    let local_appdata = std::env::var("LOCALAPPDATA")
        .ok()
        .map(|v| expand(&v))
        .unwrap_or_else(|| home_dir().join(".videocatalog"));
    if let Some(prepared) = prepare(local_appdata.join("VideoCatalog")) {
        return prepared;
    }

    let fallback = home_dir().join("VideoCatalog");
    let _ = std::fs::create_dir_all(fallback.join("data"));
    fallback
}

fn read_legacy_working_dir(settings_path: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(settings_path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&contents).ok()?;
    if let Some(working_dir) = value.get("working_dir").and_then(|v| v.as_str()) {
        if !working_dir.trim().is_empty() {
            return Some(expand(working_dir));
        }
    }
    if let Some(catalog_db) = value.get("catalog_db").and_then(|v| v.as_str()) {
        if !catalog_db.trim().is_empty() {
            let catalog_path = expand(catalog_db);
            let parent = catalog_path.parent()?;
            if parent.file_name().map(|n| n.to_ascii_lowercase()) == Some("data".into()) {
                return parent.parent().map(Path::to_path_buf);
            }
            return Some(parent.to_path_buf());
        }
    }
    None
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Minimal `~` expansion so the crate does not need the `shellexpand`
/// dependency for a single call site.
mod shellexpand {
    use std::borrow::Cow;

    pub fn tilde(input: &str) -> Cow<'_, str> {
        if let Some(rest) = input.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return Cow::Owned(format!("{home}/{rest}"));
            }
        } else if input == "~" {
            if let Ok(home) = std::env::var("HOME") {
                return Cow::Owned(home);
            }
        }
        Cow::Borrowed(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_derive_from_working_dir() {
        let paths = ResolvedPaths::new(PathBuf::from("/tmp/vc-test-wd"));
        assert_eq!(
            paths.catalog_db_path(),
            PathBuf::from("/tmp/vc-test-wd/data/catalog.db")
        );
        assert_eq!(
            paths.shard_db_path("My Drive"),
            PathBuf::from("/tmp/vc-test-wd/data/shards/My_Drive.db")
        );
    }

    #[test]
    fn resolve_working_dir_honors_env_override() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("VIDEOCATALOG_HOME", dir.path());
        let resolved = resolve_working_dir();
        std::env::remove_var("VIDEOCATALOG_HOME");
        assert_eq!(resolved, dir.path());
        assert!(resolved.join("data").is_dir());
    }
}
