//! Entities the core owns or reads. See spec §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drive {
    pub label: String,
    #[serde(rename = "type")]
    pub drive_type: Option<String>,
    pub last_scan_utc: Option<DateTime<Utc>>,
    pub shard_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Video,
    Audio,
    Image,
    Document,
    Archive,
    Executable,
    Other,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "image" => Some(Self::Image),
            "document" => Some(Self::Document),
            "archive" => Some(Self::Archive),
            "executable" => Some(Self::Executable),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRow {
    pub path: String,
    pub size_bytes: i64,
    pub mtime_utc: DateTime<Utc>,
    pub ext: Option<String>,
    pub mime: Option<String>,
    pub category: Option<Category>,
    pub drive_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Image,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVectorMeta {
    pub path: String,
    pub kind: VectorKind,
    pub dim: i64,
    pub frames_used: i64,
    pub updated_utc: DateTime<Utc>,
}

/// A single catalog change notification. Wire-identical to the JSON in
/// spec §6 ("Event JSON").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub seq: i64,
    pub ts_utc: DateTime<Utc>,
    pub kind: String,
    pub payload: BTreeMap<String, Value>,
}

impl CatalogEvent {
    /// Identifier used for coalescing, per spec §4.5: first of
    /// `payload.path | item_id | id | doc_id | series_id | seq`.
    pub fn coalesce_identifier(&self) -> String {
        for key in ["path", "item_id", "id", "doc_id", "series_id"] {
            if let Some(v) = self.payload.get(key) {
                if let Some(s) = v.as_str() {
                    return s.to_string();
                }
                return v.to_string();
            }
        }
        self.seq.to_string()
    }

    pub fn coalesce_key(&self) -> String {
        format!("{}:{}", self.kind, self.coalesce_identifier())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorsPendingEntry {
    pub doc_id: String,
    pub kind: String,
    pub ts_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    HeavyAiGpu,
    LightCpu,
    IoLight,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::HeavyAiGpu => "heavy_ai_gpu",
            ResourceClass::LightCpu => "light_cpu",
            ResourceClass::IoLight => "io_light",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "heavy_ai_gpu" => Some(Self::HeavyAiGpu),
            "light_cpu" => Some(Self::LightCpu),
            "io_light" => Some(Self::IoLight),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Leased,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "leased" => Some(Self::Leased),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: String,
    pub payload: Value,
    pub priority: i64,
    pub resource: ResourceClass,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub lease_owner: Option<String>,
    pub lease_utc: Option<DateTime<Utc>>,
    pub heartbeat_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub started_utc: Option<DateTime<Utc>>,
    pub ended_utc: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job_id: i64,
    pub ckpt_json: Value,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub name: String,
    pub owner: Option<String>,
    pub lease_utc: Option<DateTime<Utc>>,
    pub ttl_sec: i64,
}

/// Filesystem-safe shard label: alphanumerics, `_`, `-`; anything else
/// becomes `_`; empty input becomes `"drive"`. Spec §3.
pub fn safe_label(label: &str) -> String {
    let trimmed = label.trim();
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "drive".to_string()
    } else {
        out
    }
}

/// Lowercased last path segment, splitting on `/` after normalizing `\`
/// to `/`. Registered as the SQL function `BASENAME` by the database
/// layer (spec §4.2).
pub fn basename(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Normalize a `since` timestamp to `...Z` suffix form, accepting input
/// with or without a trailing `Z` (spec §4.4).
pub fn normalize_since(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let with_z = format!("{trimmed}Z");
    DateTime::parse_from_rfc3339(&with_z)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_label_replaces_unsafe_chars() {
        assert_eq!(safe_label("My Drive #1"), "My_Drive__1");
        assert_eq!(safe_label("   "), "drive");
        assert_eq!(safe_label(""), "drive");
        assert_eq!(safe_label("backup-2024_01"), "backup-2024_01");
    }

    #[test]
    fn basename_normalizes_separators() {
        assert_eq!(basename(r"C:\Movies\Foo.MKV"), "foo.mkv");
        assert_eq!(basename("/mnt/a/b/C.mp4"), "c.mp4");
        assert_eq!(basename("lonefile"), "lonefile");
    }

    #[test]
    fn normalize_since_accepts_missing_z() {
        let a = normalize_since("2025-01-01T00:00:00").unwrap();
        let b = normalize_since("2025-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn coalesce_identifier_prefers_path() {
        let mut payload = BTreeMap::new();
        payload.insert("path".to_string(), Value::String("/x.mkv".into()));
        payload.insert("id".to_string(), Value::from(42));
        let event = CatalogEvent {
            seq: 7,
            ts_utc: Utc::now(),
            kind: "catalog.movie.upsert".to_string(),
            payload,
        };
        assert_eq!(event.coalesce_identifier(), "/x.mkv");
        assert_eq!(event.coalesce_key(), "catalog.movie.upsert:/x.mkv");
    }
}
