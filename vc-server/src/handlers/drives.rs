//! `GET /v1/drives`: list catalogued drives (spec §4.4 operation 1).

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize, FromRow)]
pub struct DriveRow {
    pub label: String,
    #[serde(rename = "type")]
    pub drive_type: String,
    pub last_scan_utc: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DriveOut {
    pub label: String,
    #[serde(rename = "type")]
    pub drive_type: String,
    pub last_scan_utc: Option<DateTime<Utc>>,
    pub shard_path: String,
}

pub async fn list_drives(State(state): State<AppState>) -> AppResult<Json<Vec<DriveOut>>> {
    let rows: Vec<DriveRow> = sqlx::query_as("SELECT label, type, last_scan_utc FROM drives ORDER BY label")
        .fetch_all(&state.catalog_pool)
        .await?;

    let out = rows
        .into_iter()
        .map(|row| DriveOut {
            shard_path: state.paths.shard_db_path(&row.label).to_string_lossy().into_owned(),
            last_scan_utc: row
                .last_scan_utc
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            label: row.label,
            drive_type: row.drive_type,
        })
        .collect();

    Ok(Json(out))
}
