//! Tool dispatch for the assistant's tool-calling loop (spec §4.9 step
//! 2): read-only catalog queries, semantic search, and an "open folder"
//! plan, backed by the same pools/index the HTTP handlers use. TMDb
//! cached lookup and CSV export dry-run stay external collaborators per
//! spec §1's Non-goals — dispatching those calls returns a `not
//! implemented` tool result rather than failing the whole turn, so the
//! model's tool loop can still terminate and synthesize an answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use vc_db::ShardPools;
use vc_scheduler::CosineFallbackIndex;

use vc_assistant::{ToolCall, ToolDispatcher};

pub struct ReadApiToolDispatcher {
    pub catalog_pool: SqlitePool,
    pub shard_pools: Arc<ShardPools>,
    pub semantic_index: Arc<CosineFallbackIndex>,
}

impl ReadApiToolDispatcher {
    async fn search_catalog(&self, query: &str, limit: i64) -> Value {
        let labels: Vec<(String,)> = sqlx::query_as("SELECT label FROM drives")
            .fetch_all(&self.catalog_pool)
            .await
            .unwrap_or_default();
        let pattern = format!("%{}%", query.to_ascii_lowercase());
        let mut hits = Vec::new();
        for (label,) in labels {
            let Ok(shard) = self.shard_pools.get(&label).await else {
                continue;
            };
            let movies: Vec<(i64, String)> =
                sqlx::query_as("SELECT id, title FROM movies WHERE lower(title) LIKE ? ORDER BY title LIMIT ?")
                    .bind(&pattern)
                    .bind(limit)
                    .fetch_all(&shard)
                    .await
                    .unwrap_or_default();
            hits.extend(movies.into_iter().map(|(id, title)| json!({ "drive_label": label, "kind": "movie", "id": id, "title": title })));
            if hits.len() as i64 >= limit {
                break;
            }
        }
        hits.truncate(limit.max(1) as usize);
        json!({ "results": hits })
    }

    fn semantic_search(&self, query: &str, top_k: usize) -> Value {
        let hits = self.semantic_index.search(query, top_k.max(1));
        json!({
            "results": hits.into_iter().map(|(doc_id, score)| json!({ "doc_id": doc_id, "score": score })).collect::<Vec<_>>()
        })
    }

    async fn open_folder_plan(&self, drive_label: &str, path: &str) -> Value {
        match self.shard_pools.get(drive_label).await {
            Ok(_) => json!({ "plan": "shell_open", "path": path }),
            Err(err) => json!({ "error": err.to_string() }),
        }
    }
}

#[async_trait]
impl ToolDispatcher for ReadApiToolDispatcher {
    async fn dispatch(&self, call: &ToolCall) -> Value {
        match call.name.as_str() {
            "search_catalog" => {
                let query = call.arguments.get("query").and_then(Value::as_str).unwrap_or("");
                let limit = call.arguments.get("limit").and_then(Value::as_i64).unwrap_or(20);
                self.search_catalog(query, limit).await
            }
            "semantic_search" => {
                let query = call.arguments.get("query").and_then(Value::as_str).unwrap_or("");
                let top_k = call.arguments.get("top_k").and_then(Value::as_u64).unwrap_or(10) as usize;
                self.semantic_search(query, top_k)
            }
            "open_folder" => {
                let drive_label = call.arguments.get("drive_label").and_then(Value::as_str).unwrap_or("");
                let path = call.arguments.get("path").and_then(Value::as_str).unwrap_or("");
                self.open_folder_plan(drive_label, path).await
            }
            "tmdb_lookup" | "csv_export_dry_run" => {
                json!({ "error": "not implemented: external collaborator out of scope" })
            }
            other => json!({ "error": format!("unknown tool: {other}") }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vc_core::ResolvedPaths;
    use vc_db::connect::open_writable;
    use vc_db::migrations::ensure_catalog_schema;

    #[tokio::test]
    async fn unknown_tool_reports_error_instead_of_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResolvedPaths::new(dir.path().to_path_buf());
        paths.ensure_structure().unwrap();
        let catalog = open_writable(&paths.catalog_db_path()).await.unwrap();
        ensure_catalog_schema(&catalog).await.unwrap();
        let shard_pools = ShardPools::new(paths, catalog.clone(), 4);
        let dispatcher = ReadApiToolDispatcher {
            catalog_pool: catalog,
            shard_pools,
            semantic_index: Arc::new(CosineFallbackIndex::new(|_| vec![0.0; 4])),
        };
        let result = dispatcher
            .dispatch(&ToolCall {
                name: "does_not_exist".to_string(),
                arguments: Value::Null,
            })
            .await;
        assert!(result["error"].as_str().unwrap().contains("unknown tool"));
    }
}
