//! Typed view over the merged `settings.json` document (spec §6).

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    pub default_limit: i64,
    pub max_page_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub lan_refuse: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    pub heavy_ai_gpu: u32,
    pub light_cpu: u32,
    pub io_light: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    pub base_s: u64,
    pub max_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpuGateConfig {
    pub hard_requirement: bool,
    pub safety_margin_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub enable: bool,
    pub poll_ms: u64,
    pub concurrency: ConcurrencyConfig,
    pub backoff: BackoffConfig,
    pub lease_ttl_s: i64,
    pub heartbeat_s: u64,
    pub gpu: GpuGateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RagConfig {
    pub enable: bool,
    pub top_k: u32,
    pub min_score: f64,
    pub embed_model: Option<String>,
    pub index: String,
    pub refresh_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    pub enable: bool,
    pub runtime: String,
    pub model: Option<String>,
    pub ctx: u32,
    pub temperature: f64,
    pub tools_enabled: bool,
    pub tool_budget: u32,
    pub rag: RagConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpuConfig {
    pub policy: GpuPolicy,
    pub allow_hwaccel_video: bool,
    pub min_free_vram_mb: u64,
    pub max_gpu_workers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum GpuPolicy {
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "CPU_ONLY")]
    CpuOnly,
    #[serde(rename = "FORCE_GPU")]
    ForceGpu,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmokeTimeoutsConfig {
    pub default: u64,
    pub gpu: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    pub enable: bool,
    pub gpu_hard_requirement: bool,
    pub smoke_timeouts_s: SmokeTimeoutsConfig,
    pub logs_keep_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub version: i64,
    pub api: ApiConfig,
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub assistant: AssistantConfig,
    pub gpu: GpuConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl Settings {
    pub fn from_merged(document: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document.clone())
    }
}
