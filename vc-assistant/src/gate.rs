//! Assistant gate: `assistant.enable` AND a GPU readiness probe taken
//! once at startup, re-probeable on request. Grounded on
//! `api/assistant_gateway.py::AssistantGateway` (spec §4.9).

use parking_lot::RwLock;
use vc_scheduler::GpuGate;

use crate::gpu::{self, GpuInfo, REQUIRED_VRAM_BYTES};

pub struct AssistantGate {
    settings_enable: bool,
    info: RwLock<GpuInfo>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GateStatus {
    pub requested: bool,
    pub gpu_ready: bool,
    pub enabled: bool,
    pub message: String,
    pub gpu: GpuInfo,
}

impl AssistantGate {
    pub async fn probe(settings_enable: bool) -> Self {
        let info = gpu::probe().await;
        Self {
            settings_enable,
            info: RwLock::new(info),
        }
    }

    pub async fn reprobe(&self) {
        let info = gpu::probe().await;
        *self.info.write() = info;
    }

    pub fn gpu_ready_for_assistant(&self) -> bool {
        gpu::is_ready(&self.info.read(), REQUIRED_VRAM_BYTES)
    }

    pub fn enabled(&self) -> bool {
        self.settings_enable && self.gpu_ready_for_assistant()
    }

    pub fn status_message(&self) -> String {
        if !self.gpu_ready_for_assistant() {
            "AI disabled (GPU required)".to_string()
        } else if !self.settings_enable {
            "Assistant disabled in settings".to_string()
        } else {
            "Assistant ready".to_string()
        }
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            requested: self.settings_enable,
            gpu_ready: self.gpu_ready_for_assistant(),
            enabled: self.enabled(),
            message: self.status_message(),
            gpu: self.info.read().clone(),
        }
    }
}

/// Lets the scheduler's `heavy_ai_gpu` resource class reuse the same
/// probe instead of maintaining its own, with a caller-supplied margin
/// (`orchestrator.gpu.safety_margin_mb`) distinct from the assistant's
/// fixed 8 GiB requirement.
impl GpuGate for AssistantGate {
    fn gpu_ready(&self, safety_margin_mb: u64) -> bool {
        let info = self.info.read();
        info.has_nvidia && info.vram_bytes >= safety_margin_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_in_settings_overrides_gpu_ready() {
        let gate = AssistantGate {
            settings_enable: false,
            info: RwLock::new(GpuInfo {
                has_nvidia: true,
                name: None,
                vram_bytes: REQUIRED_VRAM_BYTES,
            }),
        };
        assert!(!gate.enabled());
        assert_eq!(gate.status_message(), "Assistant disabled in settings");
    }

    #[tokio::test]
    async fn missing_gpu_yields_gpu_required_message() {
        let gate = AssistantGate {
            settings_enable: true,
            info: RwLock::new(GpuInfo::none()),
        };
        assert!(!gate.enabled());
        assert_eq!(gate.status_message(), "AI disabled (GPU required)");
    }
}
