//! GPU readiness probe: shells out to `nvidia-smi` rather than binding
//! NVML directly, checking for an NVIDIA device and enough free VRAM
//! above a safety margin before declaring the GPU gate ready.

use tokio::process::Command;
use tracing::{debug, warn};

pub const REQUIRED_VRAM_BYTES: u64 = 8 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, serde::Serialize)]
pub struct GpuInfo {
    pub has_nvidia: bool,
    pub name: Option<String>,
    pub vram_bytes: u64,
}

impl GpuInfo {
    pub fn none() -> Self {
        Self {
            has_nvidia: false,
            name: None,
            vram_bytes: 0,
        }
    }
}

/// Probe GPU presence/VRAM via `nvidia-smi`. Any failure (binary
/// missing, no permission, parse error) is treated as "no GPU" rather
/// than propagated — gating decisions must never crash on a probe
/// failure (spec §4.9).
pub async fn probe() -> GpuInfo {
    match run_nvidia_smi().await {
        Ok(info) => info,
        Err(err) => {
            debug!(error = %err, "gpu probe: nvidia-smi unavailable, assuming no GPU");
            GpuInfo::none()
        }
    }
}

async fn run_nvidia_smi() -> Result<GpuInfo, String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"])
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(format!("nvidia-smi exited with {}", output.status));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let first_line = text.lines().next().ok_or("empty nvidia-smi output")?;
    let mut parts = first_line.split(',').map(str::trim);
    let name = parts.next().map(str::to_string);
    let vram_mb: u64 = parts
        .next()
        .ok_or("missing memory column")?
        .parse()
        .map_err(|_| "could not parse memory.total".to_string())?;

    Ok(GpuInfo {
        has_nvidia: true,
        name,
        vram_bytes: vram_mb * 1024 * 1024,
    })
}

/// `has_nvidia` and VRAM at or above [`REQUIRED_VRAM_BYTES`], matching
/// `AssistantGateway._check_gpu_ready`.
pub fn is_ready(info: &GpuInfo, required_bytes: u64) -> bool {
    info.has_nvidia && info.vram_bytes >= required_bytes
}

pub fn warn_on_unready(info: &GpuInfo) {
    if !info.has_nvidia {
        warn!("gpu probe: no NVIDIA device detected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_ready_requires_both_presence_and_vram() {
        let ready = GpuInfo {
            has_nvidia: true,
            name: Some("Test GPU".into()),
            vram_bytes: 8 * 1024 * 1024 * 1024,
        };
        assert!(is_ready(&ready, REQUIRED_VRAM_BYTES));

        let low_vram = GpuInfo {
            has_nvidia: true,
            name: Some("Test GPU".into()),
            vram_bytes: 4 * 1024 * 1024 * 1024,
        };
        assert!(!is_ready(&low_vram, REQUIRED_VRAM_BYTES));

        assert!(!is_ready(&GpuInfo::none(), REQUIRED_VRAM_BYTES));
    }
}
