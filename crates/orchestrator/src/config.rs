use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

/// All orchestrator-relevant configuration options (§6.1), supplied by the
/// binary's CLI/env layer.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub api_key: String,
    pub worker_name: String,
    pub backend_url: Url,
    pub worker_binary_path: PathBuf,
    pub model_reference_catalog_path: PathBuf,

    pub queue_size: usize,
    pub image_models_to_load: Vec<String>,
    pub nsfw: bool,
    pub allow_img2img: bool,
    pub allow_inpainting: bool,
    pub allow_post_processing: bool,
    pub allow_controlnet: bool,
    pub allow_unsafe_ip: bool,
    pub require_upfront_kudos: bool,
    pub max_power: u32,

    pub max_inference_processes: usize,
    pub max_concurrent_inference_processes: usize,
    pub max_safety_processes: usize,
    /// Accepted for parity with §6.1's enumerated options; no `DOWNLOAD`-kind
    /// process is ever spawned because §4.7 defines no lifecycle operation for
    /// one (only `start_safety_processes`/`start_inference_processes`) — model
    /// downloading is the out-of-scope "model-reference-catalog download" (§1).
    pub max_download_processes: usize,

    pub target_ram_overhead_bytes: u64,
    pub total_system_ram_bytes: u64,
    /// Per-device VRAM overhead (§6.1). Accepted but not yet consumed: the
    /// scheduler's eviction policy (§4.5c) only reasons about system RAM, not
    /// per-device VRAM budgets.
    pub target_vram_overhead_bytes: Vec<u64>,
}

impl OrchestratorConfig {
    pub const DEFAULT_POP_INTERVAL: Duration = Duration::from_secs(1);
    pub const ERROR_POP_INTERVAL: Duration = Duration::from_secs(5);
    pub const USER_INFO_INTERVAL: Duration = Duration::from_secs(5);
    pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

    pub fn max_pixels(&self) -> u64 {
        self.max_power as u64 * 8 * 64 * 64
    }

    pub fn ram_budget_bytes(&self) -> u64 {
        self.total_system_ram_bytes
            .saturating_sub(self.target_ram_overhead_bytes)
    }

    /// Fatal configuration faults discoverable without contacting the network
    /// (§7): overhead exceeding total RAM, or a concurrency limit greater than
    /// the inference process count it's bounded by.
    pub fn validate(&self) -> Result<(), String> {
        if self.target_ram_overhead_bytes > self.total_system_ram_bytes {
            return Err(format!(
                "target_ram_overhead_bytes ({}) exceeds total_system_ram_bytes ({})",
                self.target_ram_overhead_bytes, self.total_system_ram_bytes
            ));
        }
        if self.max_concurrent_inference_processes > self.max_inference_processes {
            return Err(format!(
                "max_concurrent_inference_processes ({}) exceeds max_inference_processes ({})",
                self.max_concurrent_inference_processes, self.max_inference_processes
            ));
        }
        Ok(())
    }
}
