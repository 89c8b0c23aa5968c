use std::path::PathBuf;

use clap::Parser;
use reqwest::Url;

fn default_backend_url() -> Url {
    Url::parse("https://dispatch.example.invalid/").expect("default backend url must be valid")
}

fn parse_byte_size(input: &str) -> Result<u64, String> {
    let s = input.trim().to_ascii_lowercase();
    let (num, scale) = if let Some(raw) = s.strip_suffix("gib") {
        (raw, 1024u64 * 1024 * 1024)
    } else if let Some(raw) = s.strip_suffix("mib") {
        (raw, 1024u64 * 1024)
    } else if let Some(raw) = s.strip_suffix('b') {
        (raw, 1u64)
    } else {
        (s.as_str(), 1024u64 * 1024 * 1024)
    };
    num.trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid byte size: {input:?}"))?
        .checked_mul(scale)
        .ok_or_else(|| format!("byte size too large: {input:?}"))
}

/// Command-line configuration for the orchestrator host process (§6.1).
#[derive(Debug, Clone, Parser)]
#[command(name = "gridimg-worker", version, about = "Distributed image-generation compute node")]
pub struct Cli {
    #[arg(long, env = "GRIDIMG_API_KEY")]
    pub api_key: String,

    #[arg(long, env = "GRIDIMG_WORKER_NAME")]
    pub worker_name: String,

    #[arg(long, env = "GRIDIMG_BACKEND_URL", default_value_t = default_backend_url())]
    pub backend_url: Url,

    #[arg(long, env = "GRIDIMG_WORKER_BINARY_PATH")]
    pub worker_binary_path: PathBuf,

    #[arg(long, env = "GRIDIMG_MODEL_CATALOG_PATH")]
    pub model_reference_catalog_path: PathBuf,

    #[arg(long, env = "GRIDIMG_QUEUE_SIZE", default_value_t = 1)]
    pub queue_size: usize,

    #[arg(long = "model", env = "GRIDIMG_MODELS", value_delimiter = ',')]
    pub image_models_to_load: Vec<String>,

    #[arg(long, env = "GRIDIMG_NSFW", default_value_t = false)]
    pub nsfw: bool,

    #[arg(long, env = "GRIDIMG_ALLOW_IMG2IMG", default_value_t = true)]
    pub allow_img2img: bool,

    #[arg(long, env = "GRIDIMG_ALLOW_INPAINTING", default_value_t = true)]
    pub allow_inpainting: bool,

    #[arg(long, env = "GRIDIMG_ALLOW_POST_PROCESSING", default_value_t = true)]
    pub allow_post_processing: bool,

    #[arg(long, env = "GRIDIMG_ALLOW_CONTROLNET", default_value_t = false)]
    pub allow_controlnet: bool,

    #[arg(long, env = "GRIDIMG_ALLOW_UNSAFE_IP", default_value_t = false)]
    pub allow_unsafe_ip: bool,

    #[arg(long, env = "GRIDIMG_REQUIRE_UPFRONT_KUDOS", default_value_t = false)]
    pub require_upfront_kudos: bool,

    #[arg(long, env = "GRIDIMG_MAX_POWER", default_value_t = 8)]
    pub max_power: u32,

    #[arg(long, env = "GRIDIMG_MAX_INFERENCE_PROCESSES", default_value_t = 1)]
    pub max_inference_processes: usize,

    #[arg(long, env = "GRIDIMG_MAX_CONCURRENT_INFERENCE", default_value_t = 1)]
    pub max_concurrent_inference_processes: usize,

    #[arg(long, env = "GRIDIMG_MAX_SAFETY_PROCESSES", default_value_t = 1)]
    pub max_safety_processes: usize,

    /// Accepted for configuration parity; this node never spawns a download
    /// worker (see `OrchestratorConfig::max_download_processes`).
    #[arg(long, env = "GRIDIMG_MAX_DOWNLOAD_PROCESSES", default_value_t = 0)]
    pub max_download_processes: usize,

    /// RAM set aside for the OS and this process, not available for model residency.
    #[arg(
        long,
        env = "GRIDIMG_RAM_OVERHEAD",
        default_value = "2GiB",
        value_parser = parse_byte_size
    )]
    pub target_ram_overhead_bytes: u64,

    #[arg(long, env = "GRIDIMG_TOTAL_SYSTEM_RAM", value_parser = parse_byte_size)]
    pub total_system_ram_bytes: u64,

    /// Per-device VRAM overhead, one entry per accelerator (§6.1). Not yet
    /// consumed by the scheduler's RAM-only eviction policy (§4.5c).
    #[arg(
        long = "vram-overhead",
        env = "GRIDIMG_VRAM_OVERHEAD",
        value_delimiter = ',',
        value_parser = parse_byte_size
    )]
    pub target_vram_overhead_bytes: Vec<u64>,
}

impl From<Cli> for gridimg_orchestrator::OrchestratorConfig {
    fn from(cli: Cli) -> Self {
        gridimg_orchestrator::OrchestratorConfig {
            api_key: cli.api_key,
            worker_name: cli.worker_name,
            backend_url: cli.backend_url,
            worker_binary_path: cli.worker_binary_path,
            model_reference_catalog_path: cli.model_reference_catalog_path,
            queue_size: cli.queue_size,
            image_models_to_load: cli.image_models_to_load,
            nsfw: cli.nsfw,
            allow_img2img: cli.allow_img2img,
            allow_inpainting: cli.allow_inpainting,
            allow_post_processing: cli.allow_post_processing,
            allow_controlnet: cli.allow_controlnet,
            allow_unsafe_ip: cli.allow_unsafe_ip,
            require_upfront_kudos: cli.require_upfront_kudos,
            max_power: cli.max_power,
            max_inference_processes: cli.max_inference_processes,
            max_concurrent_inference_processes: cli.max_concurrent_inference_processes,
            max_safety_processes: cli.max_safety_processes,
            max_download_processes: cli.max_download_processes,
            target_ram_overhead_bytes: cli.target_ram_overhead_bytes,
            total_system_ram_bytes: cli.total_system_ram_bytes,
            target_vram_overhead_bytes: cli.target_vram_overhead_bytes,
        }
    }
}
