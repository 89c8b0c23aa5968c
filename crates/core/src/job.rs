use serde::{Deserialize, Serialize};

/// Generation parameters forwarded verbatim from the dispatch API to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub seed: i64,
    pub sampler_name: String,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub loras: Vec<String>,
    #[serde(default)]
    pub seamless_tiling: bool,
    #[serde(default)]
    pub censor_nsfw: bool,
}

/// A job popped from the dispatch API, not yet started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub model: String,
    pub params: GenerationParams,
    pub upload_url: String,
}

/// Terminal classification of a completed job, reported back on submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcomeState {
    Ok,
    Censored,
    Csam,
    Faulted,
}

/// A job that has finished inference and is moving through (or past) safety screening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedJob {
    pub job: JobDescriptor,
    /// Base64-encoded image bytes as reported by the inference worker; replaced in place
    /// by a safety worker's censored substitute, if any.
    pub image_b64: String,
    pub state: JobOutcomeState,
    /// `None` until a `SafetyResult` has been applied (I-J4).
    pub censored: Option<bool>,
}

impl CompletedJob {
    pub fn new(job: JobDescriptor, image_b64: String) -> Self {
        Self {
            job,
            image_b64,
            state: JobOutcomeState::Ok,
            censored: None,
        }
    }
}
