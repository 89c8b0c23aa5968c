use serde::{Deserialize, Serialize};

use crate::job::JobDescriptor;
use crate::model::ModelReference;

/// Kind of child process, fixed at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Inference,
    Safety,
    Download,
}

/// States of the process lifecycle state machine (§3.4 / §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Starting,
    WaitingForJob,
    Preloading,
    Preloaded,
    InferenceStarting,
    InferenceRunning,
    InferenceComplete,
    EvaluatingSafety,
    Unloading,
    Ending,
    Ended,
}

impl ProcessState {
    pub fn can_accept_job(self) -> bool {
        matches!(self, ProcessState::WaitingForJob | ProcessState::Preloaded)
    }
}

/// Messages sent from the orchestrator to a child worker (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    PreloadModel {
        model: String,
        will_load_loras: bool,
        seamless_tiling: bool,
    },
    StartInference {
        job: JobDescriptor,
    },
    UnloadFromVram {
        model: String,
    },
    UnloadFromRam {
        model: String,
    },
    EndProcess,
    EvaluateSafety {
        job_id: String,
        images_b64: Vec<String>,
        prompt: String,
        censor_nsfw: bool,
        sfw_worker: bool,
        model_reference: ModelReference,
    },
}

/// A single image's safety verdict, part of a `SafetyResult` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyEvaluation {
    pub is_nsfw: bool,
    pub is_csam: bool,
    /// A censored replacement image, if the worker produced one.
    #[serde(default)]
    pub replacement_image_b64: Option<String>,
}

/// Messages sent from a child worker back to the orchestrator (§6.3).
///
/// Every variant that originates from a specific child carries its `pid` so the
/// dispatcher (§4.4) can attribute the report without relying on channel identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReportMessage {
    ProcessStateChange {
        pid: u32,
        state: ProcessState,
        info: Option<String>,
    },
    ModelStateChange {
        pid: u32,
        model: String,
        state: crate::model::LoadState,
    },
    ProcessMemory {
        pid: u32,
        ram_bytes: u64,
        vram_bytes: u64,
        total_vram_bytes: u64,
    },
    InferenceResult {
        pid: u32,
        job: JobDescriptor,
        image_b64: String,
        faulted: bool,
    },
    SafetyResult {
        job_id: String,
        evaluations: Vec<SafetyEvaluation>,
    },
}
