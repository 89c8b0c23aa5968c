/// The orchestrator's fixed error taxonomy (§7 of the design spec).
///
/// Fatal variants are logged at `error` and the binary exits non-zero; the
/// recoverable variants are logged at `warn` and swallowed by the loop that raised
/// them, per the propagation policy: a loop iteration's error never drops siblings.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("dispatch api transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid dispatch api url: {0}")]
    InvalidUrl(String),

    #[error("dispatch api returned a structured error: {code}: {detail}")]
    DispatchApi { code: String, detail: String },

    #[error("upload to object store failed with status {status}")]
    UploadFailed { status: u16 },

    #[error("child process {pid} referenced in a report message is not in the registry")]
    UnknownPid { pid: u32 },

    #[error("pipeline invariant violated: {0}")]
    PipelineInvariant(String),

    #[error("configuration fault: {0}")]
    Configuration(String),
}

impl OrchestratorError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnknownPid { .. } | OrchestratorError::Configuration(_)
        )
    }
}
