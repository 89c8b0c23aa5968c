//! Shared types for the `gridimg` orchestrator and worker binary.

pub mod job;
pub mod messages;
pub mod model;

pub use job::{CompletedJob, GenerationParams, JobDescriptor, JobOutcomeState};
pub use messages::{ControlMessage, ProcessKind, ProcessState, ReportMessage, SafetyEvaluation};
pub use model::{Baseline, LoadState, ModelReference};
