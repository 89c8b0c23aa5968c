use std::collections::VecDeque;

use gridimg_core::{CompletedJob, JobDescriptor};
use tokio::sync::Mutex;

/// The job deque and the in-progress set it feeds (I-J1, I-J3). Guarded by the
/// "deque lock" (§5) — first of the three locks acquired, in fixed order, by the
/// process-control tick.
#[derive(Default)]
pub(crate) struct DequeState {
    pub(crate) deque: VecDeque<JobDescriptor>,
    pub(crate) in_progress: Vec<JobDescriptor>,
}

/// The two safety-pipeline stages (§3.3, §4.5d). Guarded by the "safety lock".
#[derive(Default)]
pub(crate) struct SafetyState {
    pub(crate) pending: VecDeque<CompletedJob>,
    pub(crate) being_checked: Vec<CompletedJob>,
}

/// Records that have finished safety screening and are awaiting submission
/// (§4.6 submit). Guarded by the "completed lock".
#[derive(Default)]
pub(crate) struct CompletedState {
    pub(crate) records: VecDeque<CompletedJob>,
    pub(crate) total_completed: u64,
}

/// Owns the three logical locks of the job pipeline (C3). Acquired in the fixed
/// order deque -> safety -> completed by the process-control tick (§5); the API
/// loop acquires only the single lock each of its steps needs.
#[derive(Default)]
pub(crate) struct PipelineState {
    pub(crate) deque_lock: Mutex<DequeState>,
    pub(crate) safety_lock: Mutex<SafetyState>,
    pub(crate) completed_lock: Mutex<CompletedState>,
}
