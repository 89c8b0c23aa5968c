use std::collections::BTreeMap;

use gridimg_core::{ProcessKind, ProcessState};
use tokio::sync::mpsc;

use gridimg_core::ControlMessage;

/// One tracked child worker (§3.1, §4.1).
pub(crate) struct ProcessEntry {
    pub(crate) pid: u32,
    pub(crate) kind: ProcessKind,
    pub(crate) last_state: ProcessState,
    pub(crate) resident_model: Option<String>,
    pub(crate) ram_bytes: u64,
    pub(crate) vram_bytes: u64,
    pub(crate) total_vram_bytes: u64,
    pub(crate) control_tx: mpsc::Sender<ControlMessage>,
}

/// Tracks every spawned child worker's identity, liveness state, resident model
/// and reported resource usage (C1).
#[derive(Default)]
pub(crate) struct ProcessRegistry {
    processes: BTreeMap<u32, ProcessEntry>,
}

impl ProcessRegistry {
    pub(crate) fn insert(&mut self, entry: ProcessEntry) {
        self.processes.insert(entry.pid, entry);
    }

    pub(crate) fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.processes.get(&pid)
    }

    pub(crate) fn get_mut(&mut self, pid: u32) -> Option<&mut ProcessEntry> {
        self.processes.get_mut(&pid)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ProcessEntry> {
        self.processes.values()
    }

    pub(crate) fn can_accept_job(&self, pid: u32) -> bool {
        self.processes
            .get(&pid)
            .is_some_and(|p| p.last_state.can_accept_job())
    }

    pub(crate) fn first_available_inference(&self) -> Option<u32> {
        self.processes
            .values()
            .find(|p| p.kind == ProcessKind::Inference && p.last_state.can_accept_job())
            .map(|p| p.pid)
    }

    pub(crate) fn first_available_safety(&self) -> Option<u32> {
        self.processes
            .values()
            .find(|p| p.kind == ProcessKind::Safety && p.last_state.can_accept_job())
            .map(|p| p.pid)
    }

    pub(crate) fn process_by_model(&self, model: &str) -> Option<u32> {
        self.processes
            .values()
            .find(|p| p.resident_model.as_deref() == Some(model))
            .map(|p| p.pid)
    }

    pub(crate) fn count_inference(&self) -> usize {
        self.processes
            .values()
            .filter(|p| p.kind == ProcessKind::Inference)
            .count()
    }

    pub(crate) fn count_available_inference(&self) -> usize {
        self.processes
            .values()
            .filter(|p| p.kind == ProcessKind::Inference && p.last_state.can_accept_job())
            .count()
    }

    pub(crate) fn count_safety(&self) -> usize {
        self.processes
            .values()
            .filter(|p| p.kind == ProcessKind::Safety)
            .count()
    }

    pub(crate) fn idle_inference_with_resident_model(&self) -> Vec<(u32, String)> {
        self.processes
            .values()
            .filter(|p| p.kind == ProcessKind::Inference && p.last_state.can_accept_job())
            .filter_map(|p| p.resident_model.clone().map(|m| (p.pid, m)))
            .collect()
    }

    pub(crate) fn all_ended(&self) -> bool {
        self.processes
            .values()
            .all(|p| p.last_state == ProcessState::Ended)
    }
}
