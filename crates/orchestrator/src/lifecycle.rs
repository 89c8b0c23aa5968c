use std::sync::Arc;

use gridimg_core::{ControlMessage, ProcessKind, ProcessState, ReportMessage};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::catalog::ModelCatalog;
use crate::child::ChildProcess;
use crate::config::OrchestratorConfig;
use crate::dispatcher::drain_reports;
use crate::errors::OrchestratorError;
use crate::models::ModelResidency;
use crate::pipeline::PipelineState;
use crate::registry::{ProcessEntry, ProcessRegistry};
use crate::scheduler::{self, SchedulerLimits};

/// Owns the process fleet and runs the process-control loop (C7): spawns and
/// tears down child workers, computes the shutdown-ready condition, and drives
/// the dispatcher + scheduler to completion each tick.
pub(crate) struct Lifecycle {
    config: Arc<OrchestratorConfig>,
    pipeline: Arc<PipelineState>,
    catalog: ModelCatalog,
    registry: ProcessRegistry,
    models: ModelResidency,
    reports_tx: mpsc::UnboundedSender<ReportMessage>,
    reports_rx: mpsc::UnboundedReceiver<ReportMessage>,
    next_pid: u32,
}

impl Lifecycle {
    pub(crate) fn new(
        config: Arc<OrchestratorConfig>,
        pipeline: Arc<PipelineState>,
        catalog: ModelCatalog,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            config,
            pipeline,
            catalog,
            registry: ProcessRegistry::default(),
            models: ModelResidency::default(),
            reports_tx,
            reports_rx,
            next_pid: 0,
        }
    }

    fn spawn_one(&mut self, kind: ProcessKind) -> anyhow::Result<()> {
        let pid = self.next_pid;
        self.next_pid += 1;
        let (child, _exited_rx) = ChildProcess::spawn(
            &self.config.worker_binary_path,
            pid,
            kind,
            self.reports_tx.clone(),
        )?;
        self.registry.insert(ProcessEntry {
            pid: child.pid,
            kind: child.kind,
            last_state: ProcessState::Starting,
            resident_model: None,
            ram_bytes: 0,
            vram_bytes: 0,
            total_vram_bytes: 0,
            control_tx: child.sender(),
        });
        Ok(())
    }

    /// Spawn workers to reach the configured counts (§4.7). Spawning more than
    /// configured anywhere else in the fleet's lifetime is a configuration fault,
    /// caught here since it can only happen through a bug in this module.
    pub(crate) fn start_safety_processes(&mut self) -> Result<(), OrchestratorError> {
        let current = self.registry.count_safety();
        if current > self.config.max_safety_processes {
            return Err(OrchestratorError::Configuration(format!(
                "running safety processes ({current}) exceed configured max ({})",
                self.config.max_safety_processes
            )));
        }
        for _ in current..self.config.max_safety_processes {
            if let Err(err) = self.spawn_one(ProcessKind::Safety) {
                error!(error = %err, "failed to spawn safety worker");
            }
        }
        Ok(())
    }

    pub(crate) fn start_inference_processes(&mut self) -> Result<(), OrchestratorError> {
        let current = self.registry.count_inference();
        if current > self.config.max_inference_processes {
            return Err(OrchestratorError::Configuration(format!(
                "running inference processes ({current}) exceed configured max ({})",
                self.config.max_inference_processes
            )));
        }
        for _ in current..self.config.max_inference_processes {
            if let Err(err) = self.spawn_one(ProcessKind::Inference) {
                error!(error = %err, "failed to spawn inference worker");
            }
        }
        Ok(())
    }

    /// Send `EndProcess` to idle inference workers down to `target_count`, or to
    /// every one of them when `target_count` is `0` (shutdown).
    async fn end_inference_processes(&self, target_count: usize) {
        let current = self.registry.count_inference();
        let to_end = current.saturating_sub(target_count);
        let mut ended = 0;
        for proc in self.registry.iter() {
            if ended >= to_end {
                break;
            }
            if proc.kind == ProcessKind::Inference && proc.last_state.can_accept_job() {
                proc.control_tx.send(ControlMessage::EndProcess).await.ok();
                ended += 1;
            }
        }
    }

    /// Send `EndProcess` to idle safety workers down to `target_count`, or to
    /// every one of them when `target_count` is `0` (shutdown). Without this,
    /// a safety worker idling in `WaitingForJob` keeps `all_ended` false forever
    /// and the process-control loop never reaches `is_time_for_shutdown`.
    async fn end_safety_processes(&self, target_count: usize) {
        let current = self.registry.count_safety();
        let to_end = current.saturating_sub(target_count);
        let mut ended = 0;
        for proc in self.registry.iter() {
            if ended >= to_end {
                break;
            }
            if proc.kind == ProcessKind::Safety && proc.last_state.can_accept_job() {
                proc.control_tx.send(ControlMessage::EndProcess).await.ok();
                ended += 1;
            }
        }
    }

    /// True iff the deque and in-progress set are empty and every worker has
    /// reached `Ended` (§4.7).
    async fn is_time_for_shutdown(&self) -> bool {
        let deque = self.pipeline.deque_lock.lock().await;
        deque.deque.is_empty() && deque.in_progress.is_empty() && self.registry.all_ended()
    }

    /// Runs the process-control loop until `is_time_for_shutdown` is true after
    /// a stop has been requested on `stop_rx`.
    pub(crate) async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        self.start_safety_processes().ok();
        self.start_inference_processes().ok();

        let limits = SchedulerLimits {
            max_concurrent_inference: self.config.max_concurrent_inference_processes,
            ram_budget_bytes: self.config.ram_budget_bytes(),
            accept_nsfw: self.config.nsfw,
        };

        let mut tick = tokio::time::interval(OrchestratorConfig::TICK_INTERVAL);
        let mut shutting_down = false;

        loop {
            tick.tick().await;

            if *stop_rx.borrow_and_update() && !shutting_down {
                shutting_down = true;
                info!("shutdown requested, ending inference and safety workers");
                self.end_inference_processes(0).await;
                self.end_safety_processes(0).await;
            }

            if shutting_down && self.is_time_for_shutdown().await {
                info!("all workers ended, process-control loop exiting");
                return;
            }

            let mut deque = self.pipeline.deque_lock.lock().await;
            let mut safety = self.pipeline.safety_lock.lock().await;
            let mut completed = self.pipeline.completed_lock.lock().await;

            let errors = drain_reports(
                &mut self.reports_rx,
                &mut self.registry,
                &mut self.models,
                &mut deque,
                &mut safety,
                &mut completed,
            );
            for err in errors {
                if err.is_fatal() {
                    error!(error = %err, "fatal orchestrator error, exiting");
                    return;
                }
                warn!(error = %err, "recoverable orchestrator error");
            }

            tracing::debug!(
                inference = self.registry.count_inference(),
                available_inference = self.registry.count_available_inference(),
                safety = self.registry.count_safety(),
                "process-control tick"
            );

            if let Err(err) = scheduler::tick(
                &mut self.registry,
                &mut self.models,
                &mut deque,
                &mut safety,
                &self.catalog,
                &limits,
            )
            .await
            {
                if err.is_fatal() {
                    error!(error = %err, "fatal scheduling error");
                    return;
                }
                warn!(error = %err, "recoverable scheduling error");
            }
        }
    }
}
