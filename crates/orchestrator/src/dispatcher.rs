use gridimg_core::{CompletedJob, JobOutcomeState, ReportMessage};
use tokio::sync::mpsc;

use crate::errors::OrchestratorError;
use crate::models::ModelResidency;
use crate::pipeline::{CompletedState, DequeState, SafetyState};
use crate::registry::ProcessRegistry;

/// Drains the shared inbound report channel non-blockingly until empty, mutating
/// the registry/model-map/pipeline state (C4). This is the only writer of
/// `resident_model` fields and model load states (§4.4).
///
/// Errors for individual messages are logged by the caller and do not stop the
/// drain of sibling messages, per the §7 propagation policy; a return of `Err`
/// here is reserved for the fatal unknown-pid case.
pub(crate) fn drain_reports(
    rx: &mut mpsc::UnboundedReceiver<ReportMessage>,
    registry: &mut ProcessRegistry,
    models: &mut ModelResidency,
    deque: &mut DequeState,
    safety: &mut SafetyState,
    completed: &mut CompletedState,
) -> Vec<OrchestratorError> {
    let mut errors = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Err(err) = apply_one(msg, registry, models, deque, safety, completed) {
            let fatal = err.is_fatal();
            errors.push(err);
            if fatal {
                break;
            }
        }
    }
    errors
}

fn apply_one(
    msg: ReportMessage,
    registry: &mut ProcessRegistry,
    models: &mut ModelResidency,
    deque: &mut DequeState,
    safety: &mut SafetyState,
    completed: &mut CompletedState,
) -> Result<(), OrchestratorError> {
    match msg {
        ReportMessage::ProcessStateChange { pid, state, .. } => {
            let proc = registry
                .get_mut(pid)
                .ok_or(OrchestratorError::UnknownPid { pid })?;
            proc.last_state = state;
            Ok(())
        }
        ReportMessage::ModelStateChange { pid, model, state } => {
            if registry.get(pid).is_none() {
                return Err(OrchestratorError::UnknownPid { pid });
            }
            models.update(&model, state, pid);
            if let Some(proc) = registry.get_mut(pid) {
                if state.is_resident() {
                    proc.resident_model = Some(model);
                } else {
                    proc.resident_model = None;
                }
            }
            Ok(())
        }
        ReportMessage::ProcessMemory {
            pid,
            ram_bytes,
            vram_bytes,
            total_vram_bytes,
        } => {
            let proc = registry
                .get_mut(pid)
                .ok_or(OrchestratorError::UnknownPid { pid })?;
            proc.ram_bytes = ram_bytes;
            proc.vram_bytes = vram_bytes;
            proc.total_vram_bytes = total_vram_bytes;
            Ok(())
        }
        ReportMessage::InferenceResult {
            pid: _,
            job,
            image_b64,
            faulted,
        } => {
            let job_id = job.job_id.clone();
            deque.in_progress.retain(|j| j.job_id != job_id);
            // The deque's left end is the only job completion messages may retire
            // (O3); this assumes in-order completion (see DESIGN.md open question).
            deque.deque.pop_front();

            completed.total_completed += 1;

            let mut record = CompletedJob::new(job, image_b64);
            if faulted {
                record.state = JobOutcomeState::Faulted;
            }
            safety.pending.push_back(record);
            Ok(())
        }
        ReportMessage::SafetyResult { job_id, evaluations } => {
            let Some(pos) = safety
                .being_checked
                .iter()
                .position(|r| r.job.job_id == job_id)
            else {
                return Err(OrchestratorError::PipelineInvariant(format!(
                    "safety result for unknown job {job_id}"
                )));
            };
            let mut record = safety.being_checked.remove(pos);

            // Single-image assumption (§9 open question): only the first
            // evaluation's replacement, if any, is applied.
            let mut censored_count = 0usize;
            let mut csam = false;
            for eval in &evaluations {
                if eval.is_csam {
                    csam = true;
                }
                if eval.is_nsfw {
                    censored_count += 1;
                }
                if let Some(replacement) = &eval.replacement_image_b64 {
                    record.image_b64 = replacement.clone();
                }
            }
            record.censored = Some(censored_count > 0);
            if csam {
                record.state = JobOutcomeState::Csam;
            } else if censored_count > 0 {
                record.state = JobOutcomeState::Censored;
            }

            // Safety-evaluation arity law: a well-formed report carries exactly
            // one evaluation per image in the record; we do not enforce that here
            // since the image count is implicit in the single-image assumption.
            completed.records.push_back(record);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridimg_core::{GenerationParams, JobDescriptor, ProcessKind, ProcessState, SafetyEvaluation};

    fn job(id: &str, model: &str) -> JobDescriptor {
        JobDescriptor {
            job_id: id.to_string(),
            model: model.to_string(),
            params: GenerationParams {
                prompt: "a cat".to_string(),
                seed: 1,
                sampler_name: "k_euler".to_string(),
                steps: 20,
                cfg_scale: 7.0,
                width: 512,
                height: 512,
                loras: vec![],
                seamless_tiling: false,
                censor_nsfw: false,
            },
            upload_url: "https://example.invalid/upload".to_string(),
        }
    }

    fn registry_with_one_process() -> ProcessRegistry {
        let mut registry = ProcessRegistry::default();
        let (tx, _rx) = mpsc::channel(8);
        registry.insert(crate::registry::ProcessEntry {
            pid: 0,
            kind: ProcessKind::Inference,
            last_state: ProcessState::WaitingForJob,
            resident_model: None,
            ram_bytes: 0,
            vram_bytes: 0,
            total_vram_bytes: 0,
            control_tx: tx,
        });
        registry
    }

    #[test]
    fn inference_result_retires_deque_head_and_enqueues_pending_safety() {
        let mut registry = registry_with_one_process();
        let mut models = ModelResidency::default();
        let mut deque = DequeState::default();
        let mut safety = SafetyState::default();
        let mut completed = CompletedState::default();

        let j = job("job-1", "sd1");
        deque.deque.push_back(j.clone());
        deque.in_progress.push(j.clone());

        let result = apply_one(
            ReportMessage::InferenceResult {
                pid: 0,
                job: j,
                image_b64: "aW1hZ2U=".to_string(),
                faulted: false,
            },
            &mut registry,
            &mut models,
            &mut deque,
            &mut safety,
            &mut completed,
        );

        assert!(result.is_ok());
        assert!(deque.deque.is_empty());
        assert!(deque.in_progress.is_empty());
        assert_eq!(safety.pending.len(), 1);
        assert_eq!(completed.total_completed, 1);
        assert_eq!(safety.pending[0].censored, None);
    }

    #[test]
    fn safety_result_sets_censored_and_moves_to_completed() {
        let mut registry = registry_with_one_process();
        let mut models = ModelResidency::default();
        let mut deque = DequeState::default();
        let mut safety = SafetyState::default();
        let mut completed = CompletedState::default();

        let record = CompletedJob::new(job("job-1", "sd1"), "aW1hZ2U=".to_string());
        safety.being_checked.push(record);

        let result = apply_one(
            ReportMessage::SafetyResult {
                job_id: "job-1".to_string(),
                evaluations: vec![SafetyEvaluation {
                    is_nsfw: true,
                    is_csam: false,
                    replacement_image_b64: Some("Y2Vuc29yZWQ=".to_string()),
                }],
            },
            &mut registry,
            &mut models,
            &mut deque,
            &mut safety,
            &mut completed,
        );

        assert!(result.is_ok());
        assert!(safety.being_checked.is_empty());
        assert_eq!(completed.records.len(), 1);
        let out = &completed.records[0];
        assert_eq!(out.censored, Some(true));
        assert_eq!(out.state, JobOutcomeState::Censored);
        assert_eq!(out.image_b64, "Y2Vuc29yZWQ=");
    }

    #[test]
    fn unknown_pid_is_fatal() {
        let mut registry = ProcessRegistry::default();
        let mut models = ModelResidency::default();
        let mut deque = DequeState::default();
        let mut safety = SafetyState::default();
        let mut completed = CompletedState::default();

        let err = apply_one(
            ReportMessage::ProcessStateChange {
                pid: 42,
                state: ProcessState::WaitingForJob,
                info: None,
            },
            &mut registry,
            &mut models,
            &mut deque,
            &mut safety,
            &mut completed,
        )
        .unwrap_err();

        assert!(err.is_fatal());
    }
}
