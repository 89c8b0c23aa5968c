use gridimg_core::{ControlMessage, LoadState};

use crate::catalog::ModelCatalog;
use crate::errors::OrchestratorError;
use crate::models::ModelResidency;
use crate::pipeline::{DequeState, SafetyState};
use crate::registry::ProcessRegistry;

/// Tuning knobs the scheduler needs that come from configuration (§6.1).
pub(crate) struct SchedulerLimits {
    pub(crate) max_concurrent_inference: usize,
    pub(crate) ram_budget_bytes: u64,
    /// Whether this node accepts NSFW jobs at all (§6.1 `nsfw`); a node that
    /// doesn't is reported to the safety worker as SFW-only.
    pub(crate) accept_nsfw: bool,
}

/// Runs the four ordered scheduling sub-decisions for one tick (C5, §4.5).
/// Must be called after the dispatcher has drained the inbound channel and while
/// the caller still holds all three pipeline locks.
pub(crate) async fn tick(
    registry: &mut ProcessRegistry,
    models: &mut ModelResidency,
    deque: &mut DequeState,
    safety: &mut SafetyState,
    catalog: &ModelCatalog,
    limits: &SchedulerLimits,
) -> Result<(), OrchestratorError> {
    preload(registry, models, deque, limits).await?;
    start_inference(registry, models, deque, limits).await?;
    evict_ram(registry, models, deque, catalog, limits).await?;
    start_safety(registry, safety, catalog, limits).await?;
    Ok(())
}

/// (a) Preload the first un-loaded deque model onto the first available worker,
/// bounded by inference worker capacity so disk I/O stays controlled.
async fn preload(
    registry: &mut ProcessRegistry,
    models: &mut ModelResidency,
    deque: &DequeState,
    limits: &SchedulerLimits,
) -> Result<(), OrchestratorError> {
    let capacity = registry.count_inference();
    let loaded_or_loading = deque
        .deque
        .iter()
        .map(|j| j.model.as_str())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .filter(|m| models.is_loaded(m) || models.is_loading(m))
        .count();
    if loaded_or_loading >= capacity {
        return Ok(());
    }
    let _ = limits;

    let Some(job) = deque
        .deque
        .iter()
        .find(|j| !models.is_loaded(&j.model) && !models.is_loading(&j.model))
    else {
        return Ok(());
    };

    let Some(pid) = registry.first_available_inference() else {
        return Ok(());
    };

    let will_load_loras = !job.params.loras.is_empty();
    let seamless_tiling = job.params.seamless_tiling;
    let model = job.model.clone();

    if let Some(proc) = registry.get(pid) {
        proc.control_tx
            .send(ControlMessage::PreloadModel {
                model: model.clone(),
                will_load_loras,
                seamless_tiling,
            })
            .await
            .ok();
    }
    models.update(&model, LoadState::Loading, pid);
    Ok(())
}

/// (b) Start inference on the leftmost not-yet-started job whose model is loaded,
/// evicting any other idle worker's VRAM-resident model first to avoid OOM.
async fn start_inference(
    registry: &mut ProcessRegistry,
    models: &mut ModelResidency,
    deque: &mut DequeState,
    limits: &SchedulerLimits,
) -> Result<(), OrchestratorError> {
    if deque.in_progress.len() >= limits.max_concurrent_inference {
        return Ok(());
    }

    let Some(job) = deque
        .deque
        .iter()
        .find(|j| !deque.in_progress.iter().any(|ip| ip.job_id == j.job_id))
        .cloned()
    else {
        return Ok(());
    };

    if !models.is_loaded(&job.model) {
        return Ok(());
    }
    let Some(owner_pid) = models.owner_of(&job.model) else {
        return Ok(());
    };
    if !registry.can_accept_job(owner_pid) {
        return Ok(());
    }

    let other_vram_residents = registry
        .idle_inference_with_resident_model()
        .into_iter()
        .filter(|(pid, _)| *pid != owner_pid)
        .filter(|(_, model)| {
            models.load_state_of(model) == Some(LoadState::LoadedInVram)
        })
        .collect::<Vec<_>>();
    for (pid, model) in other_vram_residents {
        if let Some(proc) = registry.get(pid) {
            proc.control_tx
                .send(ControlMessage::UnloadFromVram { model })
                .await
                .ok();
        }
    }

    deque.in_progress.push(job.clone());
    if let Some(proc) = registry.get(owner_pid) {
        proc.control_tx
            .send(ControlMessage::StartInference { job })
            .await
            .ok();
    }
    Ok(())
}

/// (c) Evict idle, non-loading, not-needed-soon resident models from RAM once the
/// observed RAM budget is exceeded. Mirrors the original process manager's
/// synchronous residency update rather than waiting for the child's ack (the
/// child's own report will correct this if it disagrees).
async fn evict_ram(
    registry: &mut ProcessRegistry,
    models: &mut ModelResidency,
    deque: &DequeState,
    catalog: &ModelCatalog,
    limits: &SchedulerLimits,
) -> Result<(), OrchestratorError> {
    let total_ram: u64 = registry.iter().map(|p| p.ram_bytes).sum();
    if total_ram <= limits.ram_budget_bytes {
        return Ok(());
    }

    let mut needed_soon: std::collections::HashSet<String> = std::collections::HashSet::new();
    for job in deque.deque.iter() {
        if needed_soon.len() >= limits.max_concurrent_inference {
            break;
        }
        needed_soon.insert(job.model.clone());
    }

    let candidates = registry
        .idle_inference_with_resident_model()
        .into_iter()
        .filter(|(_, model)| !models.is_loading(model))
        .filter(|(_, model)| !needed_soon.contains(model))
        .collect::<Vec<_>>();

    for (pid, model) in candidates {
        let _ = catalog.get(&model);
        if let Some(proc) = registry.get(pid) {
            proc.control_tx
                .send(ControlMessage::UnloadFromRam {
                    model: model.clone(),
                })
                .await
                .ok();
        }
        models.update(&model, LoadState::OnDisk, pid);
        if let Some(proc) = registry.get_mut(pid) {
            proc.resident_model = None;
        }
    }
    Ok(())
}

/// (d) Hand the head of `pending-safety` to an available safety worker, one per
/// tick, matching typical classifier latency.
async fn start_safety(
    registry: &mut ProcessRegistry,
    safety: &mut SafetyState,
    catalog: &ModelCatalog,
    limits: &SchedulerLimits,
) -> Result<(), OrchestratorError> {
    if safety.pending.is_empty() {
        return Ok(());
    }
    let Some(pid) = registry.first_available_safety() else {
        return Ok(());
    };
    let Some(record) = safety.pending.pop_front() else {
        return Ok(());
    };

    if record.job.job_id.is_empty() || record.job.params.prompt.is_empty() {
        return Err(OrchestratorError::PipelineInvariant(
            "safety record missing required fields".to_string(),
        ));
    }

    let model_reference = catalog.get(&record.job.model).cloned();
    let Some(model_reference) = model_reference else {
        return Err(OrchestratorError::Configuration(format!(
            "model '{}' has no catalog entry",
            record.job.model
        )));
    };

    let msg = ControlMessage::EvaluateSafety {
        job_id: record.job.job_id.clone(),
        images_b64: vec![record.image_b64.clone()],
        prompt: record.job.params.prompt.clone(),
        censor_nsfw: record.job.params.censor_nsfw,
        sfw_worker: !limits.accept_nsfw,
        model_reference,
    };

    safety.being_checked.push(record);
    if let Some(proc) = registry.get(pid) {
        proc.control_tx.send(msg).await.ok();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridimg_core::{
        Baseline, GenerationParams, JobDescriptor, ModelReference, ProcessKind, ProcessState,
    };
    use proptest::prelude::*;
    use tokio::sync::mpsc;

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

    fn insert_inference(
        registry: &mut ProcessRegistry,
        pid: u32,
        state: ProcessState,
        resident_model: Option<&str>,
    ) -> mpsc::Receiver<ControlMessage> {
        let (tx, rx) = mpsc::channel(8);
        registry.insert(crate::registry::ProcessEntry {
            pid,
            kind: ProcessKind::Inference,
            last_state: state,
            resident_model: resident_model.map(str::to_string),
            ram_bytes: 0,
            vram_bytes: 0,
            total_vram_bytes: 0,
            control_tx: tx,
        });
        rx
    }

    fn limits() -> SchedulerLimits {
        SchedulerLimits {
            max_concurrent_inference: 1,
            ram_budget_bytes: u64::MAX,
            accept_nsfw: true,
        }
    }

    async fn catalog_with(model: &str, baseline: Baseline) -> ModelCatalog {
        // ModelCatalog has no in-memory constructor; build one through the
        // same load path the production code uses, against a temp file.
        let path = std::env::temp_dir().join(format!(
            "scheduler-test-catalog-{model}-{}.json",
            std::process::id()
        ));
        let entries = vec![ModelReference {
            name: model.to_string(),
            baseline,
            raw_record: serde_json::json!({}),
        }];
        std::fs::write(&path, serde_json::to_vec(&entries).unwrap()).unwrap();
        let catalog = ModelCatalog::load(&path).await.unwrap();
        std::fs::remove_file(&path).ok();
        catalog
    }

    #[tokio::test]
    async fn preload_is_idempotent_for_a_loading_model() {
        let mut registry = ProcessRegistry::default();
        let mut rx = insert_inference(&mut registry, 0, ProcessState::WaitingForJob, None);
        let mut models = ModelResidency::default();
        models.update("sd1", LoadState::Loading, 0);

        let mut deque = DequeState::default();
        deque.deque.push_back(job("job-1", "sd1"));

        preload(&mut registry, &mut models, &deque, &limits())
            .await
            .unwrap();

        assert!(rx.try_recv().is_err(), "no PreloadModel should be sent for an already-loading model");
    }

    #[tokio::test]
    async fn start_inference_unloads_other_idle_vram_residents() {
        let mut registry = ProcessRegistry::default();
        let mut owner_rx = insert_inference(&mut registry, 0, ProcessState::WaitingForJob, None);
        let mut other_rx =
            insert_inference(&mut registry, 1, ProcessState::WaitingForJob, Some("sd2"));

        let mut models = ModelResidency::default();
        models.update("sd1", LoadState::LoadedInVram, 0);
        models.update("sd2", LoadState::LoadedInVram, 1);

        let mut deque = DequeState::default();
        deque.deque.push_back(job("job-1", "sd1"));

        start_inference(&mut registry, &mut models, &mut deque, &limits())
            .await
            .unwrap();

        assert_eq!(deque.in_progress.len(), 1);
        assert!(matches!(
            other_rx.try_recv(),
            Ok(ControlMessage::UnloadFromVram { model }) if model == "sd2"
        ));
        assert!(matches!(
            owner_rx.try_recv(),
            Ok(ControlMessage::StartInference { .. })
        ));
    }

    #[tokio::test]
    async fn start_inference_respects_concurrency_limit() {
        let mut registry = ProcessRegistry::default();
        let _rx = insert_inference(&mut registry, 0, ProcessState::WaitingForJob, None);
        let mut models = ModelResidency::default();
        models.update("sd1", LoadState::LoadedInVram, 0);

        let mut deque = DequeState::default();
        deque.deque.push_back(job("job-1", "sd1"));
        deque.in_progress.push(job("already-running", "sd1"));

        let mut limits = limits();
        limits.max_concurrent_inference = 1;

        start_inference(&mut registry, &mut models, &mut deque, &limits)
            .await
            .unwrap();

        assert_eq!(deque.in_progress.len(), 1, "no new job should start over the limit");
    }

    #[tokio::test]
    async fn evict_ram_skips_models_needed_soon() {
        let mut registry = ProcessRegistry::default();
        let mut rx = insert_inference(&mut registry, 0, ProcessState::WaitingForJob, Some("sd1"));
        registry.get_mut(0).unwrap().ram_bytes = 10 * 1024 * 1024 * 1024;

        let mut models = ModelResidency::default();
        models.update("sd1", LoadState::LoadedInRam, 0);

        let mut deque = DequeState::default();
        deque.deque.push_back(job("job-1", "sd1"));

        let catalog = catalog_with("sd1", Baseline::Sd1).await;
        let mut limits = limits();
        limits.ram_budget_bytes = 1024;

        evict_ram(&mut registry, &mut models, &deque, &catalog, &limits)
            .await
            .unwrap();

        assert!(
            rx.try_recv().is_err(),
            "sd1 is needed by the next job in the deque and must not be evicted"
        );
        assert!(models.is_loaded("sd1"));
    }

    #[tokio::test]
    async fn evict_ram_unloads_models_not_needed_when_over_budget() {
        let mut registry = ProcessRegistry::default();
        let mut rx = insert_inference(&mut registry, 0, ProcessState::WaitingForJob, Some("sd1"));
        registry.get_mut(0).unwrap().ram_bytes = 10 * 1024 * 1024 * 1024;

        let mut models = ModelResidency::default();
        models.update("sd1", LoadState::LoadedInRam, 0);

        let deque = DequeState::default();
        let catalog = catalog_with("sd1", Baseline::Sd1).await;
        let mut limits = limits();
        limits.ram_budget_bytes = 1024;

        evict_ram(&mut registry, &mut models, &deque, &catalog, &limits)
            .await
            .unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(ControlMessage::UnloadFromRam { model }) if model == "sd1"
        ));
        assert!(!models.is_loaded("sd1"));
        assert_eq!(registry.get(0).unwrap().resident_model, None);
    }

    proptest! {
        /// I-J3: `in_progress.len() <= max_concurrent_inference` holds at every
        /// tick, for any interleaving of job arrivals and completions, driven
        /// against the real `start_inference` scheduling step and `DequeState`
        /// (§8). Completions are simulated the way `InferenceResult` retires
        /// the deque's head in the dispatcher.
        #[test]
        fn in_progress_never_exceeds_concurrency_limit(
            limit in 1usize..4,
            worker_count in 1usize..4,
            ticks in proptest::collection::vec(any::<bool>(), 1..60),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let outcome: Result<(), proptest::test_runner::TestCaseError> = rt.block_on(async {
                let mut registry = ProcessRegistry::default();
                let mut models = ModelResidency::default();
                for pid in 0..worker_count as u32 {
                    insert_inference(&mut registry, pid, ProcessState::WaitingForJob, Some("sd1"));
                    models.update("sd1", LoadState::LoadedInVram, pid);
                }

                let mut deque = DequeState::default();
                let mut limits = limits();
                limits.max_concurrent_inference = limit;

                let mut next_job_id = 0u64;
                for add_job in ticks {
                    if add_job {
                        deque.deque.push_back(job(&format!("job-{next_job_id}"), "sd1"));
                        next_job_id += 1;
                    } else if let Some(finished) = deque.in_progress.first().cloned() {
                        deque.in_progress.retain(|j| j.job_id != finished.job_id);
                        deque.deque.pop_front();
                    }

                    start_inference(&mut registry, &mut models, &mut deque, &limits)
                        .await
                        .unwrap();

                    prop_assert!(deque.in_progress.len() <= limit);
                }
                Ok(())
            });
            outcome?;
        }
    }
}
