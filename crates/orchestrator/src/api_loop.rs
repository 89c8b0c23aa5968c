use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{DispatchApiClient, PopRequest, SubmitRequest, Uploader};
use crate::config::OrchestratorConfig;
use crate::pipeline::PipelineState;
use crate::upload::reencode_to_webp;

/// Runs the API-facing loop independently of the process-control loop (C6):
/// pop new jobs, submit finished ones, refresh user info, all on a ~100ms tick.
pub(crate) struct ApiLoop {
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) pipeline: Arc<PipelineState>,
    pub(crate) dispatch: Arc<dyn DispatchApiClient>,
    pub(crate) uploader: Arc<dyn Uploader>,
    pub(crate) user_info_failed: Arc<AtomicBool>,
}

impl ApiLoop {
    pub(crate) async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut next_pop_at = Instant::now();
        let mut next_user_info_at = Instant::now();
        let mut tick = tokio::time::interval(OrchestratorConfig::TICK_INTERVAL);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        info!("api loop stopping");
                        return;
                    }
                    continue;
                }
            }

            let now = Instant::now();

            if now >= next_pop_at {
                next_pop_at = now + self.pop_once().await;
            }

            self.submit_once().await;

            if now >= next_user_info_at {
                next_user_info_at = now + self.user_info_once().await;
            }
        }
    }

    async fn pop_once(&self) -> std::time::Duration {
        let depth = {
            let deque = self.pipeline.deque_lock.lock().await;
            deque.deque.len()
        };
        if depth >= self.config.queue_size + 1 {
            return OrchestratorConfig::DEFAULT_POP_INTERVAL;
        }

        let req = PopRequest {
            api_key: self.config.api_key.clone(),
            worker_name: self.config.worker_name.clone(),
            bridge_agent: format!("gridimg-worker:{}", env!("CARGO_PKG_VERSION")),
            models: self.config.image_models_to_load.clone(),
            nsfw: self.config.nsfw,
            threads: self.config.max_concurrent_inference_processes,
            max_pixels: self.config.max_pixels(),
            allow_img2img: self.config.allow_img2img,
            allow_inpainting: self.config.allow_inpainting,
            allow_post_processing: self.config.allow_post_processing,
            allow_controlnet: self.config.allow_controlnet,
            allow_lora: false,
            allow_unsafe_ip: self.config.allow_unsafe_ip,
            require_upfront_kudos: self.config.require_upfront_kudos,
        };

        match self.dispatch.pop_job(req).await {
            Ok(resp) => match resp.job {
                Some(job) => {
                    info!(job_id = %job.job_id, model = %job.model, "popped job");
                    let mut deque = self.pipeline.deque_lock.lock().await;
                    deque.deque.push_back(job);
                    OrchestratorConfig::DEFAULT_POP_INTERVAL
                }
                None => {
                    debug!(skipped = %resp.skipped, "no job available");
                    OrchestratorConfig::DEFAULT_POP_INTERVAL
                }
            },
            Err(err) => {
                warn!(error = %err, "job pop failed, backing off");
                OrchestratorConfig::ERROR_POP_INTERVAL
            }
        }
    }

    async fn submit_once(&self) {
        let record = {
            let completed = self.pipeline.completed_lock.lock().await;
            completed.records.front().cloned()
        };
        let Some(record) = record else {
            return;
        };
        let Some(censored) = record.censored else {
            // I-J4: never submit before censored is set.
            return;
        };

        let webp = match reencode_to_webp(&record.image_b64) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(job_id = %record.job.job_id, error = %err, "failed to re-encode image, will retry next tick");
                return;
            }
        };

        let put_status = match self.uploader.put(&record.job.upload_url, webp).await {
            Ok(status) => status,
            Err(err) => {
                warn!(job_id = %record.job.job_id, error = %err, "upload failed, will retry next tick");
                return;
            }
        };
        if !(200..300).contains(&put_status) {
            warn!(job_id = %record.job.job_id, status = put_status, "upload rejected, will retry next tick");
            return;
        }

        let submit_req = SubmitRequest {
            api_key: self.config.api_key.clone(),
            job_id: record.job.job_id.clone(),
            seed: record.job.params.seed,
            generation: "R2".to_string(),
            state: record.state,
            censored,
        };

        match self.dispatch.submit_job(submit_req).await {
            Ok(resp) => {
                info!(job_id = %record.job.job_id, reward = resp.reward, "submitted job");
                let mut completed = self.pipeline.completed_lock.lock().await;
                if completed
                    .records
                    .front()
                    .is_some_and(|r| r.job.job_id == record.job.job_id)
                {
                    completed.records.pop_front();
                }
            }
            Err(err) => {
                warn!(job_id = %record.job.job_id, error = %err, "submit failed, will retry next tick");
            }
        }
    }

    async fn user_info_once(&self) -> std::time::Duration {
        match self.dispatch.find_user(&self.config.api_key).await {
            Ok(user) => {
                self.user_info_failed.store(false, Ordering::Relaxed);
                debug!(username = %user.username, kudos = user.kudos, "refreshed user info");
                OrchestratorConfig::USER_INFO_INTERVAL
            }
            Err(err) => {
                self.user_info_failed.store(true, Ordering::Relaxed);
                warn!(error = %err, "user info refresh failed");
                OrchestratorConfig::USER_INFO_INTERVAL
            }
        }
    }
}
