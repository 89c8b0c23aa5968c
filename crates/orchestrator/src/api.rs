use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use crate::api_loop::ApiLoop;
use crate::backend::{HttpDispatchClient, HttpUploader};
use crate::catalog::ModelCatalog;
use crate::config::OrchestratorConfig;
use crate::lifecycle::Lifecycle;
use crate::pipeline::PipelineState;

/// Handle to a running orchestrator instance, returned by [`start_orchestrator`].
pub struct OrchestratorHandle {
    stop_tx: watch::Sender<bool>,
    process_control: tokio::task::JoinHandle<()>,
    api_loop: tokio::task::JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Request a graceful shutdown: stop leasing new jobs' inference slots and
    /// end idle inference workers; the process-control loop exits once every
    /// worker has reached `Ended` and the pipeline is drained.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for both loops to finish (process-control loop exits on shutdown
    /// completion; the API loop is cancelled once shutdown is observed).
    pub async fn wait(self) -> anyhow::Result<()> {
        self.process_control
            .await
            .map_err(|err| anyhow::anyhow!("process-control loop join error: {err}"))?;
        self.stop_tx.send(true).ok();
        self.api_loop
            .await
            .map_err(|err| anyhow::anyhow!("api loop join error: {err}"))?;
        Ok(())
    }
}

/// Start a new orchestrator instance: loads the model reference catalog, spawns
/// the configured worker fleet, and runs the process-control and API loops
/// concurrently (C7 `run`).
pub async fn start_orchestrator(config: OrchestratorConfig) -> anyhow::Result<OrchestratorHandle> {
    config
        .validate()
        .map_err(|err| anyhow::anyhow!("configuration fault: {err}"))?;

    let catalog = ModelCatalog::load(&config.model_reference_catalog_path).await?;
    let config = Arc::new(config);
    let pipeline = Arc::new(PipelineState::default());

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;
    let dispatch = Arc::new(HttpDispatchClient::new(http.clone(), config.backend_url.clone()));
    let uploader = Arc::new(HttpUploader::new(http));

    let (stop_tx, stop_rx) = watch::channel(false);

    let lifecycle = Lifecycle::new(config.clone(), pipeline.clone(), catalog);
    let process_control = tokio::spawn(lifecycle.run(stop_rx.clone()));

    let api_loop = ApiLoop {
        config,
        pipeline,
        dispatch,
        uploader,
        user_info_failed: Arc::new(AtomicBool::new(false)),
    };
    let api_loop_handle = tokio::spawn(api_loop.run(stop_rx));

    Ok(OrchestratorHandle {
        stop_tx,
        process_control,
        api_loop: api_loop_handle,
    })
}
