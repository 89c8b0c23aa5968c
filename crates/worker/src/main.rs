mod cli;
mod logging;
mod shutdown;

use clap::Parser;

use gridimg_orchestrator::{start_orchestrator, OrchestratorConfig};

use crate::cli::Cli;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config: OrchestratorConfig = cli.into();
    tracing::info!(worker_name = %config.worker_name, models = ?config.image_models_to_load, "starting orchestrator");

    let handle = start_orchestrator(config).await?;

    let shutdown = std::sync::Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    tokio::select! {
        ev = shutdown_rx.recv() => {
            match ev {
                Some(ShutdownEvent::Graceful) => {
                    tracing::info!("stop requested, finishing in-flight jobs (press ctrl-c again to exit immediately)");
                    handle.request_stop();
                    handle.wait().await?;
                }
                Some(ShutdownEvent::Immediate) => {
                    tracing::warn!("stop requested again, exiting immediately");
                    std::process::exit(130);
                }
                None => {}
            }
        }
    }

    tracing::info!("orchestrator stopped");
    Ok(())
}
