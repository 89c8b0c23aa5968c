use std::process::Stdio;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gridimg_core::{ControlMessage, ProcessKind, ReportMessage};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// A spawned child worker: a real OS subprocess talked to over length-prefixed,
/// serde-framed stdio (C8). Control messages are written here; reports are
/// forwarded onto the orchestrator-wide shared channel by a background task.
pub(crate) struct ChildProcess {
    pub(crate) pid: u32,
    pub(crate) kind: ProcessKind,
    control_tx: mpsc::Sender<ControlMessage>,
}

impl ChildProcess {
    /// Spawn `worker_binary` with `--kind` and `--pid` arguments, wire up framed
    /// stdio, and forward decoded reports onto `reports_tx`. The returned sender
    /// half is handed to the registry entry for this pid.
    pub(crate) fn spawn(
        worker_binary: &std::path::Path,
        pid: u32,
        kind: ProcessKind,
        reports_tx: mpsc::UnboundedSender<ReportMessage>,
    ) -> anyhow::Result<(Self, tokio::sync::oneshot::Receiver<()>)> {
        let kind_arg = match kind {
            ProcessKind::Inference => "inference",
            ProcessKind::Safety => "safety",
            ProcessKind::Download => "download",
        };

        let mut child = Command::new(worker_binary)
            .arg("--kind")
            .arg(kind_arg)
            .arg("--pid")
            .arg(pid.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let mut writer = FramedWrite::new(stdin, LengthDelimitedCodec::new());
        let mut reader = FramedRead::new(stdout, LengthDelimitedCodec::new());

        let (control_tx, mut control_rx) = mpsc::channel::<ControlMessage>(32);
        let (exited_tx, exited_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                let Ok(bytes) = serde_json::to_vec(&msg) else {
                    continue;
                };
                if writer.send(Bytes::from(bytes)).await.is_err() {
                    break;
                }
            }
        });

        let reports_for_reader = reports_tx.clone();
        tokio::spawn(async move {
            while let Some(Ok(frame)) = reader.next().await {
                if let Ok(report) = serde_json::from_slice::<ReportMessage>(&frame) {
                    let _ = reports_for_reader.send(report);
                }
            }
        });

        tokio::spawn(async move {
            // An unexpected exit (the child never reported ENDED) is the same
            // fault class as a report referencing an unknown pid: the registry
            // has no representation for "process vanished without saying so".
            let _ = child.wait().await;
            let _ = exited_tx.send(());
        });

        Ok((
            Self {
                pid,
                kind,
                control_tx,
            },
            exited_rx,
        ))
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<ControlMessage> {
        self.control_tx.clone()
    }
}
