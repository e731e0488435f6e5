use crate::messages::{ControllerCommand, DeviceReport, DeviceState, Transition};
use crate::services::{CommandDispatcher, RecordingSession};
use crate::ui::{self, UiSnapshot};

use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};

/// Single owner of device and recording state
///
/// Operator commands, device reports and recording traffic are all handled
/// on this one task, so state changes are applied strictly one at a time.
/// The UI snapshot is recomputed after each of them.
pub struct Controller {
    device: DeviceState,
    session: RecordingSession,
    dispatcher: CommandDispatcher,
    cmd_rx: mpsc::Receiver<ControllerCommand>,
    report_rx: mpsc::Receiver<DeviceReport>,
    ui_tx: watch::Sender<UiSnapshot>,
}

impl Controller {
    pub fn new(
        session: RecordingSession,
        dispatcher: CommandDispatcher,
        report_rx: mpsc::Receiver<DeviceReport>,
    ) -> (Self, ControllerHandle, watch::Receiver<UiSnapshot>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (ui_tx, ui_rx) = watch::channel(ui::reconcile(DeviceState::default(), session.state()));

        let controller = Self {
            device: DeviceState::default(),
            session,
            dispatcher,
            cmd_rx,
            report_rx,
            ui_tx,
        };
        (controller, ControllerHandle::new(cmd_tx), ui_rx)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ControllerCommand::Shutdown(reply)) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },

                Some(report) = self.report_rx.recv() => self.apply_report(report),

                // Captured frames and encoded chunks (only when recording)
                result = self.session.pump(), if self.session.is_recording() => {
                    if let Err(e) = result {
                        self.abort_recording(e).await;
                    }
                }
            }
        }

        tracing::info!("Controller stopped");
    }

    async fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::StartRecording(reply) => {
                let result = self.session.start();
                if let Err(e) = &result {
                    tracing::error!("Failed to start recording: {:#}", e);
                }
                self.publish();
                let _ = reply.send(result);
            }
            ControllerCommand::StopRecording(reply) => {
                let result = self.stop_recording().await;
                let _ = reply.send(result);
            }
            ControllerCommand::SetFlashlight(on) => {
                self.dispatcher.set_flashlight(on);
            }
            ControllerCommand::ToggleStream => {
                self.dispatcher.toggle_stream();
            }
            ControllerCommand::Shutdown(_) => {}
        }
    }

    async fn stop_recording(&mut self) -> Result<Option<PathBuf>> {
        if !self.session.begin_stop() {
            return Ok(None);
        }
        self.publish();

        let result = self.session.finalize().await;
        self.publish();
        result
    }

    /// The sink failed mid-recording; wind the session down so the UI
    /// stops showing it as recording
    async fn abort_recording(&mut self, error: anyhow::Error) {
        tracing::error!("Recording interrupted: {:#}", error);
        match self.stop_recording().await {
            Ok(Some(path)) => tracing::info!("Partial recording saved to {:?}", path),
            Ok(None) => {}
            Err(e) => tracing::error!("Partial recording lost: {:#}", e),
        }
    }

    fn apply_report(&mut self, report: DeviceReport) {
        if self.device.apply(report.feature, report.value) {
            tracing::info!(
                feature = ?report.feature,
                value = report.value,
                source = ?report.source,
                "Device state changed"
            );
        }
        self.publish();
    }

    /// Stop an active recording so its file is still offered
    async fn teardown(&mut self) {
        tracing::info!("Controller shutting down");
        if let Err(e) = self.stop_recording().await {
            tracing::error!("Recording lost during shutdown: {:#}", e);
        }
    }

    fn publish(&self) {
        let snapshot = ui::reconcile(self.device, self.session.state());
        self.ui_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Handle for communicating with the Controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    pub fn new(tx: mpsc::Sender<ControllerCommand>) -> Self {
        Self { tx }
    }

    pub async fn start_recording(&self) -> Result<Transition> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::StartRecording(reply)).await?;
        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive start response: {}", e))?
    }

    pub async fn stop_recording(&self) -> Result<Option<PathBuf>> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::StopRecording(reply)).await?;
        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive stop response: {}", e))?
    }

    pub async fn set_flashlight(&self, on: bool) -> Result<()> {
        self.send(ControllerCommand::SetFlashlight(on)).await
    }

    pub async fn toggle_stream(&self) -> Result<()> {
        self.send(ControllerCommand::ToggleStream).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::Shutdown(reply)).await?;
        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive shutdown response: {}", e))
    }

    async fn send(&self, cmd: ControllerCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send controller command: {}", e))
    }
}
