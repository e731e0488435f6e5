use crate::device::{self, DeviceApi};
use crate::messages::{DeviceReport, Feature, ReportSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sends fire-and-forget control requests to the device
///
/// Local state is only ever updated from what the device echoes back. A
/// failed request changes nothing; the next status poll corrects any drift.
#[derive(Clone)]
pub struct CommandDispatcher {
    api: Arc<dyn DeviceApi>,
    report_tx: mpsc::Sender<DeviceReport>,
}

impl CommandDispatcher {
    pub fn new(api: Arc<dyn DeviceApi>, report_tx: mpsc::Sender<DeviceReport>) -> Self {
        Self { api, report_tx }
    }

    pub fn set_flashlight(&self, on: bool) -> JoinHandle<()> {
        let api = self.api.clone();
        let report_tx = self.report_tx.clone();

        tokio::spawn(async move {
            let path = device::flashlight_path(on);
            let echoed = match api.get_text(&path).await {
                Ok(body) => device::parse_flag(&body),
                Err(e) => Err(e),
            };

            match echoed {
                Ok(value) => {
                    tracing::info!(requested = on, applied = value, "Flashlight command answered");
                    let report = DeviceReport {
                        feature: Feature::Flashlight,
                        value,
                        source: ReportSource::Command,
                    };
                    let _ = report_tx.send(report).await;
                }
                Err(e) => tracing::warn!(requested = on, "Flashlight command failed: {:#}", e),
            }
        })
    }

    pub fn toggle_stream(&self) -> JoinHandle<()> {
        let api = self.api.clone();

        tokio::spawn(async move {
            match api.get_text("/toggleStream").await {
                Ok(body) => tracing::info!("Toggle stream: {}", body.trim()),
                Err(e) => tracing::warn!("Toggle stream failed: {:#}", e),
            }
        })
    }
}
