use crate::device::{self, DeviceApi};
use crate::messages::{DeviceReport, Feature, ReportSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Polls the device's status endpoints on a fixed interval
///
/// Each feature has its own ticker and every request is spawned on its own,
/// so a slow response never holds up the other feature or the next tick.
/// A request still unanswered after `timeout` is abandoned, which bounds the
/// number in flight per feature. Failures are logged and dropped; the next
/// tick is the retry.
pub struct StatusPoller {
    api: Arc<dyn DeviceApi>,
    interval: Duration,
    timeout: Duration,
    report_tx: mpsc::Sender<DeviceReport>,
}

impl StatusPoller {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        interval: Duration,
        timeout: Duration,
        report_tx: mpsc::Sender<DeviceReport>,
    ) -> Self {
        Self {
            api,
            interval,
            timeout,
            report_tx,
        }
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        tracing::info!("Polling device status every {:?}", self.interval);
        Feature::ALL
            .into_iter()
            .map(|feature| {
                tokio::spawn(poll_feature(
                    self.api.clone(),
                    feature,
                    self.interval,
                    self.timeout,
                    self.report_tx.clone(),
                ))
            })
            .collect()
    }
}

async fn poll_feature(
    api: Arc<dyn DeviceApi>,
    feature: Feature,
    interval: Duration,
    timeout: Duration,
    report_tx: mpsc::Sender<DeviceReport>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if report_tx.is_closed() {
            tracing::debug!(?feature, "Report channel closed, poller exiting");
            break;
        }

        let api = api.clone();
        let report_tx = report_tx.clone();
        tokio::spawn(async move {
            let polled = device::fetch_status(api.as_ref(), feature);
            match tokio::time::timeout(timeout, polled).await {
                Ok(Ok(value)) => {
                    tracing::debug!(?feature, value, "Status polled");
                    let report = DeviceReport {
                        feature,
                        value,
                        source: ReportSource::Poll,
                    };
                    let _ = report_tx.send(report).await;
                }
                Ok(Err(e)) => tracing::warn!(?feature, "Status poll failed: {:#}", e),
                Err(_) => tracing::warn!(?feature, ?timeout, "Status poll timed out"),
            }
        });
    }
}
