use crate::device::{self, FrameSource, StreamBody};
use crate::mjpeg::MjpegDecoder;
use crate::task::{Gate, TaskHandle};
use anyhow::{Context, Result};
use futures::StreamExt;
use image::{ImageFormat, RgbImage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The most recently displayed frame, `None` until one has loaded
pub type FrameSlot = Option<Arc<RgbImage>>;

/// Per-attempt query parameter that defeats HTTP caching
///
/// Millisecond wall-clock time, bumped when needed so no two attempts share
/// a value.
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: i64,
}

impl CacheBuster {
    pub fn next(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

/// Keeps the frame slot fed from the device's MJPEG stream
///
/// Any load error schedules exactly one reconnection after `retry_delay`.
/// There is no attempt limit and no backoff: a device that never comes back
/// is retried forever at the same pace.
pub struct FeedManager {
    source: Arc<dyn FrameSource>,
    frame_tx: watch::Sender<FrameSlot>,
    retry_delay: Duration,
    cache_buster: CacheBuster,
}

impl FeedManager {
    pub fn new(
        source: Arc<dyn FrameSource>,
        frame_tx: watch::Sender<FrameSlot>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            frame_tx,
            retry_delay,
            cache_buster: CacheBuster::default(),
        }
    }

    pub fn spawn(self) -> TaskHandle {
        TaskHandle::spawn(|gate| self.run(gate))
    }

    async fn run(mut self, gate: Gate) {
        let mut attempt: u64 = 0;

        while gate.is_open() {
            attempt += 1;
            let path = device::stream_path(self.cache_buster.next());
            tracing::debug!(attempt, %path, "Connecting to stream");

            let result = match self.source.open(&path).await {
                Ok(body) => self.consume(body, &gate).await,
                Err(e) => Err(e),
            };

            if !gate.is_open() {
                break;
            }
            match result {
                Ok(()) => tracing::warn!(attempt, "Stream ended, reconnecting in {:?}", self.retry_delay),
                Err(e) => tracing::warn!(
                    attempt,
                    "Stream load failed: {:#}; reconnecting in {:?}",
                    e,
                    self.retry_delay
                ),
            }

            tokio::time::sleep(self.retry_delay).await;
        }

        tracing::debug!("Stream feed stopped");
    }

    async fn consume(&self, mut body: StreamBody, gate: &Gate) -> Result<()> {
        let mut decoder = MjpegDecoder::new(body.boundary.as_deref());
        let mut frames: u64 = 0;

        while let Some(chunk) = body.chunks.next().await {
            if !gate.is_open() {
                return Ok(());
            }
            decoder.push(&chunk.context("Stream read failed")?);

            while let Some(part) = decoder.next_part() {
                match image::load_from_memory_with_format(&part, ImageFormat::Jpeg) {
                    Ok(image) => {
                        frames += 1;
                        if frames == 1 {
                            tracing::info!(
                                "Stream connected ({}x{})",
                                image.width(),
                                image.height()
                            );
                        }
                        self.frame_tx.send_replace(Some(Arc::new(image.to_rgb8())));
                    }
                    Err(e) => tracing::debug!("Dropping undecodable frame: {}", e),
                }
            }
        }

        Ok(())
    }
}
