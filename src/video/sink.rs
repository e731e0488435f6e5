use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use image::RgbImage;
use std::time::Duration;
use tokio::sync::mpsc;

use super::CaptureSettings;

/// One copy of the capture surface
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: RgbImage,
    /// Time since the recording started
    pub timestamp: Duration,
}

/// Trait for streaming video encoding
///
/// Encoded output is emitted as chunks on the channel handed to
/// [`SinkFactory::open`]. Every chunk must be sent before `finalize` returns.
#[async_trait]
pub trait VideoSink: Send {
    /// Write one captured frame (called repeatedly during recording)
    fn write_frame(&mut self, frame: CapturedFrame) -> Result<()>;

    /// Flush the encoder and emit the remaining chunks
    async fn finalize(&mut self) -> Result<()>;
}

/// Opens a fresh sink for each recording
pub trait SinkFactory: Send {
    fn open(
        &self,
        settings: &CaptureSettings,
        chunk_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn VideoSink>>;
}

/// Used when no encoder was compiled in
#[cfg(not(feature = "vpx"))]
pub struct UnavailableSinkFactory;

#[cfg(not(feature = "vpx"))]
impl SinkFactory for UnavailableSinkFactory {
    fn open(
        &self,
        _settings: &CaptureSettings,
        _chunk_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn VideoSink>> {
        Err(anyhow::anyhow!(
            "No video encoder available: rebuild with `--features vpx`"
        ))
    }
}
