pub mod sink;
pub mod surface;
#[cfg(feature = "vpx")]
pub mod webm_sink;

pub use sink::{CapturedFrame, SinkFactory, VideoSink};
pub use surface::Surface;

use std::time::Duration;

/// Size and cadence of the off-screen capture surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureSettings {
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Pick the encoder available in this build
pub fn default_sink_factory(bitrate_kbps: u32) -> Box<dyn SinkFactory> {
    #[cfg(feature = "vpx")]
    {
        Box::new(webm_sink::WebmSinkFactory::new(bitrate_kbps))
    }
    #[cfg(not(feature = "vpx"))]
    {
        tracing::warn!(
            "Built without the `vpx` feature, recording is unavailable (bitrate {} kbps ignored)",
            bitrate_kbps
        );
        Box::new(sink::UnavailableSinkFactory)
    }
}
