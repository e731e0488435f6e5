use crate::download::{DownloadTarget, RECORDING_FILENAME};
use crate::messages::{RecordingState, Transition};
use crate::services::capture;
use crate::services::feed::FrameSlot;
use crate::task::TaskHandle;
use crate::video::{CaptureSettings, CapturedFrame, SinkFactory, VideoSink};
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

const FRAME_QUEUE: usize = 8;

/// Resources that only exist while a recording is running
struct ActiveRecording {
    sink: Box<dyn VideoSink>,
    capture: TaskHandle,
    frame_rx: mpsc::Receiver<CapturedFrame>,
    chunk_rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Coordinates frame capture, encoding and the final download
///
/// This session:
/// - Opens a fresh sink and capture pipeline per recording
/// - Streams captured frames into the sink
/// - Buffers every non-empty encoded chunk in emission order
/// - Concatenates the buffer into one download when stopped
///
/// Invalid transitions (start while busy, stop while idle) are no-ops.
pub struct RecordingSession {
    state: RecordingState,
    buffer: Vec<Bytes>,
    settings: CaptureSettings,
    frames: watch::Receiver<FrameSlot>,
    sinks: Box<dyn SinkFactory>,
    downloads: Box<dyn DownloadTarget>,
    active: Option<ActiveRecording>,
}

impl RecordingSession {
    pub fn new(
        settings: CaptureSettings,
        frames: watch::Receiver<FrameSlot>,
        sinks: Box<dyn SinkFactory>,
        downloads: Box<dyn DownloadTarget>,
    ) -> Self {
        Self {
            state: RecordingState::Idle,
            buffer: Vec::new(),
            settings,
            frames,
            sinks,
            downloads,
            active: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }

    pub fn start(&mut self) -> Result<Transition> {
        if self.state != RecordingState::Idle {
            tracing::warn!(state = ?self.state, "Start ignored, session is busy");
            return Ok(Transition::Ignored);
        }

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let sink = self
            .sinks
            .open(&self.settings, chunk_tx)
            .context("Failed to open video sink")?;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let capture = capture::spawn(self.frames.clone(), self.settings, frame_tx);

        self.active = Some(ActiveRecording {
            sink,
            capture,
            frame_rx,
            chunk_rx,
        });
        self.state = RecordingState::Recording;
        tracing::info!(
            "Recording started ({}x{} @ {} fps)",
            self.settings.width,
            self.settings.height,
            self.settings.fps
        );
        Ok(Transition::Applied)
    }

    /// Wait for the next captured frame or encoded chunk and handle it.
    ///
    /// Never completes while no recording is active. Cancel safe. An error
    /// means the sink rejected a frame; capture is already stopped and the
    /// caller should stop the recording.
    pub async fn pump(&mut self) -> Result<()> {
        let Self { active, buffer, .. } = self;
        let Some(active) = active.as_mut() else {
            return std::future::pending().await;
        };

        tokio::select! {
            Some(frame) = active.frame_rx.recv() => {
                if let Err(e) = active.sink.write_frame(frame) {
                    active.capture.stop();
                    return Err(e.context("Failed to write video frame"));
                }
            }
            Some(chunk) = active.chunk_rx.recv() => push_chunk(buffer, chunk),
            else => std::future::pending::<()>().await,
        }
        Ok(())
    }

    /// Close the capture gate and move to `Finalizing`.
    ///
    /// Returns false (and changes nothing) unless a recording is running.
    pub fn begin_stop(&mut self) -> bool {
        if self.state != RecordingState::Recording {
            tracing::debug!(state = ?self.state, "Stop ignored, not recording");
            return false;
        }

        if let Some(active) = &self.active {
            active.capture.stop();
        }
        self.state = RecordingState::Finalizing;
        tracing::info!("Stopping recording");
        true
    }

    /// Finish a recording started by [`begin_stop`](Self::begin_stop) and
    /// offer it for download.
    ///
    /// The buffer is cleared and the session is `Idle` afterwards whether or
    /// not finalization succeeded.
    pub async fn finalize(&mut self) -> Result<Option<PathBuf>> {
        if self.state != RecordingState::Finalizing {
            return Ok(None);
        }

        let result = self.finish_active().await;
        self.buffer.clear();
        self.state = RecordingState::Idle;

        match &result {
            Ok(path) => tracing::info!("Recording offered as {:?}", path),
            Err(e) => tracing::error!("Recording failed: {:#}", e),
        }
        result.map(Some)
    }

    async fn finish_active(&mut self) -> Result<PathBuf> {
        let mut active = self
            .active
            .take()
            .ok_or_else(|| anyhow::anyhow!("No active recording to finalize"))?;

        // Frames captured before the gate closed still belong to the recording
        while let Ok(frame) = active.frame_rx.try_recv() {
            if let Err(e) = active.sink.write_frame(frame) {
                tracing::error!("Failed to write video frame during drain: {:#}", e);
                break;
            }
        }

        let finalized = active.sink.finalize().await;

        while let Ok(chunk) = active.chunk_rx.try_recv() {
            push_chunk(&mut self.buffer, chunk);
        }
        finalized.context("Failed to finalize video sink")?;

        let payload = concat(&self.buffer);
        tracing::debug!(
            "Assembled {} chunks into {} bytes",
            self.buffered_chunks(),
            payload.len()
        );
        self.buffer.clear();

        self.downloads
            .offer(RECORDING_FILENAME, payload)
            .await
            .context("Failed to offer recording for download")
    }
}

fn push_chunk(buffer: &mut Vec<Bytes>, chunk: Bytes) {
    if !chunk.is_empty() {
        buffer.push(chunk);
    }
}

fn concat(chunks: &[Bytes]) -> Bytes {
    let mut out = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChunkSinkFactory, MemoryDownloads};
    use image::{Rgb, RgbImage};
    use std::sync::Arc;
    use std::time::Duration;

    fn session(
        sinks: ChunkSinkFactory,
        downloads: MemoryDownloads,
    ) -> (RecordingSession, watch::Sender<FrameSlot>) {
        let (slot_tx, slot_rx) = watch::channel(None);
        let settings = CaptureSettings {
            width: 4,
            height: 2,
            fps: 30,
        };
        let session =
            RecordingSession::new(settings, slot_rx, Box::new(sinks), Box::new(downloads));
        (session, slot_tx)
    }

    impl RecordingSession {
        async fn stop(&mut self) -> Result<Option<PathBuf>> {
            if !self.begin_stop() {
                return Ok(None);
            }
            self.finalize().await
        }
    }

    async fn pump_for(session: &mut RecordingSession, duration: Duration) {
        let _ = tokio::time::timeout(duration, async {
            loop {
                let _ = session.pump().await;
            }
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_single_download_in_order() {
        let sinks = ChunkSinkFactory::default();
        let downloads = MemoryDownloads::default();
        let (mut session, slot_tx) = session(sinks.clone(), downloads.clone());
        slot_tx.send_replace(Some(Arc::new(RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])))));

        assert_eq!(session.start().unwrap(), Transition::Applied);
        assert_eq!(session.state(), RecordingState::Recording);

        pump_for(&mut session, Duration::from_millis(100)).await;
        assert!(session.buffered_chunks() >= 1);

        let path = session.stop().await.unwrap();
        assert_eq!(path, Some(PathBuf::from(RECORDING_FILENAME)));
        assert_eq!(session.state(), RecordingState::Idle);
        assert_eq!(session.buffered_chunks(), 0);

        let offered = downloads.offered();
        assert_eq!(offered.len(), 1);
        let (name, payload) = &offered[0];
        assert_eq!(name, RECORDING_FILENAME);

        let written = sinks.frames.lock().unwrap().len();
        assert!(written >= 1);
        let expected: String = (0..written).map(|i| format!("frame{};", i)).collect();
        assert_eq!(&payload[..], expected.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_frames_still_downloads_empty_payload() {
        let downloads = MemoryDownloads::default();
        let (mut session, _slot_tx) = session(ChunkSinkFactory::default(), downloads.clone());

        session.start().unwrap();
        session.stop().await.unwrap();

        let offered = downloads.offered();
        assert_eq!(offered.len(), 1);
        assert!(offered[0].1.is_empty());
        assert_eq!(session.state(), RecordingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_noop() {
        let downloads = MemoryDownloads::default();
        let (mut session, _slot_tx) = session(ChunkSinkFactory::default(), downloads.clone());

        assert_eq!(session.stop().await.unwrap(), None);
        assert_eq!(session.stop().await.unwrap(), None);

        assert_eq!(session.state(), RecordingState::Idle);
        assert_eq!(session.buffered_chunks(), 0);
        assert!(downloads.offered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_start_is_ignored() {
        let sinks = ChunkSinkFactory::default();
        let (mut session, _slot_tx) = session(sinks.clone(), MemoryDownloads::default());

        assert_eq!(session.start().unwrap(), Transition::Applied);
        pump_for(&mut session, Duration::from_millis(50)).await;
        let buffered = session.buffered_chunks();

        assert_eq!(session.start().unwrap(), Transition::Ignored);
        assert_eq!(*sinks.opened.lock().unwrap(), 1);
        assert_eq!(session.state(), RecordingState::Recording);
        assert_eq!(session.buffered_chunks(), buffered);

        assert!(session.begin_stop());
        assert_eq!(session.start().unwrap(), Transition::Ignored);
        session.finalize().await.unwrap();
    }

    struct BrokenSinks;

    impl SinkFactory for BrokenSinks {
        fn open(
            &self,
            _settings: &CaptureSettings,
            _chunk_tx: mpsc::UnboundedSender<Bytes>,
        ) -> Result<Box<dyn VideoSink>> {
            anyhow::bail!("encoder missing")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_open_failure_stays_idle() {
        let (_slot_tx, slot_rx) = watch::channel(None);
        let settings = CaptureSettings {
            width: 4,
            height: 2,
            fps: 30,
        };
        let mut session = RecordingSession::new(
            settings,
            slot_rx,
            Box::new(BrokenSinks),
            Box::new(MemoryDownloads::default()),
        );

        assert!(session.start().is_err());
        assert_eq!(session.state(), RecordingState::Idle);
        assert_eq!(session.stop().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_frames_recorded_when_nothing_loaded() {
        let sinks = ChunkSinkFactory::default();
        let (mut session, _slot_tx) = session(sinks.clone(), MemoryDownloads::default());

        session.start().unwrap();
        pump_for(&mut session, Duration::from_millis(50)).await;
        session.stop().await.unwrap();

        let frames = sinks.frames.lock().unwrap();
        assert!(!frames.is_empty());
        assert!(frames
            .iter()
            .all(|f| f.image.pixels().all(|p| *p == Rgb([0, 0, 0]))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_failure_discards_buffer() {
        let sinks = ChunkSinkFactory {
            fail_finalize: true,
            ..ChunkSinkFactory::default()
        };
        let downloads = MemoryDownloads::default();
        let (mut session, _slot_tx) = session(sinks, downloads.clone());

        session.start().unwrap();
        pump_for(&mut session, Duration::from_millis(100)).await;
        assert!(session.stop().await.is_err());

        assert_eq!(session.state(), RecordingState::Idle);
        assert_eq!(session.buffered_chunks(), 0);
        assert!(downloads.offered().is_empty());

        // The session is usable again
        assert_eq!(session.start().unwrap(), Transition::Applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_reported() {
        let sinks = ChunkSinkFactory {
            fail_write: true,
            ..ChunkSinkFactory::default()
        };
        let (mut session, _slot_tx) = session(sinks.clone(), MemoryDownloads::default());

        session.start().unwrap();
        let result = tokio::time::timeout(Duration::from_millis(100), session.pump()).await;
        assert!(matches!(result, Ok(Err(_))));
        assert!(sinks.frames.lock().unwrap().is_empty());

        // Capture stopped with the failure; stopping still returns to Idle
        assert!(session.begin_stop());
        let _ = session.finalize().await;
        assert_eq!(session.state(), RecordingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_frames_after_stop() {
        let sinks = ChunkSinkFactory::default();
        let (mut session, _slot_tx) = session(sinks.clone(), MemoryDownloads::default());

        session.start().unwrap();
        pump_for(&mut session, Duration::from_millis(100)).await;
        session.stop().await.unwrap();
        let written = sinks.frames.lock().unwrap().len();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sinks.frames.lock().unwrap().len(), written);
    }
}
