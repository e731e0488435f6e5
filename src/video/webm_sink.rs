use super::CaptureSettings;
use super::sink::{CapturedFrame, SinkFactory, VideoSink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use image::RgbImage;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use webm::mux::{self, Track};

enum EncodeCommand {
    Frame(CapturedFrame),
    Finalize { reply: oneshot::Sender<Result<()>> },
}

pub struct WebmSinkFactory {
    bitrate_kbps: u32,
}

impl WebmSinkFactory {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }
}

impl SinkFactory for WebmSinkFactory {
    fn open(
        &self,
        settings: &CaptureSettings,
        chunk_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(WebmSink::new(*settings, self.bitrate_kbps, chunk_tx)?))
    }
}

/// VP8 encoder muxed into WebM, running on a dedicated blocking thread
///
/// Frames are sent to the thread over a channel. The muxer needs to seek back
/// to patch the segment header, so the whole container is emitted as one
/// chunk when the sink is finalized.
pub struct WebmSink {
    tx: mpsc::UnboundedSender<EncodeCommand>,
}

impl WebmSink {
    pub fn new(
        settings: CaptureSettings,
        bitrate_kbps: u32,
        chunk_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let encoder = match vpx_encode::Encoder::new(vpx_encode::Config {
                width: settings.width,
                height: settings.height,
                timebase: [1, 1000], // millisecond time base
                bitrate: bitrate_kbps,
                codec: vpx_encode::VideoCodecId::VP8,
            }) {
                Ok(encoder) => encoder,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow::anyhow!("Failed to create VP8 encoder: {}", e)));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            encode_thread(encoder, settings, rx, chunk_tx);
        });

        ready_rx
            .recv()
            .context("Encoder thread exited during startup")??;

        tracing::debug!(
            "WebM sink opened: {}x{} @ {} kbps",
            settings.width,
            settings.height,
            bitrate_kbps
        );
        Ok(Self { tx })
    }
}

#[async_trait]
impl VideoSink for WebmSink {
    fn write_frame(&mut self, frame: CapturedFrame) -> Result<()> {
        self.tx
            .send(EncodeCommand::Frame(frame))
            .map_err(|e| anyhow::anyhow!("Failed to send frame to encoder: {}", e))
    }

    async fn finalize(&mut self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EncodeCommand::Finalize { reply })
            .map_err(|e| anyhow::anyhow!("Failed to send finalize command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive finalize response: {}", e))?
    }
}

fn encode_thread(
    mut encoder: vpx_encode::Encoder,
    settings: CaptureSettings,
    mut rx: mpsc::UnboundedReceiver<EncodeCommand>,
    chunk_tx: mpsc::UnboundedSender<Bytes>,
) {
    let buffer = SharedBuffer::default();
    let Some(mut segment) = mux::Segment::new(mux::Writer::new(buffer.clone())) else {
        tracing::error!("Failed to create WebM segment");
        return;
    };
    let mut track = segment.add_video_track(
        settings.width,
        settings.height,
        None,
        mux::VideoCodecId::VP8,
    );

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            EncodeCommand::Frame(frame) => {
                let yuv = rgb_to_i420(&frame.image);
                let pts = frame.timestamp.as_millis() as i64;
                match encoder.encode(pts, &yuv) {
                    Ok(packets) => {
                        for packet in packets {
                            track.add_frame(packet.data, millis_to_nanos(packet.pts), packet.key);
                        }
                    }
                    Err(e) => tracing::error!("VP8 encode failed: {}", e),
                }
            }
            EncodeCommand::Finalize { reply } => {
                let result = flush_encoder(encoder, &mut track).map(|()| {
                    let _ = segment.finalize(None);
                    buffer.take()
                });
                let result = result.and_then(|bytes| {
                    chunk_tx
                        .send(Bytes::from(bytes))
                        .map_err(|_| anyhow::anyhow!("Chunk receiver dropped"))
                });
                let _ = reply.send(result);
                return;
            }
        }
    }
}

fn flush_encoder(encoder: vpx_encode::Encoder, track: &mut mux::VideoTrack) -> Result<()> {
    let mut frames = encoder
        .finish()
        .map_err(|e| anyhow::anyhow!("Failed to finish VP8 stream: {}", e))?;
    while let Some(packet) = frames
        .next()
        .map_err(|e| anyhow::anyhow!("Failed to drain VP8 stream: {}", e))?
    {
        track.add_frame(packet.data, millis_to_nanos(packet.pts), packet.key);
    }
    Ok(())
}

fn millis_to_nanos(pts: i64) -> u64 {
    pts.max(0) as u64 * 1_000_000
}

/// Convert packed RGB to planar I420 (BT.601, studio swing).
///
/// Width and height must be even.
pub fn rgb_to_i420(image: &RgbImage) -> Vec<u8> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let luma_len = width * height;
    let chroma_len = luma_len / 4;
    let mut out = vec![0u8; luma_len + 2 * chroma_len];
    let (y_plane, chroma) = out.split_at_mut(luma_len);
    let (u_plane, v_plane) = chroma.split_at_mut(chroma_len);

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(i32::from);
        let luma = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        y_plane[y as usize * width + x as usize] = luma.clamp(0, 255) as u8;

        if x % 2 == 0 && y % 2 == 0 {
            let idx = (y as usize / 2) * (width / 2) + x as usize / 2;
            let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
            let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
            u_plane[idx] = u.clamp(0, 255) as u8;
            v_plane[idx] = v.clamp(0, 255) as u8;
        }
    }

    out
}

/// In-memory `Write + Seek` target the muxer can own while we keep access
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Cursor<Vec<u8>>>>);

impl SharedBuffer {
    fn take(&self) -> Vec<u8> {
        match self.0.lock() {
            Ok(mut cursor) => std::mem::take(cursor.get_mut()),
            Err(_) => Vec::new(),
        }
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("buffer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedBuffer {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("buffer lock poisoned"))?
            .seek(pos)
    }
}
