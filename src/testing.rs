//! Scripted stand-ins for the device, encoder and download target.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::device::{DeviceApi, FrameSource, StreamBody};
use crate::download::DownloadTarget;
use crate::video::{CaptureSettings, CapturedFrame, SinkFactory, VideoSink};

#[derive(Clone, Debug)]
pub enum Reply {
    Body(String),
    Fail,
}

pub fn body(text: &str) -> Reply {
    Reply::Body(text.to_string())
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    delay: Duration,
}

/// Device whose answers are scripted per path. The last scripted reply for a
/// path repeats forever; unscripted paths fail.
#[derive(Default)]
pub struct FakeDevice {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: &str, replies: impl IntoIterator<Item = Reply>) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(path.to_string()).or_default().replies = replies.into_iter().collect();
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(path.to_string()).or_default().delay = delay;
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceApi for FakeDevice {
    async fn get_text(&self, path_and_query: &str) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push(path_and_query.to_string());

        let (reply, delay) = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(path_and_query) {
                Some(script) => {
                    let reply = if script.replies.len() > 1 {
                        script.replies.pop_front()
                    } else {
                        script.replies.front().cloned()
                    };
                    (reply.unwrap_or(Reply::Fail), script.delay)
                }
                None => (Reply::Fail, Duration::ZERO),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Body(text) => Ok(text),
            Reply::Fail => Err(anyhow::anyhow!("scripted failure for {}", path_and_query)),
        }
    }
}

#[derive(Clone)]
pub enum SourceReply {
    /// Connection refused
    Fail,
    /// Body delivers these chunks, then stays open
    Open(Vec<Bytes>),
}

/// Stream source recording every connection attempt
#[derive(Default)]
pub struct FakeSource {
    replies: Mutex<VecDeque<SourceReply>>,
    attempts: Mutex<Vec<(String, Instant)>>,
}

impl FakeSource {
    pub fn new(replies: impl IntoIterator<Item = SourceReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            attempts: Mutex::default(),
        })
    }

    pub fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn open(&self, path_and_query: &str) -> Result<StreamBody> {
        self.attempts
            .lock()
            .unwrap()
            .push((path_and_query.to_string(), Instant::now()));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SourceReply::Fail);

        match reply {
            SourceReply::Fail => Err(anyhow::anyhow!("connection refused")),
            SourceReply::Open(chunks) => {
                let chunks = futures::stream::iter(chunks.into_iter().map(Ok))
                    .chain(futures::stream::pending())
                    .boxed();
                Ok(StreamBody {
                    boundary: Some("frame".to_string()),
                    chunks,
                })
            }
        }
    }
}

/// Encode a solid-colour JPEG
pub fn jpeg(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// Wrap JPEG bytes as one multipart part with the `frame` boundary
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Sink that emits one `frame<n>;` chunk per written frame and an empty
/// chunk on finalize
#[derive(Clone, Default)]
pub struct ChunkSinkFactory {
    pub frames: Arc<Mutex<Vec<CapturedFrame>>>,
    pub opened: Arc<Mutex<usize>>,
    pub fail_write: bool,
    pub fail_finalize: bool,
}

struct ChunkSink {
    frames: Arc<Mutex<Vec<CapturedFrame>>>,
    chunk_tx: mpsc::UnboundedSender<Bytes>,
    written: usize,
    fail_write: bool,
    fail_finalize: bool,
}

impl SinkFactory for ChunkSinkFactory {
    fn open(
        &self,
        _settings: &CaptureSettings,
        chunk_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn VideoSink>> {
        *self.opened.lock().unwrap() += 1;
        Ok(Box::new(ChunkSink {
            frames: self.frames.clone(),
            chunk_tx,
            written: 0,
            fail_write: self.fail_write,
            fail_finalize: self.fail_finalize,
        }))
    }
}

#[async_trait]
impl VideoSink for ChunkSink {
    fn write_frame(&mut self, frame: CapturedFrame) -> Result<()> {
        if self.fail_write {
            return Err(anyhow::anyhow!("encoder rejected frame"));
        }
        let chunk = Bytes::from(format!("frame{};", self.written));
        self.written += 1;
        self.frames.lock().unwrap().push(frame);
        self.chunk_tx
            .send(chunk)
            .map_err(|_| anyhow::anyhow!("chunk receiver dropped"))
    }

    async fn finalize(&mut self) -> Result<()> {
        if self.fail_finalize {
            return Err(anyhow::anyhow!("encoder exploded"));
        }
        let _ = self.chunk_tx.send(Bytes::new());
        Ok(())
    }
}

/// Download target keeping payloads in memory
#[derive(Clone, Default)]
pub struct MemoryDownloads {
    pub offered: Arc<Mutex<Vec<(String, Bytes)>>>,
}

impl MemoryDownloads {
    pub fn offered(&self) -> Vec<(String, Bytes)> {
        self.offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownloadTarget for MemoryDownloads {
    async fn offer(&mut self, filename: &str, payload: Bytes) -> Result<PathBuf> {
        self.offered
            .lock()
            .unwrap()
            .push((filename.to_string(), payload));
        Ok(PathBuf::from(filename))
    }
}
