use crate::services::feed::FrameSlot;
use crate::task::{Gate, TaskHandle};
use crate::video::{CaptureSettings, CapturedFrame, Surface};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Start sampling the frame slot onto an off-screen surface
///
/// One copy per frame period goes to `frame_tx`. The loop checks its gate at
/// the top of every tick and returns instead of waiting for the next one once
/// the gate is closed; [`TaskHandle::stop`] also aborts it outright.
pub fn spawn(
    frames: watch::Receiver<FrameSlot>,
    settings: CaptureSettings,
    frame_tx: mpsc::Sender<CapturedFrame>,
) -> TaskHandle {
    TaskHandle::spawn(move |gate| run(gate, frames, settings, frame_tx))
}

async fn run(
    gate: Gate,
    frames: watch::Receiver<FrameSlot>,
    settings: CaptureSettings,
    frame_tx: mpsc::Sender<CapturedFrame>,
) {
    let mut surface = Surface::new(settings.width, settings.height);
    let mut ticker = tokio::time::interval(settings.frame_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut captured: u64 = 0;

    loop {
        ticker.tick().await;
        if !gate.is_open() {
            break;
        }

        let current = frames.borrow().clone();
        surface.draw(current.as_deref());

        let frame = CapturedFrame {
            image: surface.image().clone(),
            timestamp: started.elapsed(),
        };
        if frame_tx.send(frame).await.is_err() {
            break;
        }
        captured += 1;
        tracing::trace!(captured, "Captured frame");
    }

    tracing::debug!("Capture stopped after {} frames", captured);
}
