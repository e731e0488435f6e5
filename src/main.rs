mod config;
mod console;
mod controller;
mod device;
mod download;
mod messages;
mod mjpeg;
mod services;
mod task;
#[cfg(test)]
mod testing;
mod ui;
mod video;

use config::Config;
use console::ConsoleCommand;
use controller::{Controller, ControllerHandle};
use device::HttpDevice;
use download::DownloadDir;
use messages::Transition;
use services::{CommandDispatcher, FeedManager, RecordingSession, StatusPoller};
use ui::UiSnapshot;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

// One event loop: every state change is applied on this thread
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    tracing::info!("Starting remotecam controller");

    let config = Config::load()?;
    config.validate()?;

    run_app(config).await
}

async fn run_app(config: Config) -> Result<()> {
    let device = Arc::new(HttpDevice::new(&config.device_url, config.request_timeout())?);
    tracing::info!("Device at {}", config.device_url);

    // Live feed into the frame slot
    let (frame_tx, frame_rx) = watch::channel(None);
    let feed = FeedManager::new(device.clone(), frame_tx, config.reconnect_delay()).spawn();

    // Status polling and commands both report into the controller
    let (report_tx, report_rx) = mpsc::channel(64);
    let _pollers = StatusPoller::new(
        device.clone(),
        config.poll_interval(),
        config.request_timeout(),
        report_tx.clone(),
    )
    .spawn();
    let dispatcher = CommandDispatcher::new(device.clone(), report_tx);

    let download_dir = config.download_dir()?;
    tracing::info!("Recordings will be saved to {:?}", download_dir);
    let session = RecordingSession::new(
        config.capture_settings(),
        frame_rx,
        video::default_sink_factory(config.bitrate_kbps),
        Box::new(DownloadDir::new(download_dir)),
    );

    let (controller, handle, ui_rx) = Controller::new(session, dispatcher, report_rx);
    let controller_task = tokio::spawn(controller.run());
    tokio::spawn(render_ui(ui_rx.clone()));

    let (console_tx, mut console_rx) = mpsc::channel(10);
    console::spawn_stdin_reader(console_tx);

    tracing::info!("Ready! {}", console::HELP);

    // Main event loop
    loop {
        tokio::select! {
            Some(cmd) = console_rx.recv() => {
                if cmd == ConsoleCommand::Quit {
                    break;
                }
                if let Err(e) = handle_console_command(cmd, &handle, &ui_rx).await {
                    tracing::error!("Error handling {:?}: {:#}", cmd, e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    feed.stop();
    handle.shutdown().await?;
    controller_task.await?;

    tracing::info!("remotecam shutdown complete");
    Ok(())
}

async fn handle_console_command(
    cmd: ConsoleCommand,
    handle: &ControllerHandle,
    ui_rx: &watch::Receiver<UiSnapshot>,
) -> Result<()> {
    match cmd {
        ConsoleCommand::Record => match handle.start_recording().await? {
            Transition::Applied => tracing::info!("Recording..."),
            Transition::Ignored => tracing::info!("Already recording"),
        },
        ConsoleCommand::Stop => match handle.stop_recording().await? {
            Some(path) => tracing::info!("Recording saved to {:?}", path),
            None => tracing::info!("Not recording"),
        },
        ConsoleCommand::Flashlight(on) => handle.set_flashlight(on).await?,
        ConsoleCommand::ToggleStream => handle.toggle_stream().await?,
        ConsoleCommand::Status => tracing::info!("{}", *ui_rx.borrow()),
        ConsoleCommand::Help => tracing::info!("{}", console::HELP),
        ConsoleCommand::Quit => {}
    }

    Ok(())
}

/// Log every change of the control snapshot
async fn render_ui(mut ui_rx: watch::Receiver<UiSnapshot>) {
    tracing::info!("{}", *ui_rx.borrow_and_update());
    while ui_rx.changed().await.is_ok() {
        tracing::info!("{}", *ui_rx.borrow_and_update());
    }
}
