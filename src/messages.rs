use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Boolean features the device reports on its status endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    Streaming,
    Flashlight,
}

impl Feature {
    pub const ALL: [Feature; 2] = [Feature::Streaming, Feature::Flashlight];

    pub fn status_path(&self) -> &'static str {
        match self {
            Feature::Streaming => "/streamStatus",
            Feature::Flashlight => "/flashlightStatus",
        }
    }
}

/// Last-known device state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub streaming: bool,
    pub flashlight_on: bool,
}

impl DeviceState {
    /// Overwrite one field. Returns true if the value changed.
    pub fn apply(&mut self, feature: Feature, value: bool) -> bool {
        let field = match feature {
            Feature::Streaming => &mut self.streaming,
            Feature::Flashlight => &mut self.flashlight_on,
        };
        let changed = *field != value;
        *field = value;
        changed
    }
}

/// Where a device report came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportSource {
    Poll,
    Command,
}

/// A parsed feature value sent to the controller by a poll or command task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceReport {
    pub feature: Feature,
    pub value: bool,
    pub source: ReportSource,
}

/// Recording session state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Finalizing,
}

/// Outcome of a state-machine request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
}

/// Commands for the Controller
pub enum ControllerCommand {
    StartRecording(oneshot::Sender<Result<Transition>>),
    StopRecording(oneshot::Sender<Result<Option<PathBuf>>>),
    SetFlashlight(bool),
    ToggleStream,
    Shutdown(oneshot::Sender<()>),
}
