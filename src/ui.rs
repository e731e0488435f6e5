use crate::messages::{DeviceState, RecordingState};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusText {
    Stopped,
    Streaming,
    Recording,
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusText::Stopped => "Stopped",
            StatusText::Streaming => "Streaming",
            StatusText::Recording => "Recording",
        })
    }
}

/// Enablement and labels of every operator control
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UiSnapshot {
    pub record_enabled: bool,
    pub stop_enabled: bool,
    pub flash_on_enabled: bool,
    pub flash_off_enabled: bool,
    pub status: StatusText,
}

impl Default for UiSnapshot {
    fn default() -> Self {
        reconcile(DeviceState::default(), RecordingState::default())
    }
}

/// Project device and recording state onto the controls.
///
/// Depends on nothing but its arguments. `Finalizing` renders as not
/// recording, so the record button comes back as soon as stop is pressed.
pub fn reconcile(device: DeviceState, recording: RecordingState) -> UiSnapshot {
    let recording = recording == RecordingState::Recording;

    let status = match (device.streaming, recording) {
        (false, _) => StatusText::Stopped,
        (true, false) => StatusText::Streaming,
        (true, true) => StatusText::Recording,
    };

    UiSnapshot {
        record_enabled: !recording,
        stop_enabled: recording,
        flash_on_enabled: device.streaming && !device.flashlight_on,
        flash_off_enabled: device.streaming && device.flashlight_on,
        status,
    }
}

impl fmt::Display for UiSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |enabled: bool| if enabled { "+" } else { "-" };
        write!(
            f,
            "[{}] {}record {}stop {}flash-on {}flash-off",
            self.status,
            mark(self.record_enabled),
            mark(self.stop_enabled),
            mark(self.flash_on_enabled),
            mark(self.flash_off_enabled),
        )
    }
}
