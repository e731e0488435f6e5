pub mod capture;
pub mod dispatcher;
pub mod feed;
pub mod poller;
pub mod recorder;

pub use dispatcher::CommandDispatcher;
pub use feed::{FeedManager, FrameSlot};
pub use poller::StatusPoller;
pub use recorder::RecordingSession;
