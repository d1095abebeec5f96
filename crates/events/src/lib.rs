//! Progress tracking and event fan-out for provisioning runs.
//!
//! [`ProgressTracker`] keeps one ordered, replayable stream per tracking id.
//! [`EventBus`] is the process-wide firehose every stream entry and session
//! lifecycle change is mirrored to.

mod bus;
mod tracker;
mod types;

pub use bus::EventBus;
pub use tracker::{PollResult, ProgressTracker, TrackerError, TrackingSnapshot};
pub use types::*;
