//! Inbound speech playback.
//!
//! ```text
//! decoded segment ──► PlaybackScheduler ──start(at)──► Mixer (24 kHz clock)
//!                                                         │ render
//!                                                   playback worker ──► SpeakerSink
//! ```
//!
//! Lock order is `session phase → scheduler state → mixer voices`. The mixer
//! never calls an `ended` callback while holding its own lock, and never from
//! inside [`PlaybackOutput::start`].

pub mod context;
pub mod mixer;
pub mod scheduler;

use std::sync::Arc;

use crate::codec::PlaybackSegment;
use crate::error::Result;

pub use context::{ContextState, PlaybackContext};
pub use mixer::Mixer;
pub use scheduler::{PlaybackScheduler, PlaybackSnapshot, ScheduledSegment};

/// Identifies one scheduled segment for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

/// Fired once when a segment finishes playing on its own.
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// The clock and voice surface the scheduler drives.
pub trait PlaybackOutput: Send + Sync {
    /// Monotonic playback time in seconds.
    fn current_time(&self) -> f64;

    /// Begin playing `segment` at clock time `at` and return the time it
    /// actually starts, which is later than `at` when the clock has already
    /// passed it. `on_ended` fires when it completes naturally, never when
    /// it is stopped.
    fn start(
        &self,
        id: SegmentId,
        segment: Arc<PlaybackSegment>,
        at: f64,
        on_ended: EndedCallback,
    ) -> Result<f64>;

    /// Stop a segment immediately. Errors if it is no longer playing.
    fn stop(&self, id: SegmentId) -> Result<()>;

    /// Drop any audio already handed to the device.
    fn flush(&self) {}
}
