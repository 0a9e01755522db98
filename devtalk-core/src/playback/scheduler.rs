//! Gap-free sequential scheduling of inbound speech against the playback
//! clock.
//!
//! ## Rules
//!
//! ```text
//! enqueue(seg):  cursor = max(cursor, now); start = cursor; cursor += seg.duration
//! interrupt():   stop every live segment; live-set = {}; cursor = 0
//! ```
//!
//! `max(cursor, now)` absorbs network jitter: a late segment starts
//! immediately instead of at a time that has already passed.
//!
//! Cursor and live-set are mutated only while holding one lock, so an
//! `interrupt` can never observe (or leave behind) half of an `enqueue`.

use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{PlaybackOutput, SegmentId};
use crate::codec::PlaybackSegment;
use crate::error::Result;

/// Where one segment landed on the playback clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    /// Playback-clock seconds.
    pub start: f64,
    pub duration: f64,
}

impl ScheduledSegment {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub cursor: f64,
    pub clock: f64,
    /// Live-set ordered by segment id (= arrival order).
    pub live: Vec<ScheduledSegment>,
}

#[derive(Default)]
struct SchedulerState {
    cursor: f64,
    live: BTreeMap<SegmentId, ScheduledSegment>,
}

struct SchedulerInner {
    output: Arc<dyn PlaybackOutput>,
    state: Mutex<SchedulerState>,
    next_id: AtomicU64,
}

/// Owner of the cursor and the live-set. Cheap to clone.
#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<SchedulerInner>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn PlaybackOutput>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                output,
                state: Mutex::new(SchedulerState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Schedule `segment` right after everything already queued, or now if
    /// the queue has drained.
    ///
    /// # Errors
    /// Propagates the output's refusal (e.g. a sample-rate mismatch); the
    /// cursor and live-set are left untouched in that case.
    pub fn enqueue(&self, segment: PlaybackSegment) -> Result<ScheduledSegment> {
        let segment = Arc::new(segment);
        let duration = segment.duration();
        let id = SegmentId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let mut state = self.inner.state.lock();
        let now = self.inner.output.current_time();
        let wanted = state.cursor.max(now);

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let on_ended = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().live.remove(&id);
            }
        });
        // The device may render between the clock read and the hand-off, so
        // the timeline follows where the voice really landed.
        let start = self.inner.output.start(id, segment, wanted, on_ended)?;

        state.cursor = start + duration;
        let scheduled = ScheduledSegment {
            id,
            start,
            duration,
        };
        state.live.insert(id, scheduled);
        debug!(
            id = id.0,
            start,
            duration,
            live = state.live.len(),
            "segment scheduled"
        );
        Ok(scheduled)
    }

    /// Force-stop every live segment, clear the live-set and reset the
    /// cursor. Returns how many segments were stopped.
    pub fn interrupt(&self) -> usize {
        let mut state = self.inner.state.lock();
        let live = std::mem::take(&mut state.live);
        for id in live.keys() {
            // A segment may have ended on the device between its `ended`
            // callback firing and us taking the lock; that is not an error.
            if let Err(e) = self.inner.output.stop(*id) {
                debug!(id = id.0, "stop skipped: {e}");
            }
        }
        state.cursor = 0.0;
        self.inner.output.flush();
        if !live.is_empty() {
            info!(stopped = live.len(), "playback interrupted");
        }
        live.len()
    }

    pub fn cursor(&self) -> f64 {
        self.inner.state.lock().cursor
    }

    pub fn live_len(&self) -> usize {
        self.inner.state.lock().live.len()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.inner.state.lock();
        PlaybackSnapshot {
            cursor: state.cursor,
            clock: self.inner.output.current_time(),
            live: state.live.values().copied().collect(),
        }
    }
}
