//! Software mixer: the playback clock and the destination segments are
//! scheduled against.
//!
//! The clock is the number of frames rendered divided by the mixer rate. It
//! only moves when someone calls [`Mixer::render`], so it is monotonic,
//! independent of wall-clock time, and frozen while the playback context is
//! suspended.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::debug;

use super::{EndedCallback, PlaybackOutput, SegmentId};
use crate::codec::PlaybackSegment;
use crate::error::{Result, TutorError};

struct Voice {
    id: SegmentId,
    start_frame: u64,
    samples: Vec<f32>,
    on_ended: Option<EndedCallback>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixes scheduled mono voices at a fixed rate.
pub struct Mixer {
    sample_rate: u32,
    /// Written only under the `voices` lock so start/stop/render agree on "now".
    frames_rendered: AtomicU64,
    voices: Mutex<Vec<Voice>>,
    /// Raised on flush; the device callback drains its queue when it sees it.
    flush: Arc<AtomicBool>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: AtomicU64::new(0),
            voices: Mutex::new(Vec::new()),
            flush: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    /// Flag shared with the device callback.
    pub fn flush_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flush)
    }

    pub fn active_voices(&self) -> usize {
        self.voices.lock().len()
    }

    /// Mix the next `out.len()` frames into `out` (overwriting it), advance
    /// the clock, and fire completion callbacks for voices that finished.
    ///
    /// Callbacks run after the voice lock is released: they are free to call
    /// back into the scheduler.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut finished = Vec::new();
        {
            let mut voices = self.voices.lock();
            let base = self.frames_rendered.load(Ordering::Acquire);
            let end = base + out.len() as u64;

            for voice in voices.iter() {
                let from = voice.start_frame.max(base);
                let to = voice.end_frame().min(end);
                for frame in from..to {
                    out[(frame - base) as usize] += voice.samples[(frame - voice.start_frame) as usize];
                }
            }

            let mut i = 0;
            while i < voices.len() {
                if voices[i].end_frame() <= end {
                    let mut voice = voices.swap_remove(i);
                    if let Some(cb) = voice.on_ended.take() {
                        finished.push(cb);
                    }
                } else {
                    i += 1;
                }
            }

            self.frames_rendered.store(end, Ordering::Release);
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        for cb in finished {
            cb();
        }
    }
}

impl PlaybackOutput for Mixer {
    fn current_time(&self) -> f64 {
        self.frames_rendered() as f64 / self.sample_rate as f64
    }

    fn start(
        &self,
        id: SegmentId,
        segment: Arc<PlaybackSegment>,
        at: f64,
        on_ended: EndedCallback,
    ) -> Result<f64> {
        if segment.sample_rate() != self.sample_rate {
            return Err(TutorError::AudioStream(format!(
                "segment rate {} Hz does not match mixer rate {} Hz",
                segment.sample_rate(),
                self.sample_rate
            )));
        }
        let mut voices = self.voices.lock();
        let now = self.frames_rendered.load(Ordering::Acquire);
        let wanted = (at.max(0.0) * self.sample_rate as f64).round() as u64;
        // The clock may have moved between the caller reading it and taking
        // this lock; play late voices whole rather than clipping their head.
        let (start_frame, actual) = if wanted < now {
            debug!(id = id.0, late_frames = now - wanted, "segment started late");
            (now, now as f64 / self.sample_rate as f64)
        } else {
            (wanted, at.max(0.0))
        };
        voices.push(Voice {
            id,
            start_frame,
            samples: segment.to_mono(),
            on_ended: Some(on_ended),
        });
        Ok(actual)
    }

    fn stop(&self, id: SegmentId) -> Result<()> {
        let mut voices = self.voices.lock();
        match voices.iter().position(|v| v.id == id) {
            Some(idx) => {
                // Stopped voices never report `ended`; the scheduler already
                // dropped them from its live-set.
                voices.swap_remove(idx);
                Ok(())
            }
            None => Err(TutorError::Released("playback segment")),
        }
    }

    fn flush(&self) {
        if self.flush.swap(true, Ordering::AcqRel) {
            debug!("previous flush still pending on the device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn segment(samples: Vec<f32>) -> Arc<PlaybackSegment> {
        Arc::new(PlaybackSegment::new(samples, 1, 10))
    }

    fn counter() -> (Arc<AtomicUsize>, EndedCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        (hits, Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn clock_advances_only_when_rendering() {
        let mixer = Mixer::new(10);
        assert_eq!(mixer.current_time(), 0.0);
        let mut out = [0.0; 5];
        mixer.render(&mut out);
        assert_eq!(mixer.current_time(), 0.5);
    }

    #[test]
    fn voices_play_at_their_scheduled_frame_and_report_end() {
        let mixer = Mixer::new(10);
        let (ended, cb) = counter();
        mixer
            .start(SegmentId(1), segment(vec![0.5; 3]), 0.2, cb)
            .unwrap();

        let mut out = [0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5]);
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        mixer.render(&mut out);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn overlapping_voices_sum_and_clip() {
        let mixer = Mixer::new(10);
        let (_, a) = counter();
        let (_, b) = counter();
        mixer.start(SegmentId(1), segment(vec![0.75; 2]), 0.0, a).unwrap();
        mixer.start(SegmentId(2), segment(vec![0.75; 2]), 0.1, b).unwrap();
        let mut out = [0.0; 3];
        mixer.render(&mut out);
        assert_eq!(out, [0.75, 1.0, 0.75]);
    }

    #[test]
    fn stopped_voice_is_silent_and_never_ends() {
        let mixer = Mixer::new(10);
        let (ended, cb) = counter();
        mixer.start(SegmentId(7), segment(vec![0.5; 4]), 0.0, cb).unwrap();
        mixer.stop(SegmentId(7)).unwrap();
        assert!(matches!(
            mixer.stop(SegmentId(7)),
            Err(TutorError::Released(_))
        ));

        let mut out = [0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(ended.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn late_start_plays_whole_voice_from_now() {
        let mixer = Mixer::new(10);
        let mut out = [0.0; 5];
        mixer.render(&mut out);

        let (_, cb) = counter();
        let started = mixer.start(SegmentId(1), segment(vec![0.25; 2]), 0.1, cb).unwrap();
        assert_eq!(started, 0.5);
        let mut out = [0.0; 3];
        mixer.render(&mut out);
        assert_eq!(out, [0.25, 0.25, 0.0]);
    }

    #[test]
    fn rate_mismatch_is_rejected() {
        let mixer = Mixer::new(24_000);
        let (_, cb) = counter();
        let err = mixer
            .start(SegmentId(1), Arc::new(PlaybackSegment::silence(0.1, 16_000)), 0.0, cb)
            .unwrap_err();
        assert!(matches!(err, TutorError::AudioStream(_)));
    }

    #[test]
    fn flush_raises_device_flag() {
        let mixer = Mixer::new(24_000);
        let flag = mixer.flush_flag();
        mixer.flush();
        assert!(flag.load(Ordering::SeqCst));
    }
}
