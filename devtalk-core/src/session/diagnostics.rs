use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters shared by the capture worker, the playback path and the
/// controller. Reset at every `start()`.
#[derive(Default)]
pub struct SessionDiagnostics {
    pub frames_captured: AtomicUsize,
    pub chunks_sent: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub segments_decoded: AtomicUsize,
    pub decode_errors: AtomicUsize,
    pub segments_scheduled: AtomicUsize,
    pub interruptions: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.chunks_sent.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.segments_decoded.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.segments_scheduled.store(0, Ordering::Relaxed);
        self.interruptions.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            segments_decoded: self.segments_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            segments_scheduled: self.segments_scheduled.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_captured: usize,
    pub chunks_sent: usize,
    pub chunks_dropped: usize,
    pub segments_decoded: usize,
    pub decode_errors: usize,
    pub segments_scheduled: usize,
    pub interruptions: usize,
}
