//! Microphone capture pipeline.
//!
//! ```text
//! MicSource::read ─► FrameAssembler (4096 @ 16 kHz) ─► CapturePipeline::process_frame
//!                                                        ├─ volume = min(rms * gain, 1)
//!                                                        ├─ codec::encode
//!                                                        └─ OutboundSender::try_send (never waits)
//! ```
//!
//! The worker runs on its own thread from `open()` until `close()`, but frames
//! only go anywhere once the pipeline has been wired to a connection. Before
//! that they are discarded without touching the volume meter.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{AudioHost, CaptureRequest, MicSource},
    buffering::frame::{AudioFrame, FrameAssembler},
    codec,
    error::{Result, TutorError},
    ipc::events::AudioActivityEvent,
    live::{OutboundSender, SendOutcome, SessionEvent},
    session::diagnostics::SessionDiagnostics,
};

/// Samples per outbound frame at 16 kHz (256 ms).
pub const DEFAULT_FRAME_SIZE: usize = 4096;
/// Display gain applied to the frame RMS.
pub const DEFAULT_VOLUME_GAIN: f32 = 5.0;

const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Latest display level in [0, 1], readable from any thread.
#[derive(Debug, Default)]
pub struct VolumeMeter(AtomicU32);

impl VolumeMeter {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No connection wired yet; the frame was discarded.
    NotWired,
    Sent,
    /// The transport is behind; the chunk was discarded.
    Dropped,
    /// The connection is gone.
    Closed,
}

/// Per-frame processing: metering, encoding, handoff.
pub struct CapturePipeline {
    gain: f32,
    volume: Arc<VolumeMeter>,
    outbound: Mutex<Option<OutboundSender>>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    seq: AtomicU64,
    diagnostics: Arc<SessionDiagnostics>,
}

impl CapturePipeline {
    pub fn new(
        gain: f32,
        volume: Arc<VolumeMeter>,
        activity_tx: broadcast::Sender<AudioActivityEvent>,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Self {
        Self {
            gain,
            volume,
            outbound: Mutex::new(None),
            activity_tx,
            seq: AtomicU64::new(0),
            diagnostics,
        }
    }

    /// Route frames to `outbound` from now on.
    pub fn wire(&self, outbound: OutboundSender) {
        *self.outbound.lock() = Some(outbound);
        info!("capture wired to live connection");
    }

    pub fn unwire(&self) {
        self.outbound.lock().take();
    }

    pub fn is_wired(&self) -> bool {
        self.outbound.lock().is_some()
    }

    pub fn process_frame(&self, frame: &AudioFrame) -> FrameOutcome {
        let Some(outbound) = self.outbound.lock().clone() else {
            return FrameOutcome::NotWired;
        };
        SessionDiagnostics::bump(&self.diagnostics.frames_captured);

        let rms = frame.rms();
        let volume = (rms * self.gain).min(1.0);
        self.volume.set(volume);
        let _ = self.activity_tx.send(AudioActivityEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            rms,
            volume,
        });

        match outbound.try_send(codec::encode(frame)) {
            SendOutcome::Sent => {
                SessionDiagnostics::bump(&self.diagnostics.chunks_sent);
                FrameOutcome::Sent
            }
            SendOutcome::Dropped => {
                SessionDiagnostics::bump(&self.diagnostics.chunks_dropped);
                FrameOutcome::Dropped
            }
            SendOutcome::Closed => FrameOutcome::Closed,
        }
    }
}

/// The 16 kHz input context: owns the microphone worker.
pub struct CaptureContext {
    running: Arc<AtomicBool>,
    pipeline: Arc<CapturePipeline>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureContext {
    /// Acquire the microphone on a dedicated thread and start reading.
    ///
    /// # Errors
    /// Whatever the host reports when the device is missing or access is
    /// denied.
    pub async fn open(
        host: Arc<dyn AudioHost>,
        request: CaptureRequest,
        frame_size: usize,
        pipeline: Arc<CapturePipeline>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = oneshot::channel::<Result<()>>();

        let worker_running = Arc::clone(&running);
        let worker_pipeline = Arc::clone(&pipeline);
        let worker = std::thread::Builder::new()
            .name("devtalk-capture".into())
            .spawn(move || {
                let source = match host.open_microphone(&request) {
                    Ok(source) => {
                        let _ = open_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let assembler = FrameAssembler::new(frame_size, request.sample_rate);
                run(source, assembler, &worker_pipeline, &worker_running, &events);
            })
            .map_err(TutorError::Io)?;

        match open_rx.await {
            Ok(Ok(())) => {
                info!(frame_size, "capture context open");
                Ok(Self {
                    running,
                    pipeline,
                    worker: Mutex::new(Some(worker)),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(TutorError::Other(anyhow::anyhow!(
                "capture worker died before opening the microphone"
            ))),
        }
    }

    pub fn pipeline(&self) -> &Arc<CapturePipeline> {
        &self.pipeline
    }

    /// Start forwarding frames to `outbound`.
    pub fn wire(&self, outbound: OutboundSender) {
        self.pipeline.wire(outbound);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the worker and release the microphone.
    ///
    /// # Errors
    /// `TutorError::Released` when already closed.
    pub fn close(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(TutorError::Released("capture context"));
        }
        self.pipeline.unwire();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("capture worker panicked");
            }
        }
        info!("capture context closed");
        Ok(())
    }
}

impl Drop for CaptureContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn run(
    mut source: Box<dyn MicSource>,
    mut assembler: FrameAssembler,
    pipeline: &CapturePipeline,
    running: &AtomicBool,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let mut scratch = Vec::with_capacity(8192);
    while running.load(Ordering::Acquire) {
        scratch.clear();
        match source.read(&mut scratch) {
            Ok(0) => {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }
            Ok(_) => assembler.push(&scratch),
            Err(e) => {
                warn!("microphone fault: {e}");
                let _ = events.send(SessionEvent::Error(e.to_string()));
                break;
            }
        }
        while let Some(frame) = assembler.next_frame() {
            if pipeline.process_frame(&frame) == FrameOutcome::NotWired {
                // Pre-connection audio is not replayed later.
                assembler.clear();
                break;
            }
        }
    }
    if let Err(e) = source.stop() {
        debug!("microphone stop: {e}");
    }
    debug!("capture worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn pipeline() -> (Arc<CapturePipeline>, Arc<VolumeMeter>, Arc<SessionDiagnostics>) {
        let volume = Arc::new(VolumeMeter::default());
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let (activity_tx, _) = broadcast::channel(16);
        let pipeline = Arc::new(CapturePipeline::new(
            DEFAULT_VOLUME_GAIN,
            Arc::clone(&volume),
            activity_tx,
            Arc::clone(&diagnostics),
        ));
        (pipeline, volume, diagnostics)
    }

    #[test]
    fn unwired_frames_are_discarded_without_metering() {
        let (pipeline, volume, diag) = pipeline();
        let frame = AudioFrame::new(vec![0.5; 4096], 16_000);
        assert_eq!(pipeline.process_frame(&frame), FrameOutcome::NotWired);
        assert_eq!(volume.get(), 0.0);
        assert_eq!(diag.snapshot().frames_captured, 0);
    }

    #[test]
    fn silent_frame_sends_zeros_and_zero_volume() {
        let (pipeline, volume, _) = pipeline();
        let (tx, mut rx) = OutboundSender::channel(4);
        pipeline.wire(tx);

        volume.set(0.7);
        let outcome = pipeline.process_frame(&AudioFrame::silent(4096, 16_000));
        assert_eq!(outcome, FrameOutcome::Sent);
        assert_eq!(volume.get(), 0.0);

        let chunk = rx.try_recv().expect("one chunk sent");
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        let bytes = decode(&chunk.data).unwrap();
        assert_eq!(bytes.len(), 4096 * 2);
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn volume_is_scaled_rms_clamped_to_one() {
        let (pipeline, volume, _) = pipeline();
        let (tx, _rx) = OutboundSender::channel(4);
        pipeline.wire(tx);

        pipeline.process_frame(&AudioFrame::new(vec![0.1; 4096], 16_000));
        assert!((volume.get() - 0.5).abs() < 1e-3);

        pipeline.process_frame(&AudioFrame::new(vec![0.9; 4096], 16_000));
        assert_eq!(volume.get(), 1.0);
    }

    #[test]
    fn full_transport_drops_and_counts() {
        let (pipeline, _, diag) = pipeline();
        let (tx, _rx) = OutboundSender::channel(1);
        pipeline.wire(tx);
        let frame = AudioFrame::silent(4096, 16_000);
        assert_eq!(pipeline.process_frame(&frame), FrameOutcome::Sent);
        assert_eq!(pipeline.process_frame(&frame), FrameOutcome::Dropped);
        let snap = diag.snapshot();
        assert_eq!(snap.chunks_sent, 1);
        assert_eq!(snap.chunks_dropped, 1);
        assert_eq!(snap.frames_captured, 2);
    }

    #[test]
    fn activity_events_carry_sequence_and_level() {
        let volume = Arc::new(VolumeMeter::default());
        let (activity_tx, mut activity_rx) = broadcast::channel(16);
        let pipeline = CapturePipeline::new(
            DEFAULT_VOLUME_GAIN,
            volume,
            activity_tx,
            Arc::new(SessionDiagnostics::default()),
        );
        let (tx, _rx) = OutboundSender::channel(4);
        pipeline.wire(tx);
        pipeline.process_frame(&AudioFrame::silent(16, 16_000));
        pipeline.process_frame(&AudioFrame::silent(16, 16_000));

        assert_eq!(activity_rx.try_recv().unwrap().seq, 0);
        assert_eq!(activity_rx.try_recv().unwrap().seq, 1);
    }
}
