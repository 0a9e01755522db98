//! The 24 kHz output context: mixer, scheduler and the worker thread that
//! owns the speaker.
//!
//! ## Lifecycle
//!
//! ```text
//! open()      → speaker acquired on the worker, state = Suspended
//! resume()    → Suspended → Running (first inbound audio)
//! close()     → Closed; worker exits and drops the speaker on its own thread
//! ```

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{Mixer, PlaybackScheduler};
use crate::{
    audio::{AudioHost, PlaybackRequest, SpeakerSink},
    error::{Result, TutorError},
    live::SessionEvent,
};

const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Output context state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextState {
    Suspended = 0,
    Running = 1,
    Closed = 2,
}

impl ContextState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Suspended,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

pub struct PlaybackContext {
    mixer: Arc<Mixer>,
    scheduler: PlaybackScheduler,
    state: Arc<AtomicU8>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackContext {
    /// Acquire the speaker on a dedicated thread and return once it is open.
    ///
    /// A device fault after open is reported on `events` as
    /// [`SessionEvent::Error`].
    pub async fn open(
        host: Arc<dyn AudioHost>,
        request: PlaybackRequest,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let mixer = Arc::new(Mixer::new(request.sample_rate));
        let state = Arc::new(AtomicU8::new(ContextState::Suspended as u8));
        let (open_tx, open_rx) = oneshot::channel::<Result<()>>();

        let worker_mixer = Arc::clone(&mixer);
        let worker_state = Arc::clone(&state);
        let worker = std::thread::Builder::new()
            .name("devtalk-playback".into())
            .spawn(move || {
                // The sink may hold a !Send stream: open it here, drop it here.
                let sink = match host.open_speaker(&request, &worker_mixer) {
                    Ok(sink) => {
                        let _ = open_tx.send(Ok(()));
                        sink
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                run(sink, &worker_mixer, &worker_state, &events);
            })
            .map_err(TutorError::Io)?;

        match open_rx.await {
            Ok(Ok(())) => {
                info!(rate = mixer.sample_rate(), "playback context open");
                Ok(Self {
                    scheduler: PlaybackScheduler::new(mixer.clone()),
                    mixer,
                    state,
                    worker: Mutex::new(Some(worker)),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(TutorError::Other(anyhow::anyhow!(
                "playback worker died before opening the speaker"
            ))),
        }
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Start the clock if it is suspended. Returns whether this call resumed it.
    pub fn resume(&self) -> bool {
        let resumed = self
            .state
            .compare_exchange(
                ContextState::Suspended as u8,
                ContextState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if resumed {
            debug!("playback context resumed");
        }
        resumed
    }

    /// Close the context and join the worker.
    ///
    /// # Errors
    /// `TutorError::Released` when already closed.
    pub fn close(&self) -> Result<()> {
        let prev = self.state.swap(ContextState::Closed as u8, Ordering::AcqRel);
        if ContextState::from_u8(prev) == ContextState::Closed {
            return Err(TutorError::Released("playback context"));
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("playback worker panicked");
            }
        }
        info!("playback context closed");
        Ok(())
    }
}

impl Drop for PlaybackContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn run(
    mut sink: Box<dyn SpeakerSink>,
    mixer: &Mixer,
    state: &AtomicU8,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let mut playing = false;
    loop {
        match ContextState::from_u8(state.load(Ordering::Acquire)) {
            ContextState::Closed => break,
            ContextState::Suspended => std::thread::sleep(IDLE_SLEEP),
            ContextState::Running => {
                if !playing {
                    if let Err(e) = sink.play() {
                        fault(events, e);
                        break;
                    }
                    playing = true;
                }
                match sink.pump(mixer) {
                    Ok(0) => std::thread::sleep(IDLE_SLEEP),
                    Ok(_) => {}
                    Err(e) => {
                        fault(events, e);
                        break;
                    }
                }
            }
        }
    }
    debug!("playback worker exiting");
}

fn fault(events: &mpsc::UnboundedSender<SessionEvent>, e: TutorError) {
    warn!("speaker fault: {e}");
    let _ = events.send(SessionEvent::Error(e.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureRequest, MicSource};
    use crate::codec::PlaybackSegment;

    struct CountingHost;

    struct CountingSink;

    impl SpeakerSink for CountingSink {
        fn play(&mut self) -> Result<()> {
            Ok(())
        }

        fn pump(&mut self, mixer: &Mixer) -> Result<usize> {
            let mut out = [0.0; 240];
            mixer.render(&mut out);
            Ok(out.len())
        }
    }

    impl AudioHost for CountingHost {
        fn open_microphone(&self, _request: &CaptureRequest) -> Result<Box<dyn MicSource>> {
            Err(TutorError::NoDefaultInputDevice)
        }

        fn open_speaker(
            &self,
            _request: &PlaybackRequest,
            _mixer: &Arc<Mixer>,
        ) -> Result<Box<dyn SpeakerSink>> {
            Ok(Box::new(CountingSink))
        }
    }

    struct NoSpeakerHost;

    impl AudioHost for NoSpeakerHost {
        fn open_microphone(&self, _request: &CaptureRequest) -> Result<Box<dyn MicSource>> {
            Err(TutorError::NoDefaultInputDevice)
        }

        fn open_speaker(
            &self,
            _request: &PlaybackRequest,
            _mixer: &Arc<Mixer>,
        ) -> Result<Box<dyn SpeakerSink>> {
            Err(TutorError::NoDefaultOutputDevice)
        }
    }

    fn request() -> PlaybackRequest {
        PlaybackRequest {
            sample_rate: 24_000,
            preferred_device: None,
        }
    }

    #[tokio::test]
    async fn clock_is_frozen_until_resumed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = PlaybackContext::open(Arc::new(CountingHost), request(), tx)
            .await
            .unwrap();
        assert_eq!(ctx.state(), ContextState::Suspended);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ctx.mixer().frames_rendered(), 0);

        assert!(ctx.resume());
        assert!(!ctx.resume());
        ctx.scheduler()
            .enqueue(PlaybackSegment::silence(0.01, 24_000))
            .unwrap();
        for _ in 0..200 {
            if ctx.scheduler().live_len() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctx.scheduler().live_len(), 0);
        assert!(ctx.mixer().frames_rendered() > 0);

        ctx.close().unwrap();
        assert!(matches!(ctx.close(), Err(TutorError::Released(_))));
    }

    #[tokio::test]
    async fn missing_speaker_fails_open() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = PlaybackContext::open(Arc::new(NoSpeakerHost), request(), tx)
            .await
            .err()
            .expect("open should fail");
        assert!(matches!(err, TutorError::NoDefaultOutputDevice));
    }
}
