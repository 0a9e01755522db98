//! End-to-end session tests without a sound card or network.
//!
//! The speaker double never renders, so the playback clock stays at zero and
//! scheduled start times are exact.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use devtalk_core::{
    audio::{AudioHost, CaptureRequest, MicSource, PlaybackRequest, SpeakerSink},
    buffering::frame::AudioFrame,
    codec::{self, EncodedChunk},
    live::{
        EventSender, LiveConnection, LiveEndpoint, LiveSetup, OutboundSender, ServerMessage,
        SessionEvent,
    },
    playback::Mixer,
    LiveSession, Result, SessionConfig, SessionState, TutorError,
};

// ---------------------------------------------------------------------------
// Audio host double
// ---------------------------------------------------------------------------

struct ScriptedMic {
    frames: Receiver<Vec<f32>>,
    stops: Arc<AtomicUsize>,
    stopped: bool,
}

impl MicSource for ScriptedMic {
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize> {
        let mut n = 0;
        while let Ok(frame) = self.frames.try_recv() {
            n += frame.len();
            out.extend(frame);
        }
        Ok(n)
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Err(TutorError::Released("microphone"));
        }
        self.stopped = true;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FrozenSpeaker;

impl SpeakerSink for FrozenSpeaker {
    fn play(&mut self) -> Result<()> {
        Ok(())
    }

    fn pump(&mut self, _mixer: &Mixer) -> Result<usize> {
        Ok(0)
    }
}

struct TestHost {
    frames: Receiver<Vec<f32>>,
    mic_available: bool,
    mic_stops: Arc<AtomicUsize>,
    mixer: Mutex<Option<Arc<Mixer>>>,
}

impl AudioHost for TestHost {
    fn open_microphone(&self, request: &CaptureRequest) -> Result<Box<dyn MicSource>> {
        assert_eq!(request.sample_rate, 16_000);
        if !self.mic_available {
            return Err(TutorError::NoDefaultInputDevice);
        }
        Ok(Box::new(ScriptedMic {
            frames: self.frames.clone(),
            stops: Arc::clone(&self.mic_stops),
            stopped: false,
        }))
    }

    fn open_speaker(
        &self,
        request: &PlaybackRequest,
        mixer: &Arc<Mixer>,
    ) -> Result<Box<dyn SpeakerSink>> {
        assert_eq!(request.sample_rate, 24_000);
        *self.mixer.lock() = Some(Arc::clone(mixer));
        Ok(Box::new(FrozenSpeaker))
    }
}

// ---------------------------------------------------------------------------
// Endpoint double
// ---------------------------------------------------------------------------

struct MockConnection {
    outbound: OutboundSender,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl LiveConnection for MockConnection {
    fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(TutorError::Released("live connection"));
        }
        self.closed = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MockEndpoint {
    events: Mutex<Option<EventSender>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<EncodedChunk>>>,
    closes: Arc<AtomicUsize>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    refuse: bool,
}

impl MockEndpoint {
    fn emit(&self, event: SessionEvent) {
        self.events
            .lock()
            .as_ref()
            .expect("connect was called")
            .send(event)
            .expect("session listening");
    }

    fn take_outbound(&self) -> mpsc::Receiver<EncodedChunk> {
        self.outbound_rx.lock().take().expect("connect was called")
    }

    fn connected(&self) -> bool {
        self.events.lock().is_some()
    }
}

impl LiveEndpoint for MockEndpoint {
    fn connect(
        &self,
        _setup: &LiveSetup,
        events: EventSender,
    ) -> BoxFuture<'static, Result<Box<dyn LiveConnection>>> {
        *self.events.lock() = Some(events);
        let (outbound, rx) = OutboundSender::channel(8);
        *self.outbound_rx.lock() = Some(rx);
        let closes = Arc::clone(&self.closes);
        let gate = self.gate.lock().take();
        let refuse = self.refuse;
        Box::pin(async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if refuse {
                return Err(TutorError::Connection("endpoint unreachable".into()));
            }
            Ok(Box::new(MockConnection {
                outbound,
                closes,
                closed: false,
            }) as Box<dyn LiveConnection>)
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    session: LiveSession,
    host: Arc<TestHost>,
    endpoint: Arc<MockEndpoint>,
    mic: Sender<Vec<f32>>,
}

fn harness_with(mic_available: bool, endpoint: MockEndpoint) -> Harness {
    let (mic, frames) = unbounded();
    let host = Arc::new(TestHost {
        frames,
        mic_available,
        mic_stops: Arc::new(AtomicUsize::new(0)),
        mixer: Mutex::new(None),
    });
    let endpoint = Arc::new(endpoint);
    let session = LiveSession::new(
        SessionConfig::default(),
        LiveSetup::default(),
        host.clone(),
        endpoint.clone(),
    );
    Harness {
        session,
        host,
        endpoint,
        mic,
    }
}

fn harness() -> Harness {
    harness_with(true, MockEndpoint::default())
}

impl Harness {
    async fn start_active(&self) {
        self.session.start().await.expect("session starts");
        assert_eq!(self.session.state(), SessionState::Connecting);
        self.endpoint.emit(SessionEvent::Opened);
        eventually(|| self.session.is_active()).await;
    }

    fn mixer(&self) -> Arc<Mixer> {
        self.host.mixer.lock().clone().expect("speaker opened")
    }

    fn live_len(&self) -> usize {
        self.session
            .playback_snapshot()
            .map(|s| s.live.len())
            .unwrap_or(0)
    }
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2 s");
}

/// Base64 PCM16 of `secs` seconds of 24 kHz mono audio at a constant level.
fn speech(secs: f64, level: f32) -> String {
    let samples = (secs * 24_000.0).round() as usize;
    codec::encode(&AudioFrame::new(vec![level; samples], 24_000)).data
}

async fn next_chunk(rx: &mut mpsc::Receiver<EncodedChunk>) -> EncodedChunk {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("chunk within 2 s")
        .expect("channel open")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_frame_round_trips_to_zeros_with_zero_volume() {
    let h = harness();
    h.start_active().await;
    let mut outbound = h.endpoint.take_outbound();

    h.mic.send(vec![0.5; 4096]).unwrap();
    let loud = next_chunk(&mut outbound).await;
    assert_eq!(loud.mime_type, "audio/pcm;rate=16000");
    assert_eq!(h.session.volume(), 1.0);

    h.mic.send(vec![0.0; 4096]).unwrap();
    let silent = next_chunk(&mut outbound).await;
    let bytes = codec::decode(&silent.data).unwrap();
    let segment = codec::decode_audio_samples(&bytes, 16_000, 1).unwrap();
    assert_eq!(segment.frames(), 4096);
    assert!(segment.interleaved().iter().all(|s| *s == 0.0));
    assert_eq!(h.session.volume(), 0.0);
    assert_eq!(h.session.snapshot().volume, 0.0);

    h.session.stop();
}

#[tokio::test]
async fn partial_frames_are_held_until_4096_samples() {
    let h = harness();
    h.start_active().await;
    let mut outbound = h.endpoint.take_outbound();

    h.mic.send(vec![0.0; 3000]).unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(outbound.try_recv().is_err());

    h.mic.send(vec![0.0; 1096]).unwrap();
    let chunk = next_chunk(&mut outbound).await;
    assert_eq!(codec::decode(&chunk.data).unwrap().len(), 4096 * 2);

    h.session.stop();
}

#[tokio::test]
async fn frames_before_open_are_not_sent() {
    let h = harness();
    h.session.start().await.unwrap();
    let mut outbound = h.endpoint.take_outbound();

    h.mic.send(vec![0.3; 4096]).unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(outbound.try_recv().is_err());
    assert_eq!(h.session.volume(), 0.0);
    assert_eq!(h.session.diagnostics_snapshot().frames_captured, 0);

    h.session.stop();
}

#[tokio::test]
async fn back_to_back_segments_start_exactly_after_each_other() {
    let h = harness();
    h.start_active().await;

    h.endpoint
        .emit(SessionEvent::Message(ServerMessage::with_audio(speech(0.5, 0.1))));
    h.endpoint
        .emit(SessionEvent::Message(ServerMessage::with_audio(speech(0.3, 0.1))));
    eventually(|| h.live_len() == 2).await;

    let snap = h.session.playback_snapshot().unwrap();
    assert_eq!(snap.clock, 0.0);
    assert_eq!(snap.live[0].start, 0.0);
    assert_eq!(snap.live[1].start, snap.live[0].start + 0.5);
    assert_eq!(snap.cursor, 0.8);
    assert_eq!(h.session.diagnostics_snapshot().segments_scheduled, 2);

    h.session.stop();
}

#[tokio::test]
async fn interruption_stops_playback_and_resets_cursor() {
    let h = harness();
    h.start_active().await;

    h.endpoint
        .emit(SessionEvent::Message(ServerMessage::with_audio(speech(0.5, 0.2))));
    eventually(|| h.live_len() == 1).await;
    assert_eq!(h.mixer().active_voices(), 1);

    h.endpoint.emit(SessionEvent::Message(ServerMessage::interruption()));
    eventually(|| h.live_len() == 0).await;
    let snap = h.session.playback_snapshot().unwrap();
    assert_eq!(snap.cursor, 0.0);
    assert_eq!(h.mixer().active_voices(), 0);
    assert_eq!(h.session.diagnostics_snapshot().interruptions, 1);

    // The next reply is scheduled from the clock, not after the stopped one.
    h.endpoint
        .emit(SessionEvent::Message(ServerMessage::with_audio(speech(0.2, 0.2))));
    eventually(|| h.live_len() == 1).await;
    let snap = h.session.playback_snapshot().unwrap();
    assert_eq!(snap.live[0].start, snap.clock);
    assert!(h.session.is_active());

    h.session.stop();
}

#[tokio::test]
async fn stop_twice_is_harmless_and_releases_once() {
    let h = harness();
    h.start_active().await;

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.session.snapshot().status, "Session ended.");
    assert!(!h.session.snapshot().is_active);

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);

    assert_eq!(h.host.mic_stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.endpoint.closes.load(Ordering::SeqCst), 1);
    assert!(h.session.playback_snapshot().is_none());
}

#[tokio::test]
async fn stop_before_start_leaves_session_idle() {
    let h = harness();
    h.session.stop();
    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.session.snapshot().status, "Ready");
}

#[tokio::test]
async fn session_can_be_restarted_after_stop() {
    let h = harness();
    h.start_active().await;
    h.session.stop();

    h.start_active().await;
    assert!(h.session.is_active());
    h.session.stop();
    assert_eq!(h.endpoint.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let h = harness();
    h.start_active().await;
    assert!(matches!(
        h.session.start().await,
        Err(TutorError::AlreadyRunning)
    ));
    assert!(h.session.is_active());
    h.session.stop();
}

#[tokio::test]
async fn microphone_failure_passes_through_error_to_idle() {
    let h = harness_with(false, MockEndpoint::default());
    let mut status = h.session.subscribe_status();

    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, TutorError::NoDefaultInputDevice));

    let states: Vec<SessionState> = std::iter::from_fn(|| status.try_recv().ok())
        .map(|e| e.state)
        .collect();
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Error,
            SessionState::Closing,
            SessionState::Idle
        ]
    );
    let snap = h.session.snapshot();
    assert_eq!(snap.state, SessionState::Idle);
    assert!(snap.status.contains("Microphone"));
    assert!(!h.endpoint.connected());
}

#[tokio::test]
async fn connection_failure_releases_devices() {
    let h = harness_with(
        true,
        MockEndpoint {
            refuse: true,
            ..MockEndpoint::default()
        },
    );
    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, TutorError::Connection(_)));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.host.mic_stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_audio_is_dropped_and_session_continues() {
    let h = harness();
    h.start_active().await;

    // Three bytes: not a whole PCM16 sample.
    h.endpoint
        .emit(SessionEvent::Message(ServerMessage::with_audio("AAEC")));
    h.endpoint
        .emit(SessionEvent::Message(ServerMessage::with_audio("***")));
    eventually(|| h.session.diagnostics_snapshot().decode_errors == 2).await;
    assert!(h.session.is_active());
    assert_eq!(h.live_len(), 0);

    h.endpoint
        .emit(SessionEvent::Message(ServerMessage::with_audio(speech(0.1, 0.1))));
    eventually(|| h.live_len() == 1).await;

    h.session.stop();
}

#[tokio::test]
async fn remote_close_tears_down() {
    let h = harness();
    h.start_active().await;

    h.endpoint.emit(SessionEvent::Closed("bye".into()));
    eventually(|| h.session.state() == SessionState::Idle).await;
    assert_eq!(h.session.snapshot().status, "Connection closed.");
    assert_eq!(h.host.mic_stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.endpoint.closes.load(Ordering::SeqCst), 1);

    // A later explicit stop is a no-op.
    h.session.stop();
    assert_eq!(h.session.snapshot().status, "Connection closed.");
}

#[tokio::test]
async fn mid_session_error_surfaces_status_and_returns_idle() {
    let h = harness();
    h.start_active().await;
    let mut status = h.session.subscribe_status();

    h.endpoint.emit(SessionEvent::Error("socket reset".into()));
    eventually(|| h.session.state() == SessionState::Idle).await;

    let first = status.try_recv().unwrap();
    assert_eq!(first.state, SessionState::Error);
    assert!(first.message.contains("socket reset"));
    assert!(h.session.snapshot().status.contains("socket reset"));
    assert_eq!(h.endpoint.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_while_connecting_discards_late_connection() {
    let (open_gate, gate) = oneshot::channel();
    let h = harness_with(
        true,
        MockEndpoint {
            gate: Mutex::new(Some(gate)),
            ..MockEndpoint::default()
        },
    );

    let session = h.session.clone();
    let starting = tokio::spawn(async move { session.start().await });
    eventually(|| h.endpoint.connected()).await;
    assert_eq!(h.session.state(), SessionState::Connecting);

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.host.mic_stops.load(Ordering::SeqCst), 1);

    open_gate.send(()).unwrap();
    starting.await.unwrap().expect("start resolves quietly");
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.endpoint.closes.load(Ordering::SeqCst), 1);
}
