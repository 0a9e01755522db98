//! `LiveSession`: lifecycle controller for one voice conversation.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──► Connecting ──Opened──► Active ──stop() / Closed / Error──► Closing ──► Idle
//!                       │                                                         ▲
//!                       └──────── device or connect failure (Error) ──────────────┘
//! ```
//!
//! Every resource acquired while connecting is parked in the phase itself, so
//! whichever path leaves `Connecting`/`Active` first takes it and releases it
//! exactly once. Later teardown calls find `Idle` and return.
//!
//! ## Events
//!
//! Connection callbacks, speaker faults and microphone faults all arrive as
//! [`SessionEvent`]s on one channel and are handled by a single task, one at
//! a time. Each `start()` gets a new generation number; events and late
//! device/connection results from an older generation are ignored.

pub mod diagnostics;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{AudioHost, CaptureRequest, PlaybackRequest},
    capture::{CaptureContext, CapturePipeline, VolumeMeter, DEFAULT_FRAME_SIZE, DEFAULT_VOLUME_GAIN},
    codec::{self, PlaybackSegment},
    error::{Result, TutorError},
    ipc::events::{AudioActivityEvent, SessionState, SessionStatusEvent},
    live::{EventReceiver, LiveConnection, LiveEndpoint, LiveSetup, ServerMessage, SessionEvent},
    playback::{PlaybackContext, PlaybackSnapshot},
};

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

/// Broadcast channel capacity for status and activity subscribers.
const BROADCAST_CAP: usize = 256;

pub const STATUS_READY: &str = "Ready";
pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_CONNECTED: &str = "Connected! You can speak now.";
pub const STATUS_ENDED: &str = "Session ended.";
pub const STATUS_CLOSED: &str = "Connection closed.";

/// Audio parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Rate captured audio is sent at. Default: 16000.
    pub capture_sample_rate: u32,
    /// Samples per outbound frame. Default: 4096.
    pub frame_size: usize,
    /// Default: 1.
    pub capture_channels: u16,
    /// Rate inbound audio is decoded and played at. Default: 24000.
    pub playback_sample_rate: u32,
    /// Default: 1.
    pub playback_channels: u16,
    /// Volume display gain over frame RMS. Default: 5.0.
    pub volume_gain: f32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            frame_size: DEFAULT_FRAME_SIZE,
            capture_channels: 1,
            playback_sample_rate: 24_000,
            playback_channels: 1,
            volume_gain: DEFAULT_VOLUME_GAIN,
            input_device: None,
            output_device: None,
        }
    }
}

/// What the UI shows.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: String,
    pub is_active: bool,
    /// Latest capture level in [0, 1].
    pub volume: f32,
}

/// Resources owned by a running session. Each slot is taken exactly once.
#[derive(Default)]
struct SessionResources {
    capture: Option<CaptureContext>,
    playback: Option<PlaybackContext>,
    connection: Option<Box<dyn LiveConnection>>,
}

impl SessionResources {
    /// Release everything, continuing past individual failures.
    fn release(self) {
        let SessionResources {
            capture,
            playback,
            connection,
        } = self;

        if let Some(capture) = capture {
            if let Err(e) = capture.close() {
                debug!("capture release: {e}");
            }
        }
        if let Some(playback) = playback {
            let stopped = playback.scheduler().interrupt();
            if stopped > 0 {
                debug!(stopped, "live segments stopped on teardown");
            }
            if let Err(e) = playback.close() {
                debug!("playback release: {e}");
            }
        }
        if let Some(mut connection) = connection {
            if let Err(e) = connection.close() {
                debug!("connection release: {e}");
            }
        }
    }
}

enum Phase {
    Idle,
    /// Devices and connection are being acquired; `resources` fills up as
    /// each one arrives.
    Connecting {
        generation: u64,
        resources: SessionResources,
    },
    Active {
        generation: u64,
        resources: SessionResources,
    },
    Closing,
}

impl Phase {
    fn generation(&self) -> Option<u64> {
        match self {
            Phase::Connecting { generation, .. } | Phase::Active { generation, .. } => {
                Some(*generation)
            }
            Phase::Idle | Phase::Closing => None,
        }
    }

    fn resources(&self) -> Option<&SessionResources> {
        match self {
            Phase::Connecting { resources, .. } | Phase::Active { resources, .. } => Some(resources),
            Phase::Idle | Phase::Closing => None,
        }
    }

    fn into_resources(self) -> SessionResources {
        match self {
            Phase::Connecting { resources, .. } | Phase::Active { resources, .. } => resources,
            Phase::Idle | Phase::Closing => SessionResources::default(),
        }
    }
}

struct SessionInner {
    config: SessionConfig,
    setup: LiveSetup,
    host: Arc<dyn AudioHost>,
    endpoint: Arc<dyn LiveEndpoint>,
    phase: Mutex<Phase>,
    generation: AtomicU64,
    /// Written only while holding `phase`.
    status: Mutex<SessionStatusEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    volume: Arc<VolumeMeter>,
    diagnostics: Arc<SessionDiagnostics>,
}

/// Handle to the session controller. Cheap to clone; the session is torn down
/// when the last handle is dropped.
#[derive(Clone)]
pub struct LiveSession(Arc<SessionInner>);

impl LiveSession {
    pub fn new(
        config: SessionConfig,
        setup: LiveSetup,
        host: Arc<dyn AudioHost>,
        endpoint: Arc<dyn LiveEndpoint>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self(Arc::new(SessionInner {
            config,
            setup,
            host,
            endpoint,
            phase: Mutex::new(Phase::Idle),
            generation: AtomicU64::new(0),
            status: Mutex::new(SessionStatusEvent {
                state: SessionState::Idle,
                message: STATUS_READY.into(),
                is_active: false,
            }),
            status_tx,
            activity_tx,
            volume: Arc::new(VolumeMeter::default()),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }))
    }

    /// Acquire the microphone and speaker, then open the live connection.
    ///
    /// Returns once the connection is established; the session becomes
    /// `Active` when the server acknowledges the setup. A `stop()` issued
    /// while this is in flight wins: the call returns `Ok(())` with the
    /// session idle and anything acquired late released.
    ///
    /// # Errors
    /// - `TutorError::AlreadyRunning` unless idle.
    /// - The device or connection error that aborted the attempt. The session
    ///   has already passed through `Error` and `Closing` back to `Idle`.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.0;
        let generation = {
            let mut phase = inner.phase.lock();
            if !matches!(*phase, Phase::Idle) {
                return Err(TutorError::AlreadyRunning);
            }
            let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *phase = Phase::Connecting {
                generation,
                resources: SessionResources::default(),
            };
            inner.diagnostics.reset();
            inner.volume.reset();
            inner.set_status(SessionState::Connecting, STATUS_CONNECTING);
            generation
        };
        info!(generation, model = inner.setup.model.as_str(), "session starting");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let config = &inner.config;

        let pipeline = Arc::new(CapturePipeline::new(
            config.volume_gain,
            Arc::clone(&inner.volume),
            inner.activity_tx.clone(),
            Arc::clone(&inner.diagnostics),
        ));
        let capture = CaptureContext::open(
            Arc::clone(&inner.host),
            CaptureRequest {
                sample_rate: config.capture_sample_rate,
                preferred_device: config.input_device.clone(),
            },
            config.frame_size,
            pipeline,
            events_tx.clone(),
        )
        .await;
        let capture = inner.checked(generation, capture)?;
        if let Err(capture) = inner.adopt(generation, capture, |r| &mut r.capture) {
            let _ = capture.close();
            return Ok(());
        }

        let playback = PlaybackContext::open(
            Arc::clone(&inner.host),
            PlaybackRequest {
                sample_rate: config.playback_sample_rate,
                preferred_device: config.output_device.clone(),
            },
            events_tx.clone(),
        )
        .await;
        let playback = inner.checked(generation, playback)?;
        if let Err(playback) = inner.adopt(generation, playback, |r| &mut r.playback) {
            let _ = playback.close();
            return Ok(());
        }

        let connection = inner
            .endpoint
            .connect(&inner.setup, events_tx)
            .await;
        let connection = inner.checked(generation, connection)?;
        if let Err(mut connection) = inner.adopt(generation, connection, |r| &mut r.connection) {
            let _ = connection.close();
            return Ok(());
        }

        tokio::spawn(run_events(Arc::downgrade(&self.0), generation, events_rx));
        debug!(generation, "session resources acquired, awaiting setup ack");
        Ok(())
    }

    /// Tear the session down. Safe from any state, any number of times.
    pub fn stop(&self) {
        if self.0.shut_down(None, None, STATUS_ENDED) {
            info!("session stopped");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.0.status.lock().clone();
        SessionSnapshot {
            state: status.state,
            status: status.message,
            is_active: status.is_active,
            volume: self.0.volume.get(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.0.status.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn volume(&self) -> f32 {
        self.0.volume.get()
    }

    /// Scheduler cursor, clock and live-set while playback is open.
    pub fn playback_snapshot(&self) -> Option<PlaybackSnapshot> {
        let phase = self.0.phase.lock();
        phase
            .resources()
            .and_then(|r| r.playback.as_ref())
            .map(|p| p.scheduler().snapshot())
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.0.status_tx.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.0.activity_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.0.diagnostics.snapshot()
    }
}

impl SessionInner {
    /// Must be called with `phase` held.
    fn set_status(&self, state: SessionState, message: &str) {
        let event = SessionStatusEvent {
            state,
            message: message.to_string(),
            is_active: state == SessionState::Active,
        };
        *self.status.lock() = event.clone();
        let _ = self.status_tx.send(event);
    }

    /// Turn an acquisition failure into the `Error → Closing → Idle` pass.
    fn checked<T>(&self, generation: u64, outcome: Result<T>) -> Result<T> {
        outcome.map_err(|e| {
            warn!(generation, "session start failed: {e}");
            self.shut_down(Some(generation), Some(&e), "");
            e
        })
    }

    /// Park `item` in the current phase's resources if this generation still
    /// owns it. Hands the item back otherwise.
    fn adopt<T>(
        &self,
        generation: u64,
        item: T,
        slot: impl FnOnce(&mut SessionResources) -> &mut Option<T>,
    ) -> std::result::Result<(), T> {
        let mut phase = self.phase.lock();
        match &mut *phase {
            Phase::Connecting {
                generation: g,
                resources,
            } if *g == generation => {
                *slot(resources) = Some(item);
                Ok(())
            }
            _ => {
                info!(generation, "session stopped while connecting");
                Err(item)
            }
        }
    }

    /// Leave `Connecting`/`Active` for `Idle`, releasing every resource.
    ///
    /// With `generation` set, only that run is torn down. With `failure` set,
    /// the session reports `Error` first and keeps the error as its status
    /// line. Returns whether anything was torn down.
    fn shut_down(&self, generation: Option<u64>, failure: Option<&TutorError>, message: &str) -> bool {
        let message = match failure {
            Some(e) => failure_message(e),
            None => message.to_string(),
        };
        let resources = {
            let mut phase = self.phase.lock();
            let owned = match (phase.generation(), generation) {
                (Some(current), Some(wanted)) => current == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !owned {
                return false;
            }
            let old = std::mem::replace(&mut *phase, Phase::Closing);
            if failure.is_some() {
                self.set_status(SessionState::Error, &message);
            }
            self.set_status(SessionState::Closing, &message);
            old.into_resources()
        };

        resources.release();

        let mut phase = self.phase.lock();
        *phase = Phase::Idle;
        self.volume.reset();
        self.set_status(SessionState::Idle, &message);
        true
    }

    fn handle_event(&self, generation: u64, event: SessionEvent) {
        match event {
            SessionEvent::Opened => self.on_opened(generation),
            SessionEvent::Message(msg) => self.on_message(generation, &msg),
            SessionEvent::Error(detail) => {
                error!(generation, %detail, "live session error");
                self.shut_down(
                    Some(generation),
                    Some(&TutorError::Connection(detail)),
                    "",
                );
            }
            SessionEvent::Closed(reason) => {
                info!(generation, %reason, "remote closed the session");
                self.shut_down(Some(generation), None, STATUS_CLOSED);
            }
        }
    }

    fn on_opened(&self, generation: u64) {
        let mut phase = self.phase.lock();
        let resources = match &mut *phase {
            Phase::Connecting {
                generation: g,
                resources,
            } if *g == generation => std::mem::take(resources),
            _ => {
                debug!(generation, "open signal ignored");
                return;
            }
        };
        if let (Some(capture), Some(connection)) = (&resources.capture, &resources.connection) {
            capture.wire(connection.outbound());
        }
        *phase = Phase::Active {
            generation,
            resources,
        };
        self.set_status(SessionState::Active, STATUS_CONNECTED);
        info!(generation, "session active");
    }

    fn on_message(&self, generation: u64, msg: &ServerMessage) {
        for text in msg.text_parts() {
            debug!(%text, "model text");
        }

        // Decode before taking the phase lock.
        let segments: Vec<PlaybackSegment> = msg
            .audio_payloads()
            .into_iter()
            .filter_map(|data| match self.decode_segment(data) {
                Ok(segment) => {
                    SessionDiagnostics::bump(&self.diagnostics.segments_decoded);
                    Some(segment)
                }
                Err(e) => {
                    warn!("dropping inbound audio: {e}");
                    SessionDiagnostics::bump(&self.diagnostics.decode_errors);
                    None
                }
            })
            .collect();

        let phase = self.phase.lock();
        let Phase::Active {
            generation: g,
            resources,
        } = &*phase
        else {
            return;
        };
        if *g != generation {
            return;
        }
        let Some(playback) = resources.playback.as_ref() else {
            return;
        };

        if !segments.is_empty() {
            playback.resume();
        }
        for segment in segments {
            match playback.scheduler().enqueue(segment) {
                Ok(_) => SessionDiagnostics::bump(&self.diagnostics.segments_scheduled),
                Err(e) => warn!("segment not scheduled: {e}"),
            }
        }
        if msg.is_interrupted() {
            let stopped = playback.scheduler().interrupt();
            SessionDiagnostics::bump(&self.diagnostics.interruptions);
            info!(stopped, "model interrupted by user speech");
        }
        if msg.is_turn_complete() {
            debug!("model turn complete");
        }
    }

    fn decode_segment(&self, data: &str) -> Result<PlaybackSegment> {
        let bytes = codec::decode(data)?;
        codec::decode_audio_samples(
            &bytes,
            self.config.playback_sample_rate,
            self.config.playback_channels,
        )
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shut_down(None, None, STATUS_ENDED);
    }
}

/// Status line shown for a failure.
fn failure_message(e: &TutorError) -> String {
    match e {
        TutorError::NoDefaultInputDevice | TutorError::AudioDevice(_) => {
            format!("Microphone or API error: {e}")
        }
        TutorError::Connection(detail) => format!("An error occurred. Please try again. ({detail})"),
        other => format!("Microphone or API error: {other}"),
    }
}

async fn run_events(session: Weak<SessionInner>, generation: u64, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if inner.generation.load(Ordering::Acquire) != generation {
            break;
        }
        inner.handle_event(generation, event);
        if inner.phase.lock().generation() != Some(generation) {
            break;
        }
    }
    debug!(generation, "session event loop finished");
}
