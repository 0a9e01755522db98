//! Connection to the remote real-time model.
//!
//! The session controller only sees the [`LiveEndpoint`] / [`LiveConnection`]
//! traits; [`gemini::GeminiLiveEndpoint`] is the production implementation
//! and tests substitute their own.
//!
//! Connection callbacks are delivered as [`SessionEvent`]s over an unbounded
//! channel, so transport tasks never block on the controller.

pub mod gemini;
pub mod protocol;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{codec::EncodedChunk, error::Result, tutor::SYSTEM_INSTRUCTION_TUTOR};

pub use gemini::GeminiLiveEndpoint;
pub use protocol::{ClientMessage, ServerMessage};

/// Native-audio model used for live practice.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
/// Prebuilt voice the tutor speaks with.
pub const DEFAULT_VOICE: &str = "Kore";

/// Callback surface of an open connection.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The server accepted the setup; audio may flow.
    Opened,
    Message(ServerMessage),
    Error(String),
    Closed(String),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// What the connection is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
}

impl Default for LiveSetup {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
            system_instruction: SYSTEM_INSTRUCTION_TUTOR.into(),
        }
    }
}

/// Result of handing one chunk to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The transport is behind; the chunk was discarded.
    Dropped,
    /// The connection is gone.
    Closed,
}

/// Non-blocking handle for outbound audio chunks.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<EncodedChunk>,
}

impl OutboundSender {
    /// Bounded channel between the capture worker and the transport writer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EncodedChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never waits: a full queue drops the chunk.
    pub fn try_send(&self, chunk: EncodedChunk) -> SendOutcome {
        match self.tx.try_send(chunk) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound audio queue full, dropping chunk");
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open bidirectional session.
pub trait LiveConnection: Send {
    /// Where captured audio goes.
    fn outbound(&self) -> OutboundSender;

    /// Hand one chunk to the transport without waiting.
    fn send_realtime(&self, chunk: EncodedChunk) -> SendOutcome {
        self.outbound().try_send(chunk)
    }

    /// Close the connection.
    ///
    /// # Errors
    /// `TutorError::Released` when already closed.
    fn close(&mut self) -> Result<()>;
}

/// Something that can open a [`LiveConnection`].
pub trait LiveEndpoint: Send + Sync + 'static {
    /// Resolves once the transport is up. Server callbacks (starting with
    /// [`SessionEvent::Opened`]) arrive on `events`.
    fn connect(
        &self,
        setup: &LiveSetup,
        events: EventSender,
    ) -> BoxFuture<'static, Result<Box<dyn LiveConnection>>>;
}
