//! # devtalk-core
//!
//! Real-time voice pipeline for live English practice with a remote
//! conversational model.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → MicSource → FrameAssembler(4096 @ 16 kHz) → CapturePipeline
//!                                                              │ codec::encode
//!                                                              ▼
//!                                                   OutboundSender (try_send)
//!                                                              │
//!                                                     LiveConnection ⇄ remote model
//!                                                              │
//!                                                   SessionEvent channel
//!                                                              │
//!                                   LiveSession ── codec::decode_audio_samples
//!                                                              │
//!                                      PlaybackScheduler → Mixer(24 kHz) → SpeakerSink
//! ```
//!
//! Device callbacks never lock or allocate; all heap work happens on the
//! capture and playback worker threads or the session's event task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod ipc;
pub mod live;
pub mod playback;
pub mod session;
pub mod tutor;

// Convenience re-exports for downstream crates
pub use audio::{AudioHost, CpalHost};
pub use error::{Result, TutorError};
pub use ipc::events::{AudioActivityEvent, SessionState, SessionStatusEvent};
pub use live::{GeminiLiveEndpoint, LiveEndpoint, LiveSetup};
pub use playback::{PlaybackScheduler, PlaybackSnapshot, ScheduledSegment};
pub use session::{LiveSession, SessionConfig, SessionSnapshot};
