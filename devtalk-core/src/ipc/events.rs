//! Event payloads broadcast by [`LiveSession`](crate::session::LiveSession).
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `LiveSession::subscribe_status` |
//! | `AudioActivityEvent` | `LiveSession::subscribe_activity` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No resources held; `start()` may be called.
    #[default]
    Idle,
    /// Devices opening / connection handshake in progress.
    Connecting,
    /// Server acknowledged the setup; audio flows both ways.
    Active,
    /// Teardown in progress.
    Closing,
    /// Last attempt failed. Observed transiently; the session returns to idle.
    Error,
}

/// Emitted whenever the state or the user-facing status line changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Human-readable status line, e.g. "Connected! You can speak now.".
    pub message: String,
    /// True only while audio is flowing.
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Audio activity
// ---------------------------------------------------------------------------

/// Emitted once per captured frame while the session is wired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing frame sequence number.
    pub seq: u64,
    /// Root-mean-square level of the frame.
    pub rms: f32,
    /// Display level in [0, 1]: `min(rms * gain, 1)`.
    pub volume: f32,
}
