use thiserror::Error;

/// All errors produced by devtalk-core.
#[derive(Debug, Error)]
pub enum TutorError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("live connection error: {0}")]
    Connection(String),

    #[error("live protocol error: {0}")]
    Protocol(String),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("resource already released: {0}")]
    Released(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TutorError {
    /// Whether the error ends the session (device, connection) or only drops
    /// the offending payload (decode).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TutorError::Decode(_) | TutorError::Released(_))
    }
}

pub type Result<T> = std::result::Result<T, TutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_not_fatal() {
        assert!(!TutorError::Decode("odd length".into()).is_fatal());
        assert!(!TutorError::Released("speaker").is_fatal());
        assert!(TutorError::Connection("refused".into()).is_fatal());
        assert!(TutorError::NoDefaultInputDevice.is_fatal());
    }
}
