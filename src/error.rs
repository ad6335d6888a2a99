use thiserror::Error;

/// Main error type for the reelkit library
#[derive(Error, Debug)]
pub enum ReelError {
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Keyframe error: {0}")]
    Keyframe(#[from] KeyframeError),

    #[error("Timeline error: {0}")]
    Timeline(#[from] TimelineError),

    #[error("Effect error: {0}")]
    Effect(#[from] EffectError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Reader-specific errors
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Invalid or missing file: {path}")]
    InvalidFile { path: String },

    #[error("Reader is closed, call open() first: {path}")]
    ReaderClosed { path: String },

    #[error("Frame {requested} is out of bounds (video length {max})")]
    OutOfBoundsFrame { requested: i64, max: i64 },

    #[error("No audio or video streams found: {path}")]
    NoStreamsFound { path: String },

    #[error("Decoding failed: {reason}")]
    DecodingFailed { reason: String },

    #[error("Invalid format: {details}")]
    InvalidFormat { details: String },
}

/// Writer-specific errors
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Writer is closed, call open() first: {path}")]
    WriterClosed { path: String },

    #[error("Writer is already open: {path}")]
    AlreadyOpen { path: String },

    #[error("Invalid codec: {codec}")]
    InvalidCodec { codec: String },

    #[error("Invalid writer options: {details}")]
    InvalidOptions { details: String },

    #[error("Invalid sample rate: {sample_rate}")]
    InvalidSampleRate { sample_rate: u32 },

    #[error("Invalid channel count: {channels}")]
    InvalidChannels { channels: u16 },

    #[error("Encoding failed: {reason}")]
    EncodingFailed { reason: String },
}

/// Keyframe-specific errors
#[derive(Error, Debug)]
pub enum KeyframeError {
    #[error("Invalid point requested: index {index} of {count} points")]
    OutOfBoundsPoint { index: i64, count: usize },

    #[error("Keyframe JSON is invalid: {reason}")]
    InvalidJson { reason: String },
}

/// Timeline-specific errors
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Clip not found: {id}")]
    ClipNotFound { id: String },

    #[error("Effect not found: {id}")]
    EffectNotFound { id: String },

    #[error("Invalid timeline parameters: {details}")]
    InvalidParameters { details: String },
}

/// Effect-specific errors
#[derive(Error, Debug)]
pub enum EffectError {
    #[error("Effect not found: {name}")]
    NotFound { name: String },

    #[error("Effect application failed: {effect} - {reason}")]
    ApplyFailed { effect: String, reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using ReelError
pub type Result<T> = std::result::Result<T, ReelError>;

impl ReelError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            // Reopening fixes a closed reader/writer
            Self::Reader(ReaderError::ReaderClosed { .. }) => true,
            Self::Writer(WriterError::WriterClosed { .. }) => true,
            // A decoder child can die on a bad seek; the next request respawns it
            Self::Reader(ReaderError::DecodingFailed { .. }) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Reader(ReaderError::InvalidFile { path }) => {
                format!("Could not open '{}'. Please check the file exists and is a supported format.", path)
            }
            Self::Writer(WriterError::InvalidCodec { codec }) => {
                format!("Codec '{}' is not available. Run `ffmpeg -encoders` to list the codecs your build supports.", codec)
            }
            Self::Effect(EffectError::NotFound { name }) => {
                format!("Effect '{}' not found. Run `reelkit effects` to list the available effects.", name)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_reader_is_recoverable() {
        let err: ReelError = ReaderError::ReaderClosed { path: "a.mp4".to_string() }.into();
        assert!(err.is_recoverable());

        let err: ReelError = ReaderError::OutOfBoundsFrame { requested: 10, max: 5 }.into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_user_message_mentions_path() {
        let err: ReelError = ReaderError::InvalidFile { path: "missing.mov".to_string() }.into();
        assert!(err.user_message().contains("missing.mov"));

        let err = ReelError::generic("boom");
        assert_eq!(err.user_message(), "Generic error: boom");
    }
}
