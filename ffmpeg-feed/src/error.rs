use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("frame has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("frame buffer holds {actual} values, {expected} expected")]
    BufferLength { expected: usize, actual: usize },

    #[error("audio channels differ in length: left={left}, right={right}")]
    AudioChannelMismatch { left: usize, right: usize },

    #[error("audio block is empty")]
    EmptyAudio,

    #[error("audio is disabled for this stream")]
    AudioDisabled,

    #[error("encoder input pipe is closed")]
    PipeClosed,

    #[error("failed to launch encoder {binary:?}: {source}")]
    ProcessLaunch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stream is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FeedError {
    /// Caller-side validation errors. They are raised before anything is written.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FeedError::ShapeMismatch { .. }
                | FeedError::BufferLength { .. }
                | FeedError::AudioChannelMismatch { .. }
                | FeedError::EmptyAudio
                | FeedError::AudioDisabled
        )
    }
}
