use std::io;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unable to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server did not accept the username/oauth combination")]
    LoginRejected,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("chat connection is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<LinesCodecError> for ChatError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(e) => ChatError::Io(e),
            LinesCodecError::MaxLineLengthExceeded => ChatError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "server line exceeds maximum length",
            )),
        }
    }
}
