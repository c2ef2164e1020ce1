use std::io;

use thiserror::Error;

use crate::{bolt::ProtocolError, packstream::PackStreamError};

/// Faults raised while driving a connection.
///
/// The first three variants are the fault kinds callers react to:
/// [`StubError::ServerExit`] means the connection is unusable,
/// [`StubError::Script`] is a test-visible failure, and
/// [`StubError::Unimplemented`] marks a legitimate protocol feature the stub
/// does not support yet.
#[derive(Debug, Error)]
pub enum StubError {
    #[error("{0}")]
    ServerExit(String),

    #[error("{0}")]
    Script(String),

    #[error("{0} is not implemented")]
    Unimplemented(String),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(PackStreamError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to encode handshake: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode handshake: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl StubError {
    /// The peer closed the stream while we were waiting on a read.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, StubError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

// Transport failures inside the codec surface as plain I/O faults.
impl From<PackStreamError> for StubError {
    fn from(value: PackStreamError) -> Self {
        match value {
            PackStreamError::Io(e) => StubError::Io(e),
            other => StubError::Codec(other),
        }
    }
}
