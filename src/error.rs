use std::io;

use thiserror::Error;

use crate::common::ConnectionState;
use crate::protocol::ProtocolError;

/// Errors surfaced by the chat client and server.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The server could not be reached, or the link failed during the handshake.
    #[error("could not connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("aborted by user")]
    UserAbort,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid nickname: {0}")]
    InvalidNickname(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("session is {0}")]
    InvalidState(ConnectionState),
}

impl ChatError {
    pub(crate) fn connection(addr: impl Into<String>, source: io::Error) -> Self {
        ChatError::Connection {
            addr: addr.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
