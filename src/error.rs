use thiserror::Error;

/// Taxonomy of request-handling failures. Every variant maps to a concrete
/// HTTP status before it ever reaches a socket; nothing here unwinds past
/// the connection worker.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("malformed request: {0}")]
    Protocol(&'static str),

    #[error("policy rejection")]
    Policy { status: u16 },

    #[error("internal error: {0}")]
    Server(String),

    #[error("connection limit reached")]
    Overload,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Status code to report to the client, when one is still meaningful.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::Protocol(_) => 400,
            ServerError::Policy { status } => *status,
            ServerError::Server(_) => 500,
            ServerError::Overload => 503,
            ServerError::Io(_) => 500,
        }
    }

    pub fn policy(status: u16) -> Self {
        ServerError::Policy { status }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
