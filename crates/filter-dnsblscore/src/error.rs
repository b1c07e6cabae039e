use thiserror::Error;

/// Violations of the filter protocol contract.
///
/// smtpd guarantees well-formed, correctly ordered input, so none of
/// these are recoverable: they all end the process.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("i/o error on the protocol stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing atoms: {0}")]
    MissingAtoms(String),
    #[error("protocol field is not valid UTF-8: {0}")]
    InvalidText(String),
    #[error("invalid stream: {0}")]
    InvalidStream(String),
    #[error("invalid {stream} phase: {phase}")]
    InvalidPhase { stream: &'static str, phase: String },
    #[error("invalid protocol version: {0}")]
    InvalidVersion(String),
    #[error("invalid session ID: {0}")]
    UnknownSession(String),
    #[error("duplicate session ID: {0}")]
    DuplicateSession(String),
    #[error("{phase} expects {expected} parameters, got {got}")]
    InvalidParams {
        phase: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{phase} event for session {session} has no token")]
    MissingToken {
        phase: &'static str,
        session: String,
    },
    #[error("the output stream has been closed")]
    OutputClosed,
}
