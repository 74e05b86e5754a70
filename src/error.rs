use std::io;

/// Errors surfaced to callers of the socket/session/engine layer.
///
/// Mirrors the error categories the reference library reports
/// (`EAGAIN`, `EFSM`, `EHOSTUNREACH`, `ETERM`) without binding callers to
/// raw errno values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Non-recoverable transport failure (`EIO`/`ECONNRESET`/...).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Greeting mismatch, oversize frame, or malformed framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Benign interruption; caller should retry.
    #[error("interrupted")]
    Interrupted,

    /// API misuse, e.g. REQ send before recv (`EFSM`).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The owning context or socket is terminating (`ETERM`).
    #[error("terminating")]
    Term,
}

impl Error {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    /// Best-effort mapping to a POSIX-style errno, for callers that expect
    /// the reference library's error codes.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(e) => e.raw_os_error(),
            Error::Protocol(_) => Some(libc_eproto()),
            Error::Interrupted => Some(4), // EINTR
            Error::InvalidState(_) => Some(156), // EFSM, libzmq-local range
            Error::Term => Some(153), // ETERM, libzmq-local range
        }
    }
}

fn libc_eproto() -> i32 {
    // EPROTO on Linux; kept as a plain constant to avoid a libc dependency
    // for a single errno value.
    71
}

pub type Result<T> = std::result::Result<T, Error>;
