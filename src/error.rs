use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    /// Login rejected the credentials (HTTP 400).
    Auth(String),
    /// Login failed for a reason the portal did not classify.
    UnknownAuth(String),
    Forbidden(String),
    Server(String),
    /// Credentials are fine but the web session went stale.
    ExpiredSession,
    ParameterChange { parameter_id: String, reason: String },
    Api { status: u16, message: String },
    Protocol(String),
    InvalidEntity { device_id: String, key: String },
    InvalidOption(String),
    Timeout,
    CoolingDown(Duration),
    /// Any failure of a whole fetch cycle, as handed to the scheduler.
    Fetch(Box<Error>),
    Io(std::io::Error),
}

impl Error {
    /// Failures worth one immediate retry before giving up on a cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Server(_) | Error::Forbidden(_) | Error::Timeout => true,
            Error::Api { status, .. } => *status >= 500,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Fetch(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// Strips any `Fetch` wrapping.
    pub fn root(&self) -> &Error {
        match self {
            Error::Fetch(inner) => inner.root(),
            other => other,
        }
    }

    pub(crate) fn fetch(e: Error) -> Self {
        match e {
            Error::Fetch(_) => e,
            other => Error::Fetch(Box::new(other)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Error::UnknownAuth(msg) => write!(f, "unknown authentication error: {msg}"),
            Error::Forbidden(msg) => write!(f, "access forbidden: {msg}"),
            Error::Server(msg) => write!(f, "server error: {msg}"),
            Error::ExpiredSession => write!(f, "web session expired"),
            Error::ParameterChange { parameter_id, reason } => {
                write!(f, "could not change parameter {parameter_id}: {reason}")
            }
            Error::Api { status, message } => write!(f, "API error (HTTP {status}): {message}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::InvalidEntity { device_id, key } => {
                write!(f, "no writeable entity {key} on device {device_id}")
            }
            Error::InvalidOption(option) => write!(f, "invalid option: {option}"),
            Error::Timeout => write!(f, "fetch cycle timed out"),
            Error::CoolingDown(left) => {
                write!(f, "cooling down after repeated failures ({}s left)", left.as_secs())
            }
            Error::Fetch(inner) => write!(f, "error fetching data from WEM Portal: {inner}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Fetch(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
