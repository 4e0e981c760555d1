//! Error types for the reprise player.

use std::io;
use thiserror::Error;

/// Result type alias for player operations.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Main error type for the player.
///
/// `NoRequests`, `RequestError` and `ServerError` are the terminal
/// outcomes of a replay session; the remaining variants surface from
/// configuration and input handling.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// The session started with an empty scenario and an empty or
    /// immediately exhausted access log.
    #[error("no requests to play")]
    NoRequests,

    /// Consecutive transport or request construction failures reached
    /// the halt threshold.
    #[error("request errors exceeded the halt threshold")]
    RequestError,

    /// Consecutive 5xx responses reached the halt threshold.
    #[error("server errors exceeded the halt threshold")]
    ServerError,

    /// The access log format expression failed to compile.
    #[error("invalid access log format: {0}")]
    LogFormat(#[from] regex::Error),

    /// An unrecognized redirect behavior name.
    #[error("invalid redirect behavior: {0}")]
    InvalidRedirectBehavior(String),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
