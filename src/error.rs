//! Error types for evmux.
//!
//! Only errors that prevent *creating* a listener or connection are
//! raised here. Errors on an already-live connection never surface
//! through `Result` — they close the connection and are reported to
//! the user as an `Event::Close` instead.

/// Result type alias for evmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can prevent a listener or connection from being
/// created.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The endpoint string did not match the accepted grammar.
    #[error("invalid endpoint: {0}")]
    Parse(String),

    /// An I/O operation failed outright (not a would-block condition).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pluggable transport (TLS hook) failed to initialize or
    /// progress its handshake.
    #[cfg(feature = "tls")]
    #[error("transport error: {0}")]
    Transport(String),
}
