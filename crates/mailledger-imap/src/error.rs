//! Error types for the IMAP library.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Protocol parsing error.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server returned NO response.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server returned BAD response.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection was closed by the peer before the command completed.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A pending command was cancelled before it completed.
    #[error("Command was cancelled")]
    Cancelled,

    /// The server's advertised capabilities do not include one required for
    /// the requested operation.
    #[error("Required capability not advertised by server: {0}")]
    CapabilityMissing(String),

    /// SORT was requested but the server did not advertise the SORT capability.
    #[error("Server does not support SORT")]
    SortNotSupported,

    /// SORT=DISPLAY ordering was requested but the server does not support it.
    #[error("Server does not support SORT=DISPLAY")]
    SortDisplayNotSupported,

    /// ANNOTATEMORE/METADATA was requested but the server does not support it.
    #[error("Server does not support annotations")]
    AnnotationNotSupported,

    /// An unsupported SORT key or ordering was requested.
    #[error("Unsupported sort order-by type: {0}")]
    UnsupportedOrderByType(String),

    /// A proxy handshake (HTTP CONNECT, SOCKS4/4a, SOCKS5) failed.
    #[error("Proxy error ({kind:?}): {msg}")]
    ProxyError {
        /// Which stage of the proxy handshake failed.
        kind: ProxyErrorKind,
        /// Human-readable detail.
        msg: String,
    },

    /// STARTTLS/upgrade negotiation failed.
    #[error("TLS upgrade failed: {0}")]
    TlsUpgradeFailed(String),

    /// The requested feature is not available in this build or configuration.
    #[error("Feature unavailable: {0}")]
    FeatureUnavailable(String),
}

/// Which stage of a proxy handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    /// The proxy requires authentication credentials that were not supplied
    /// or were rejected outright.
    AuthRequired,
    /// Supplied proxy credentials were rejected.
    AuthFailed,
    /// The proxy could not reach the requested target host.
    HostUnreachable,
    /// The proxy replied with a malformed or unexpected handshake message.
    ProtocolViolation,
    /// The proxy rejected the CONNECT/relay request.
    Rejected,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
