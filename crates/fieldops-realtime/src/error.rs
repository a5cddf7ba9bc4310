//! # Error Types
//!
//! Semantic error types for the realtime hub manager. Every variant carries
//! enough context (hub name, method, cause) to diagnose a failure without
//! digging through logs.
//!
//! ## Propagation
//!
//! Errors raised while serving an explicit caller request (`connect`,
//! `invoke`, `disconnect`) are returned to that caller. Errors raised inside
//! the background reconnection supervisor never reach a caller; they are
//! logged and only drive the retry state.
//!
//! `HubError` is `Clone` because the outcome of a single in-flight connect
//! attempt is shared with every caller waiting on it.

use thiserror::Error;

/// Convenient Result alias for hub operations.
pub type HubResult<T> = std::result::Result<T, HubError>;

/// All errors that can occur while connecting to or talking with a hub.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    // ─── Connect ────────────────────────────────────────────────────
    /// No access token was available when a connect was attempted.
    #[error("No authentication token available")]
    NoAuthToken,

    /// The hub configuration does not carry a usable URL.
    #[error("Hub {hub} has no endpoint configured: a base URL is required")]
    MissingEndpoint { hub: String },

    /// The configured URL could not be parsed.
    #[error("Invalid hub endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// The transport failed to start.
    #[error("Failed to connect to hub {hub}: {reason}")]
    ConnectFailed { hub: String, reason: String },

    /// The server refused the protocol handshake.
    #[error("Hub {hub} rejected the handshake: {reason}")]
    HandshakeRejected { hub: String, reason: String },

    /// An established session was lost.
    #[error("Connection to hub lost: {reason}")]
    ConnectionLost { reason: String },

    // ─── Authentication ─────────────────────────────────────────────
    /// Refreshing the access token before a reconnection attempt failed.
    #[error("Token refresh failed: {reason}")]
    TokenRefreshFailed { reason: String },

    // ─── Invoke ─────────────────────────────────────────────────────
    /// The remote call failed at the transport or server level.
    #[error("Invoking {method} on hub {hub} failed: {reason}")]
    InvokeFailed {
        hub: String,
        method: String,
        reason: String,
    },

    /// The hub has no live session and is not recovering.
    #[error("Cannot invoke method {method} on hub {hub}: hub is not connected")]
    HubNotConnected { hub: String, method: String },

    /// The hub has no live session and a reconnection is in progress.
    #[error("Cannot invoke method {method} on hub {hub}: hub is currently reconnecting")]
    HubReconnecting { hub: String, method: String },

    // ─── Reconnect ──────────────────────────────────────────────────
    /// All reconnection attempts for a hub were used up.
    #[error("Max reconnection attempts ({attempts}) reached for hub {hub}")]
    MaxReconnectAttemptsExhausted { hub: String, attempts: u32 },

    // ─── Timeout ────────────────────────────────────────────────────
    /// An operation timed out.
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // ─── Protocol ───────────────────────────────────────────────────
    /// Received an unexpected or malformed hub protocol message.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // ─── Transport ──────────────────────────────────────────────────
    /// Low-level WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Payload (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl HubError {
    /// Returns `true` if this error is transient and a caller may retry
    /// the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HubError::ConnectFailed { .. }
                | HubError::ConnectionLost { .. }
                | HubError::HubReconnecting { .. }
                | HubError::Timeout { .. }
                | HubError::WebSocket(_)
        )
    }

    /// Returns `true` if this error indicates the session is dead.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            HubError::ConnectFailed { .. }
                | HubError::ConnectionLost { .. }
                | HubError::HubNotConnected { .. }
                | HubError::HubReconnecting { .. }
                | HubError::WebSocket(_)
        )
    }
}

// ─── From impls for external error types ────────────────────────────────

impl From<tokio_tungstenite::tungstenite::Error> for HubError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        HubError::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Serialization(err.to_string())
    }
}

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for HubError {
    fn from(err: toml::de::Error) -> Self {
        HubError::Config {
            reason: err.to_string(),
        }
    }
}
