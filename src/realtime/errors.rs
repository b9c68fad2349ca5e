//! # Real-Time Errors
//!
//! Error types for the subscription layer.

use thiserror::Error;

/// Result type for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Real-time errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    // ==================
    // Connection Errors
    // ==================
    /// Transport is not connected
    #[error("Transport disconnected")]
    Disconnected,

    /// Channel could not be opened on the transport
    #[error("Failed to open channel {topic}: {reason}")]
    ChannelOpen { topic: String, reason: String },

    /// Channel was closed by the remote side
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // ==================
    // Subscription Errors
    // ==================
    /// Invalid table name
    #[error("Invalid table: {0}")]
    InvalidTable(String),

    /// Subscription not found
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Event payload could not be decoded into the expected record
    #[error("Malformed event on {table}: {reason}")]
    MalformedEvent { table: String, reason: String },

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Whether the transport may recover from this error on reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RealtimeError::Disconnected
                | RealtimeError::ChannelOpen { .. }
                | RealtimeError::ChannelClosed(_)
        )
    }

    /// Stable code used in structured log output
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::Disconnected => "RT_DISCONNECTED",
            RealtimeError::ChannelOpen { .. } => "RT_CHANNEL_OPEN",
            RealtimeError::ChannelClosed(_) => "RT_CHANNEL_CLOSED",
            RealtimeError::InvalidTable(_) => "RT_INVALID_TABLE",
            RealtimeError::SubscriptionNotFound(_) => "RT_SUBSCRIPTION_NOT_FOUND",
            RealtimeError::MalformedEvent { .. } => "RT_MALFORMED_EVENT",
            RealtimeError::Internal(_) => "RT_INTERNAL",
        }
    }
}
