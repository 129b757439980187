//! Error types for messaging operations

use depot_tenancy::TenancyError;
use thiserror::Error;

/// Errors that can occur during messaging operations
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Failed to publish a message
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Failed to subscribe to a topic
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Failed to serialize a message
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a message
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Broker is closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Tenancy operation failed
    #[error(transparent)]
    Tenancy(#[from] TenancyError),
}

impl MessagingError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            MessagingError::Publish(_) | MessagingError::ChannelClosed(_) => true,
            MessagingError::Tenancy(err) => err.is_retryable(),
            _ => false,
        }
    }
}
