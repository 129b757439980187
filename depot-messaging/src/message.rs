//! Message envelope and processing outcomes.

use crate::error::MessagingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// A message sent to or received from a broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: String,
    /// Message payload as bytes
    pub payload: Vec<u8>,
    /// Message headers/properties
    pub headers: HashMap<String, String>,
    /// Topic the message belongs to
    pub topic: String,
    /// Timestamp when the message was created
    pub timestamp: DateTime<Utc>,
    /// Optional correlation ID
    pub correlation_id: Option<String>,
    /// Message content type (e.g., "application/json")
    pub content_type: Option<String>,
}

impl Message {
    /// Create a new message with the given payload
    pub fn new<T: Into<Vec<u8>>>(topic: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            headers: HashMap::new(),
            topic: topic.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            content_type: None,
        }
    }

    /// Create a message from a JSON-serializable value
    pub fn json<T: Serialize>(topic: impl Into<String>, value: &T) -> Result<Self, MessagingError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| MessagingError::Serialization(e.to_string()))?;
        Ok(Self::new(topic, payload).with_content_type("application/json"))
    }

    /// Parse the payload as JSON
    pub fn parse_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, MessagingError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| MessagingError::Deserialization(e.to_string()))
    }

    /// Get the payload as a UTF-8 string
    pub fn payload_str(&self) -> Result<&str, MessagingError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| MessagingError::Deserialization(e.to_string()))
    }

    /// Header value, matching the name case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add a header to the message
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ id: {}, topic: {}, size: {} bytes }}",
            self.id,
            self.topic,
            self.payload.len()
        )
    }
}

/// One delivery attempt of a message
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    /// 1 for the first delivery, incremented on every redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn first(message: Message) -> Self {
        Self {
            message,
            attempt: 1,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    pub(crate) fn redeliver(&self) -> Self {
        Self {
            message: self.message.clone(),
            attempt: self.attempt.saturating_add(1),
        }
    }
}

/// Result of processing a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    /// Processed, acknowledge
    Success,
    /// Not acknowledged; redeliver after the delay
    Retry { after: Duration },
    /// Give up and move to the dead-letter queue
    DeadLetter,
    /// Discard without dead-lettering
    Reject,
}

impl ProcessingResult {
    /// Whether the transport treats the message as settled
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Success)
    }
}
