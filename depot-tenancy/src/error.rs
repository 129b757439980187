//! Error types for tenant namespace handling.

use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Delay suggested to callers when a namespace could not be made ready.
pub const RETRY_AFTER: Duration = Duration::from_secs(5);

/// Why an identifier or namespace name was rejected.
///
/// Variants never carry the offending input itself. Where correlation across
/// log lines is useful, a short fingerprint of the input is included instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{what} is empty")]
    Empty { what: &'static str },

    #[error("{what} is {len} bytes, limit is {max}")]
    TooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{what} contains a disallowed character at byte {position} (input {fingerprint})")]
    DisallowedCharacter {
        what: &'static str,
        position: usize,
        fingerprint: String,
    },

    #[error("{what} uses the reserved `pg_` prefix")]
    ReservedPrefix { what: &'static str },

    #[error("the system namespace cannot hold tenant data")]
    SystemNamespace,

    #[error("required field `{0}` is missing")]
    MissingField(&'static str),

    #[error("namespace does not match the name derived for tenant {tenant} (input {fingerprint})")]
    NamespaceMismatch { tenant: String, fingerprint: String },
}

/// Coarse classification used by boundaries to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Permanently invalid input. Reject, never retry.
    Validation,
    /// The database could not be made ready. Retry later.
    Provisioning,
    /// A tenant context invariant was violated upstream.
    Consistency,
}

/// Errors raised by the tenancy subsystem.
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("request carries no tenant in `{0}`")]
    MissingTenant(String),

    #[error("namespace {namespace} is not ready: {reason}")]
    Provisioning { namespace: String, reason: String },

    #[error("tenant context violation: {0}")]
    Consistency(String),

    #[error("migration source is invalid: {0}")]
    MigrationSource(String),

    #[error("database error: {0}")]
    Database(String),
}

impl TenancyError {
    /// Classify this error for acknowledgement and response decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::MissingTenant(_) => ErrorClass::Validation,
            Self::Provisioning { .. } | Self::Database(_) => ErrorClass::Provisioning,
            Self::Consistency(_) | Self::MigrationSource(_) => ErrorClass::Consistency,
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Provisioning
    }

    /// HTTP status a request boundary should answer with.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::Validation => 400,
            ErrorClass::Provisioning => 503,
            ErrorClass::Consistency => 500,
        }
    }

    /// Suggested `Retry-After` for retryable failures.
    pub fn retry_after(&self) -> Option<Duration> {
        self.is_retryable().then_some(RETRY_AFTER)
    }

    pub(crate) fn provisioning(namespace: impl Into<String>, reason: impl ToString) -> Self {
        Self::Provisioning {
            namespace: namespace.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::result::Error> for TenancyError {
    fn from(err: diesel::result::Error) -> Self {
        TenancyError::Database(err.to_string())
    }
}

/// Short, stable digest of untrusted input for diagnostics.
///
/// Twelve hex characters of SHA-256: enough to correlate repeated offenders
/// in logs without echoing attacker-controlled text.
pub fn fingerprint(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = TenancyError::from(ValidationError::Empty { what: "tenant id" });
        assert_eq!(err.class(), ErrorClass::Validation);
        assert_eq!(err.status_code(), 400);
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after(), None);

        let err = TenancyError::provisioning("tenant_acme_schema", "connection refused");
        assert_eq!(err.class(), ErrorClass::Provisioning);
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.retry_after(), Some(RETRY_AFTER));

        let err = TenancyError::Consistency("mismatch".to_string());
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fingerprint_hides_input() {
        let raw = "acme; DROP SCHEMA public";
        let fp = fingerprint(raw);
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, fingerprint(raw));
        assert!(!fp.contains("DROP"));

        let err = ValidationError::DisallowedCharacter {
            what: "namespace",
            position: 4,
            fingerprint: fp,
        };
        assert!(!err.to_string().contains("DROP"));
    }
}
