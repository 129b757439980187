//! Tenant Identifier
//!
//! The validated key every other component of the subsystem works with.

use crate::error::{ValidationError, fingerprint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest accepted tenant identifier, in bytes.
///
/// Chosen so the default naming rule (`tenant_` + id + `_schema`) stays under
/// the PostgreSQL identifier limit.
pub const MAX_TENANT_ID_LEN: usize = 40;

/// Validated tenant identifier
///
/// Lowercase ASCII letters, digits and `-`, between 1 and
/// [`MAX_TENANT_ID_LEN`] bytes. Immutable once parsed.
///
/// The alphabet keeps namespace derivation one-to-one: `-` is the only
/// character rewritten, and `_` never appears in an identifier, so no two
/// identifiers share a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use depot_tenancy::TenantId;
    ///
    /// let tenant = TenantId::parse("acme-01").unwrap();
    /// assert_eq!(tenant.as_str(), "acme-01");
    /// assert!(TenantId::parse("acme 01").is_err());
    /// assert!(TenantId::parse("ACME-01").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        const WHAT: &str = "tenant identifier";

        if raw.is_empty() {
            return Err(ValidationError::Empty { what: WHAT });
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(ValidationError::TooLong {
                what: WHAT,
                len: raw.len(),
                max: MAX_TENANT_ID_LEN,
            });
        }
        if let Some(position) = raw
            .bytes()
            .position(|b| !(b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-'))
        {
            return Err(ValidationError::DisallowedCharacter {
                what: WHAT,
                position,
                fingerprint: fingerprint(raw),
            });
        }

        Ok(Self(raw.to_string()))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}
