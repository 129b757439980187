//! Tenant Header
//!
//! Extracts the tenant identifier carried by every tenant-scoped request. A
//! missing or malformed header is a boundary rejection; no tenant context is
//! populated for such a request.

use crate::error::{TenancyError, ValidationError, fingerprint};
use crate::tenant::TenantId;
use http::HeaderMap;
use http::header::HeaderName;
use std::collections::HashMap;
use tracing::debug;

/// Default header carrying the tenant identifier.
pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-id";

/// Well-known tenant header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantHeader {
    name: HeaderName,
}

impl Default for TenantHeader {
    fn default() -> Self {
        Self {
            name: HeaderName::from_static(DEFAULT_TENANT_HEADER),
        }
    }
}

impl TenantHeader {
    /// Use a custom header name
    ///
    /// # Examples
    ///
    /// ```
    /// use depot_tenancy::TenantHeader;
    ///
    /// let header = TenantHeader::new("X-Depot-Tenant").unwrap();
    /// assert_eq!(header.name(), "x-depot-tenant");
    /// ```
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        const WHAT: &str = "tenant header name";

        if name.is_empty() {
            return Err(ValidationError::Empty { what: WHAT });
        }
        let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).map_err(|_| {
            ValidationError::DisallowedCharacter {
                what: WHAT,
                position: name
                    .bytes()
                    .position(|b| !(b.is_ascii_alphanumeric() || b == b'-' || b == b'_'))
                    .unwrap_or(0),
                fingerprint: fingerprint(name),
            }
        })?;
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Extract the tenant from HTTP headers
    pub fn extract(&self, headers: &HeaderMap) -> Result<TenantId, TenancyError> {
        let value = headers
            .get(&self.name)
            .ok_or_else(|| TenancyError::MissingTenant(self.name.to_string()))?;

        let raw = value.to_str().map_err(|_| {
            debug!(header = %self.name, len = value.len(), "Tenant header is not visible ASCII");
            ValidationError::DisallowedCharacter {
                what: "tenant identifier",
                position: value
                    .as_bytes()
                    .iter()
                    .position(|b| !b.is_ascii_graphic())
                    .unwrap_or(0),
                fingerprint: bytes_fingerprint(value.as_bytes()),
            }
        })?;

        Ok(TenantId::parse(raw.trim())?)
    }

    /// Extract the tenant from string headers, matching the name case-insensitively
    pub fn extract_map(&self, headers: &HashMap<String, String>) -> Result<TenantId, TenancyError> {
        let raw = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(self.name.as_str()))
            .map(|(_, v)| v)
            .ok_or_else(|| TenancyError::MissingTenant(self.name.to_string()))?;

        Ok(TenantId::parse(raw.trim())?)
    }
}

fn bytes_fingerprint(bytes: &[u8]) -> String {
    fingerprint(&String::from_utf8_lossy(bytes))
}
