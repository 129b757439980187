//! Namespace Resolution
//!
//! Derives the PostgreSQL schema name for a tenant, validates any name before
//! it reaches a statement, and quotes validated names for interpolation.
//!
//! Every identifier that ends up in SQL passes through this module:
//!
//! 1. [`NamespaceRules::resolve`] derives a name from a [`TenantId`].
//! 2. [`NamespaceRules::validate`] checks externally supplied names.
//! 3. [`quote_ident`] escapes a [`NamespaceName`], which can only be obtained
//!    from the two functions above.
//!
//! # Examples
//!
//! ```
//! use depot_tenancy::{NamespaceRules, TenantId, quote_ident};
//!
//! let rules = NamespaceRules::default();
//! let tenant = TenantId::parse("acme-01").unwrap();
//! let resolved = rules.resolve(&tenant);
//!
//! assert_eq!(resolved.name().as_str(), "tenant_acme_01_schema");
//! assert_eq!(quote_ident(resolved.name()), "\"tenant_acme_01_schema\"");
//! assert!(rules.validate("acme; DROP SCHEMA public").is_err());
//! ```

use crate::error::{ValidationError, fingerprint};
use crate::tenant::{MAX_TENANT_ID_LEN, TenantId};
use std::fmt;

/// PostgreSQL identifier limit (NAMEDATALEN - 1).
pub const MAX_NAMESPACE_LEN: usize = 63;

/// Namespace holding system-wide objects.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Prefix prepended to every tenant namespace by default.
pub const DEFAULT_PREFIX: &str = "tenant_";

/// Suffix appended to every tenant namespace by default.
pub const DEFAULT_SUFFIX: &str = "_schema";

const RESERVED_PREFIX: &str = "pg_";

/// A namespace name that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceName {
    name: String,
    system: bool,
}

impl NamespaceName {
    /// Name as a string slice, unquoted
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether this is the system-wide default namespace
    pub fn is_system(&self) -> bool {
        self.system
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<str> for NamespaceName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// A tenant paired with the namespace derived for it.
///
/// Only [`NamespaceRules::resolve`] and [`NamespaceRules::verify`] construct
/// this, so holding one proves the name belongs to the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedNamespace {
    tenant: TenantId,
    name: NamespaceName,
}

impl ResolvedNamespace {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn name(&self) -> &NamespaceName {
        &self.name
    }
}

/// Naming rule for tenant namespaces
///
/// `prefix + sanitized(tenant) + suffix`, where sanitizing maps `-` to `_`.
/// Tenant identifiers never contain `_`, so distinct tenants get distinct
/// names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRules {
    prefix: String,
    suffix: String,
    default_namespace: String,
    max_length: usize,
}

impl Default for NamespaceRules {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            suffix: DEFAULT_SUFFIX.to_string(),
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            max_length: MAX_NAMESPACE_LEN,
        }
    }
}

impl NamespaceRules {
    /// Create rules with a custom prefix and suffix
    ///
    /// Both parts must be lowercase `[a-z0-9_]`, the prefix must be non-empty
    /// and must not be able to form the reserved `pg_` prefix, and the longest
    /// possible tenant namespace must fit the length limit.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Result<Self, ValidationError> {
        let rules = Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            ..Self::default()
        };
        rules.check()?;
        Ok(rules)
    }

    /// Override the system namespace
    pub fn with_default_namespace(mut self, name: impl Into<String>) -> Result<Self, ValidationError> {
        self.default_namespace = name.into();
        self.check()?;
        Ok(self)
    }

    /// Lower the length limit below [`MAX_NAMESPACE_LEN`]
    pub fn with_max_length(mut self, max_length: usize) -> Result<Self, ValidationError> {
        if max_length > MAX_NAMESPACE_LEN {
            return Err(ValidationError::TooLong {
                what: "namespace length limit",
                len: max_length,
                max: MAX_NAMESPACE_LEN,
            });
        }
        self.max_length = max_length;
        self.check()?;
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Derive the namespace for a tenant
    ///
    /// Deterministic and total: the checks done when the rules were built
    /// guarantee the result is a valid tenant namespace.
    pub fn resolve(&self, tenant: &TenantId) -> ResolvedNamespace {
        let mut name =
            String::with_capacity(self.prefix.len() + tenant.as_str().len() + self.suffix.len());
        name.push_str(&self.prefix);
        name.extend(tenant.as_str().chars().map(|c| if c == '-' { '_' } else { c }));
        name.push_str(&self.suffix);

        debug_assert!(check_identifier("namespace", &name, self.max_length).is_ok());

        ResolvedNamespace {
            tenant: tenant.clone(),
            name: NamespaceName {
                name,
                system: false,
            },
        }
    }

    /// Validate a namespace name from an untrusted source
    ///
    /// The configured default namespace is accepted verbatim and flagged as a
    /// system namespace. Everything else must be non-empty, within the length
    /// limit, made only of `[A-Za-z0-9_]` and must not start with `pg_`.
    pub fn validate(&self, raw: &str) -> Result<NamespaceName, ValidationError> {
        if raw == self.default_namespace {
            return Ok(NamespaceName {
                name: raw.to_string(),
                system: true,
            });
        }

        check_identifier("namespace", raw, self.max_length)?;

        Ok(NamespaceName {
            name: raw.to_string(),
            system: false,
        })
    }

    /// Validate a claimed namespace and check it was derived for `tenant`
    pub fn verify(&self, tenant: &TenantId, raw: &str) -> Result<ResolvedNamespace, ValidationError> {
        let claimed = self.validate(raw)?;
        let resolved = self.resolve(tenant);

        if claimed != resolved.name {
            return Err(ValidationError::NamespaceMismatch {
                tenant: tenant.to_string(),
                fingerprint: fingerprint(raw),
            });
        }

        Ok(resolved)
    }

    fn check(&self) -> Result<(), ValidationError> {
        check_part("namespace prefix", &self.prefix)?;
        check_part("namespace suffix", &self.suffix)?;

        let prefix = self.prefix.as_str();
        if prefix.is_empty() {
            return Err(ValidationError::Empty {
                what: "namespace prefix",
            });
        }
        if RESERVED_PREFIX.starts_with(prefix) || prefix.starts_with(RESERVED_PREFIX) {
            return Err(ValidationError::ReservedPrefix {
                what: "namespace prefix",
            });
        }

        let longest = self.prefix.len() + MAX_TENANT_ID_LEN + self.suffix.len();
        if longest > self.max_length {
            return Err(ValidationError::TooLong {
                what: "tenant namespace",
                len: longest,
                max: self.max_length,
            });
        }

        check_identifier("default namespace", &self.default_namespace, self.max_length)?;
        if self.default_namespace.starts_with(&self.prefix)
            && self.default_namespace.ends_with(&self.suffix)
        {
            return Err(ValidationError::SystemNamespace);
        }

        Ok(())
    }
}

/// Resolve with the default rules
pub fn resolve(tenant: &TenantId) -> ResolvedNamespace {
    NamespaceRules::default().resolve(tenant)
}

/// Validate with the default rules
pub fn validate(raw: &str) -> Result<NamespaceName, ValidationError> {
    NamespaceRules::default().validate(raw)
}

/// Quote a validated namespace as a PostgreSQL identifier
///
/// Wraps the name in double quotes and doubles any embedded quote. Validated
/// names never contain one, the escaping is applied regardless.
pub fn quote_ident(name: &NamespaceName) -> String {
    let mut quoted = String::with_capacity(name.as_str().len() + 2);
    quoted.push('"');
    for c in name.as_str().chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn check_identifier(what: &'static str, raw: &str, max: usize) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::Empty { what });
    }
    if raw.len() > max {
        return Err(ValidationError::TooLong {
            what,
            len: raw.len(),
            max,
        });
    }
    if let Some(position) = raw
        .bytes()
        .position(|b| !(b.is_ascii_alphanumeric() || b == b'_'))
    {
        return Err(ValidationError::DisallowedCharacter {
            what,
            position,
            fingerprint: fingerprint(raw),
        });
    }
    if raw.len() >= RESERVED_PREFIX.len()
        && raw[..RESERVED_PREFIX.len()].eq_ignore_ascii_case(RESERVED_PREFIX)
    {
        return Err(ValidationError::ReservedPrefix { what });
    }
    Ok(())
}

fn check_part(what: &'static str, raw: &str) -> Result<(), ValidationError> {
    match raw
        .bytes()
        .position(|b| !(b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'))
    {
        Some(position) => Err(ValidationError::DisallowedCharacter {
            what,
            position,
            fingerprint: fingerprint(raw),
        }),
        None => Ok(()),
    }
}
