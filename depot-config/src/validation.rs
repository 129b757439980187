// Configuration validation

use crate::{ConfigError, Result};
use std::fmt::Display;

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Field checks shared by the configuration sections
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    pub fn in_range<T: PartialOrd + Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::invalid(
                field,
                format!("must be between {min} and {max}, got {value}"),
            ));
        }
        Ok(())
    }

    pub fn one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
            return Err(ConfigError::invalid(
                field,
                format!("must be one of {}", allowed.join(", ")),
            ));
        }
        Ok(())
    }

    /// Value is a URL with one of `schemes`
    pub fn has_scheme(value: &str, schemes: &[&str], field: &str) -> Result<()> {
        let ok = value
            .split_once("://")
            .is_some_and(|(scheme, rest)| !rest.is_empty() && schemes.contains(&scheme));
        if !ok {
            return Err(ConfigError::invalid(
                field,
                format!("must be a {} URL", schemes.join("/")),
            ));
        }
        Ok(())
    }

    /// Lowercase ASCII letters, digits and `_`
    pub fn identifier_part(value: &str, field: &str) -> Result<()> {
        if !value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(ConfigError::invalid(
                field,
                "may only contain lowercase letters, digits and underscores",
            ));
        }
        Ok(())
    }

    /// Valid HTTP header name
    pub fn header_name(value: &str, field: &str) -> Result<()> {
        Self::not_empty(value, field)?;
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
        {
            return Err(ConfigError::invalid(field, "is not a valid header name"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(5, 1, 10, "field").is_ok());
        let err = ConfigValidator::in_range(11, 1, 10, "database.pool_size").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: database.pool_size must be between 1 and 10, got 11"
        );
    }

    #[test]
    fn test_one_of_validation() {
        assert!(ConfigValidator::one_of("INFO", &["info", "debug"], "log.level").is_ok());
        assert!(ConfigValidator::one_of("loud", &["info", "debug"], "log.level").is_err());
    }

    #[test]
    fn test_scheme_validation() {
        let schemes = &["postgres", "postgresql"];
        assert!(ConfigValidator::has_scheme("postgres://localhost/db", schemes, "url").is_ok());
        assert!(ConfigValidator::has_scheme("postgresql://u@h/db", schemes, "url").is_ok());
        assert!(ConfigValidator::has_scheme("mysql://localhost", schemes, "url").is_err());
        assert!(ConfigValidator::has_scheme("postgres://", schemes, "url").is_err());
    }

    #[test]
    fn test_identifier_and_header() {
        assert!(ConfigValidator::identifier_part("tenant_", "prefix").is_ok());
        assert!(ConfigValidator::identifier_part("Tenant-", "prefix").is_err());
        assert!(ConfigValidator::header_name("x-tenant-id", "header").is_ok());
        assert!(ConfigValidator::header_name("x tenant", "header").is_err());
    }
}
