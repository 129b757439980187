//! Migration Source
//!
//! Versioned schema steps applied identically to every tenant namespace.
//!
//! Files follow `V{version}__{description}.sql`, for example
//! `V2__create_stock_item.sql`. The crate embeds its own `migrations/`
//! directory at build time; [`MigrationSet::new`] accepts any other source.

use crate::error::TenancyError;
use include_dir::{Dir, include_dir};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

static EMBEDDED: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

/// One versioned schema step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    version: i64,
    description: String,
    script: String,
    checksum: String,
}

impl Migration {
    /// Create a migration from its parts
    pub fn new(
        version: i64,
        description: impl Into<String>,
        script: impl Into<String>,
    ) -> Result<Self, TenancyError> {
        if version <= 0 {
            return Err(TenancyError::MigrationSource(format!(
                "version must be positive, got {version}"
            )));
        }
        let script = script.into();
        let checksum = hex::encode(Sha256::digest(script.as_bytes()));
        Ok(Self {
            version,
            description: description.into(),
            script,
            checksum,
        })
    }

    /// Parse version and description out of a `V{n}__{desc}.sql` file name
    ///
    /// ```
    /// use depot_tenancy::Migration;
    ///
    /// let m = Migration::from_location("V3__create_stock_movement.sql", "SELECT 1").unwrap();
    /// assert_eq!(m.version(), 3);
    /// assert_eq!(m.description(), "create stock movement");
    /// ```
    pub fn from_location(file_name: &str, script: impl Into<String>) -> Result<Self, TenancyError> {
        let invalid = || {
            TenancyError::MigrationSource(format!(
                "`{file_name}` does not match V{{version}}__{{description}}.sql"
            ))
        };

        let stem = file_name.strip_suffix(".sql").ok_or_else(invalid)?;
        let rest = stem.strip_prefix('V').ok_or_else(invalid)?;
        let (version, description) = rest.split_once("__").ok_or_else(invalid)?;

        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if description.is_empty() {
            return Err(invalid());
        }
        let version: i64 = version.parse().map_err(|_| invalid())?;

        Self::new(version, description.replace('_', " "), script)
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Hex SHA-256 of the script
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// A migration as recorded in a namespace's provisioning record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub checksum: String,
}

/// Ordered set of migrations with unique versions
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Build a set, sorting by version and rejecting duplicates
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self, TenancyError> {
        let mut by_version = BTreeMap::new();
        for migration in migrations {
            let version = migration.version;
            if by_version.insert(version, migration).is_some() {
                return Err(TenancyError::MigrationSource(format!(
                    "duplicate migration version {version}"
                )));
            }
        }
        Ok(Self {
            migrations: by_version.into_values().collect(),
        })
    }

    /// Migrations shipped in this crate's `migrations/` directory
    pub fn embedded() -> Result<Self, TenancyError> {
        let mut migrations = Vec::new();
        for file in EMBEDDED.files() {
            let Some(name) = file.path().file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".sql") {
                continue;
            }
            let script = file.contents_utf8().ok_or_else(|| {
                TenancyError::MigrationSource(format!("`{name}` is not valid UTF-8"))
            })?;
            migrations.push(Migration::from_location(name, script)?);
        }
        Self::new(migrations)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// All versions in apply order
    pub fn versions(&self) -> Vec<i64> {
        self.migrations.iter().map(|m| m.version).collect()
    }

    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Migrations not present in `applied`, in apply order
    pub fn pending<'a>(&'a self, applied: &[AppliedMigration]) -> Vec<&'a Migration> {
        self.migrations
            .iter()
            .filter(|m| !applied.iter().any(|a| a.version == m.version))
            .collect()
    }
}
