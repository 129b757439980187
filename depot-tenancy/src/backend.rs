//! Database seams used by the provisioner and the switcher.
//!
//! Two implementations ship with the crate: [`crate::memory`] for tests and
//! local tooling, and [`crate::postgres`] on diesel-async.

use crate::Result;
use crate::migration::{AppliedMigration, Migration};
use crate::namespace::NamespaceName;
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use tracing::warn;

/// Session-level search path control on a checked-out connection.
#[async_trait]
pub trait NamespaceConnection: Send {
    /// Set the search order to exactly `name`
    async fn apply_search_path(&mut self, name: &NamespaceName) -> Result<()>;

    /// Restore the default search order
    async fn reset_search_path(&mut self) -> Result<()>;

    /// Close this connection instead of returning it to the pool.
    fn discard(&mut self);
}

/// Statements the provisioner needs.
///
/// None of these change the session search path.
#[async_trait]
pub trait ProvisioningConnection: Send {
    async fn namespace_exists(&mut self, name: &NamespaceName) -> Result<bool>;

    /// `CREATE SCHEMA IF NOT EXISTS`; succeeds when a racing caller won.
    async fn create_namespace(&mut self, name: &NamespaceName) -> Result<()>;

    async fn ensure_record_table(&mut self, name: &NamespaceName) -> Result<()>;

    /// Recorded migrations, empty when the record table does not exist yet
    async fn applied_migrations(&mut self, name: &NamespaceName) -> Result<Vec<AppliedMigration>>;

    /// Claim and run one migration in a single transaction
    ///
    /// Returns `false` when the version was already recorded, in which case
    /// the script was not executed.
    async fn apply_migration(&mut self, name: &NamespaceName, migration: &Migration) -> Result<bool>;
}

/// Source of connections shared across tenants.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: NamespaceConnection + ProvisioningConnection + Send + 'static;

    async fn acquire(&self) -> Result<Self::Connection>;
}

/// Borrow of a connection that is discarded unless explicitly disarmed.
///
/// Covers the paths where cleanup cannot run: an early `?`, a panic, or the
/// owning future being dropped at an await point.
pub(crate) struct DiscardGuard<'a, C: NamespaceConnection> {
    conn: &'a mut C,
    armed: bool,
    purpose: &'static str,
}

impl<'a, C: NamespaceConnection> DiscardGuard<'a, C> {
    pub(crate) fn new(conn: &'a mut C, purpose: &'static str) -> Self {
        Self {
            conn,
            armed: true,
            purpose,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: NamespaceConnection> Deref for DiscardGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
    }
}

impl<C: NamespaceConnection> DerefMut for DiscardGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn
    }
}

impl<C: NamespaceConnection> Drop for DiscardGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            warn!(purpose = self.purpose, "Connection state unknown, discarding");
            self.conn.discard();
        }
    }
}
