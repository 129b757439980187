//! Namespace Provisioner
//!
//! Makes a tenant namespace ready for use: creates it if absent and applies
//! every pending migration in version order, tracking progress in the
//! namespace's own provisioning record.
//!
//! Safe to call any number of times, concurrently, from any number of
//! processes. Each migration version is claimed inside the transaction that
//! runs it, so exactly one caller executes a given step and the others see it
//! recorded.
//!
//! # Examples
//!
//! ```
//! use depot_tenancy::memory::{MemoryDatabase, MemoryPool};
//! use depot_tenancy::{MigrationSet, NamespaceProvisioner, TenantId, resolve};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let pool = Arc::new(MemoryPool::new(MemoryDatabase::new()));
//! let provisioner = NamespaceProvisioner::new(pool, MigrationSet::embedded().unwrap());
//! let ns = resolve(&TenantId::parse("acme-01").unwrap());
//!
//! let first = provisioner.ensure_ready(ns.name()).await.unwrap();
//! assert!(first.namespace_created);
//!
//! let second = provisioner.ensure_ready(ns.name()).await.unwrap();
//! assert!(second.fast_path);
//! # });
//! ```

use crate::Result;
use crate::backend::{ConnectionPool, DiscardGuard, ProvisioningConnection};
use crate::context::TenantContext;
use crate::error::{TenancyError, ValidationError};
use crate::migration::{AppliedMigration, MigrationSet};
use crate::namespace::{NamespaceName, ResolvedNamespace};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one [`NamespaceProvisioner::ensure_ready`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningReport {
    pub namespace: String,
    /// Nothing was written: the namespace was already fully provisioned.
    pub fast_path: bool,
    /// Answered from the in-process readiness cache without a round trip.
    pub cached: bool,
    /// The namespace was absent when this call checked.
    pub namespace_created: bool,
    /// Versions this call executed.
    pub applied: Vec<i64>,
    /// Versions found recorded, by an earlier or a racing caller.
    pub already_applied: Vec<i64>,
}

impl ProvisioningReport {
    fn ready(namespace: &NamespaceName, cached: bool, already_applied: Vec<i64>) -> Self {
        Self {
            namespace: namespace.to_string(),
            fast_path: true,
            cached,
            namespace_created: false,
            applied: Vec::new(),
            already_applied,
        }
    }
}

/// Read-only view of a namespace's provisioning state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningStatus {
    pub namespace: String,
    pub exists: bool,
    pub applied: Vec<i64>,
    pub pending: Vec<i64>,
}

impl ProvisioningStatus {
    pub fn is_ready(&self) -> bool {
        self.exists && self.pending.is_empty()
    }
}

/// Idempotent namespace provisioner
pub struct NamespaceProvisioner<P: ConnectionPool> {
    pool: Arc<P>,
    migrations: Arc<MigrationSet>,
    ready: RwLock<HashSet<String>>,
    cache_enabled: bool,
}

impl<P: ConnectionPool> NamespaceProvisioner<P> {
    /// Create a provisioner applying `migrations` through `pool`
    pub fn new(pool: Arc<P>, migrations: MigrationSet) -> Self {
        Self {
            pool,
            migrations: Arc::new(migrations),
            ready: RwLock::new(HashSet::new()),
            cache_enabled: true,
        }
    }

    /// Always check the database, even for namespaces seen ready before
    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// Ensure `namespace` exists with every migration applied
    ///
    /// Fails with a validation error for the system namespace and with a
    /// provisioning error for any database failure. On failure the record
    /// reflects exactly the migrations that committed.
    pub async fn ensure_ready(&self, namespace: &NamespaceName) -> Result<ProvisioningReport> {
        if namespace.is_system() {
            return Err(ValidationError::SystemNamespace.into());
        }

        if self.cache_enabled && self.ready.read().contains(namespace.as_str()) {
            debug!(namespace = %namespace, "Namespace ready (cached)");
            return Ok(ProvisioningReport::ready(
                namespace,
                true,
                self.migrations.versions(),
            ));
        }

        let started = Instant::now();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| TenancyError::provisioning(namespace.as_str(), e))?;

        let mut guard = DiscardGuard::new(&mut conn, "provisioning");
        let outcome = self.converge(&mut *guard, namespace).await;
        if outcome.is_ok() {
            guard.disarm();
        }
        drop(guard);

        match outcome {
            Ok(report) => {
                if self.cache_enabled {
                    self.ready.write().insert(namespace.to_string());
                }
                if report.fast_path {
                    debug!(namespace = %namespace, "Namespace already provisioned");
                } else {
                    info!(
                        namespace = %namespace,
                        created = report.namespace_created,
                        applied = ?report.applied,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Namespace provisioned"
                    );
                }
                Ok(report)
            }
            Err(err) => {
                warn!(namespace = %namespace, error = %err, "Namespace provisioning failed");
                Err(match err {
                    TenancyError::Database(reason) => {
                        TenancyError::provisioning(namespace.as_str(), reason)
                    }
                    other => other,
                })
            }
        }
    }

    /// Ensure the namespace of the active tenant is ready
    ///
    /// Fails with a consistency error when `resolved` was derived for a
    /// tenant other than the one in `context`.
    pub async fn ensure_tenant_ready(
        &self,
        context: &TenantContext,
        resolved: &ResolvedNamespace,
    ) -> Result<ProvisioningReport> {
        context.ensure_owns(resolved)?;
        self.ensure_ready(resolved.name()).await
    }

    /// Report applied and pending versions without writing anything
    pub async fn status(&self, namespace: &NamespaceName) -> Result<ProvisioningStatus> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| TenancyError::provisioning(namespace.as_str(), e))?;

        let exists = conn.namespace_exists(namespace).await?;
        let applied = if exists {
            conn.applied_migrations(namespace).await?
        } else {
            Vec::new()
        };

        Ok(ProvisioningStatus {
            namespace: namespace.to_string(),
            exists,
            pending: self
                .migrations
                .pending(&applied)
                .iter()
                .map(|m| m.version())
                .collect(),
            applied: applied.into_iter().map(|a| a.version).collect(),
        })
    }

    /// Drop a namespace from the readiness cache
    pub fn forget(&self, namespace: &NamespaceName) -> bool {
        self.ready.write().remove(namespace.as_str())
    }

    async fn converge<C>(&self, conn: &mut C, namespace: &NamespaceName) -> Result<ProvisioningReport>
    where
        C: ProvisioningConnection,
    {
        let exists = conn.namespace_exists(namespace).await?;

        if exists {
            let applied = conn.applied_migrations(namespace).await?;
            if self.migrations.pending(&applied).is_empty() {
                self.check_drift(namespace, &applied);
                return Ok(ProvisioningReport::ready(
                    namespace,
                    false,
                    applied.iter().map(|a| a.version).collect(),
                ));
            }
        } else {
            conn.create_namespace(namespace).await?;
        }

        conn.ensure_record_table(namespace).await?;

        let recorded = conn.applied_migrations(namespace).await?;
        let mut report = ProvisioningReport {
            namespace: namespace.to_string(),
            fast_path: false,
            cached: false,
            namespace_created: !exists,
            applied: Vec::new(),
            already_applied: recorded.iter().map(|a| a.version).collect(),
        };

        for migration in self.migrations.pending(&recorded) {
            if conn.apply_migration(namespace, migration).await? {
                debug!(
                    namespace = %namespace,
                    version = migration.version(),
                    description = migration.description(),
                    "Migration applied"
                );
                report.applied.push(migration.version());
            } else {
                debug!(
                    namespace = %namespace,
                    version = migration.version(),
                    "Migration applied concurrently"
                );
                report.already_applied.push(migration.version());
            }
        }

        let confirmed = conn.applied_migrations(namespace).await?;
        let missing: Vec<i64> = self
            .migrations
            .pending(&confirmed)
            .iter()
            .map(|m| m.version())
            .collect();
        if !missing.is_empty() {
            return Err(TenancyError::provisioning(
                namespace.as_str(),
                format!("migrations {missing:?} not recorded after apply"),
            ));
        }
        self.check_drift(namespace, &confirmed);

        report.already_applied.sort_unstable();
        Ok(report)
    }

    fn check_drift(&self, namespace: &NamespaceName, applied: &[AppliedMigration]) {
        for record in applied {
            match self.migrations.get(record.version) {
                Some(expected) if expected.checksum() != record.checksum => warn!(
                    namespace = %namespace,
                    version = record.version,
                    "Recorded migration checksum differs from migration source"
                ),
                None => warn!(
                    namespace = %namespace,
                    version = record.version,
                    "Recorded migration unknown to migration source"
                ),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDatabase, MemoryPool};
    use crate::migration::Migration;
    use crate::namespace::{resolve, validate};
    use crate::tenant::TenantId;

    fn setup() -> (MemoryDatabase, NamespaceProvisioner<MemoryPool>) {
        let db = MemoryDatabase::new();
        let pool = Arc::new(MemoryPool::new(db.clone()));
        let provisioner = NamespaceProvisioner::new(pool, MigrationSet::embedded().unwrap());
        (db, provisioner)
    }

    fn acme() -> NamespaceName {
        resolve(&TenantId::parse("acme-01").unwrap()).name().clone()
    }

    #[tokio::test]
    async fn test_fresh_namespace() {
        let (db, provisioner) = setup();
        let ns = acme();

        let report = provisioner.ensure_ready(&ns).await.unwrap();
        assert!(report.namespace_created);
        assert!(!report.fast_path);
        assert_eq!(report.applied, vec![1, 2, 3]);
        assert!(report.already_applied.is_empty());

        assert!(db.schema_exists("tenant_acme_01_schema"));
        assert_eq!(db.applied_versions("tenant_acme_01_schema"), vec![1, 2, 3]);
        assert_eq!(
            db.tables("tenant_acme_01_schema"),
            vec!["stock_item", "stock_movement", "storage_location"]
        );
    }

    #[tokio::test]
    async fn test_twice_equals_once() {
        let (db, provisioner) = setup();
        let ns = acme();

        provisioner.ensure_ready(&ns).await.unwrap();
        let executed = db.migrations_executed();

        let report = provisioner.ensure_ready(&ns).await.unwrap();
        assert!(report.fast_path);
        assert!(report.cached);
        assert_eq!(db.migrations_executed(), executed);

        provisioner.forget(&ns);
        let statements = db.statements().len();
        let report = provisioner.ensure_ready(&ns).await.unwrap();
        assert!(report.fast_path);
        assert!(!report.cached);
        assert_eq!(report.already_applied, vec![1, 2, 3]);
        assert_eq!(db.migrations_executed(), executed);
        assert!(
            db.statements()[statements..]
                .iter()
                .all(|sql| !sql.starts_with("CREATE") && !sql.starts_with("INSERT"))
        );
    }

    #[tokio::test]
    async fn test_concurrent_callers_converge() {
        let db = MemoryDatabase::new().with_latency(std::time::Duration::from_millis(1));
        let pool = Arc::new(MemoryPool::new(db.clone()));
        let provisioner = Arc::new(
            NamespaceProvisioner::new(pool, MigrationSet::embedded().unwrap()).without_cache(),
        );
        let ns = acme();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let provisioner = provisioner.clone();
            let ns = ns.clone();
            handles.push(tokio::spawn(async move { provisioner.ensure_ready(&ns).await }));
        }

        let mut applied = Vec::new();
        for handle in handles {
            let report = handle.await.unwrap().unwrap();
            applied.extend(report.applied);
        }
        applied.sort_unstable();

        assert_eq!(applied, vec![1, 2, 3]);
        assert_eq!(db.migrations_executed(), 3);
        assert_eq!(db.applied_versions("tenant_acme_01_schema"), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_record_consistent() {
        let (db, provisioner) = setup();
        let ns = acme();

        db.fail_migration(Some(2));
        let err = provisioner.ensure_ready(&ns).await.unwrap_err();
        assert!(matches!(err, TenancyError::Provisioning { .. }));
        assert!(err.is_retryable());
        assert_eq!(db.applied_versions("tenant_acme_01_schema"), vec![1]);
        assert!(!db.tables("tenant_acme_01_schema").contains(&"stock_item".to_string()));

        db.fail_migration(None);
        let report = provisioner.ensure_ready(&ns).await.unwrap();
        assert!(!report.namespace_created);
        assert_eq!(report.applied, vec![2, 3]);
        assert_eq!(report.already_applied, vec![1]);
    }

    #[tokio::test]
    async fn test_database_unavailable() {
        let (db, provisioner) = setup();
        db.set_unavailable(true);

        let err = provisioner.ensure_ready(&acme()).await.unwrap_err();
        assert!(matches!(err, TenancyError::Provisioning { .. }));
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_system_namespace_rejected() {
        let (db, provisioner) = setup();
        let public = validate("public").unwrap();

        let err = provisioner.ensure_ready(&public).await.unwrap_err();
        assert!(matches!(
            err,
            TenancyError::Validation(ValidationError::SystemNamespace)
        ));
        assert!(db.statements().is_empty());
    }

    #[tokio::test]
    async fn test_new_migration_applied_to_existing_namespace() {
        let (db, provisioner) = setup();
        let ns = acme();
        provisioner.ensure_ready(&ns).await.unwrap();

        let mut migrations: Vec<Migration> = MigrationSet::embedded().unwrap().iter().cloned().collect();
        migrations.push(
            Migration::new(4, "create pick list", "CREATE TABLE IF NOT EXISTS pick_list (id BIGINT)")
                .unwrap(),
        );
        let upgraded = NamespaceProvisioner::new(
            provisioner.pool().clone(),
            MigrationSet::new(migrations).unwrap(),
        );

        let report = upgraded.ensure_ready(&ns).await.unwrap();
        assert_eq!(report.applied, vec![4]);
        assert_eq!(report.already_applied, vec![1, 2, 3]);
        assert!(db.tables("tenant_acme_01_schema").contains(&"pick_list".to_string()));
    }

    #[tokio::test]
    async fn test_status() {
        let (_db, provisioner) = setup();
        let ns = acme();

        let status = provisioner.status(&ns).await.unwrap();
        assert!(!status.exists);
        assert_eq!(status.pending, vec![1, 2, 3]);
        assert!(!status.is_ready());

        provisioner.ensure_ready(&ns).await.unwrap();
        let status = provisioner.status(&ns).await.unwrap();
        assert!(status.is_ready());
        assert_eq!(status.applied, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_tenant_mismatch() {
        let (db, provisioner) = setup();
        let mut context = TenantContext::new();
        let scope = context.enter(TenantId::parse("globex").unwrap()).unwrap();
        let acme = resolve(&TenantId::parse("acme-01").unwrap());

        let err = provisioner.ensure_tenant_ready(&scope, &acme).await.unwrap_err();
        assert!(matches!(err, TenancyError::Consistency(_)));
        assert!(db.statements().is_empty());
    }
}
