//! Tenant Namespaces for Depot
//!
//! Schema-per-tenant isolation on a shared PostgreSQL database: every tenant
//! owns one namespace, created on demand and migrated to the current version
//! before any tenant-scoped query runs.
//!
//! # Features
//!
//! - 🏷️ **Tenant Identifiers** - Validated, immutable tenant keys
//! - 🧭 **Namespace Resolution** - One derive, validate and quote path for every identifier
//! - 🔒 **Scoped Tenant Context** - Cleared on return, error and cancellation
//! - 🏗️ **Idempotent Provisioning** - Create-if-absent plus tracked, ordered migrations
//! - 🔀 **Connection Switching** - Search path applied per operation, reset on release
//! - 🧪 **In-Memory Backend** - The full provisioning model without a server
//! - 🐘 **PostgreSQL Backend** - diesel-async with a deadpool pool (`postgres` feature)
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use depot_tenancy::prelude::*;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(PgNamespacePool::new(&PgPoolConfig::new(url))?);
//! let provisioner = NamespaceProvisioner::new(pool.clone(), MigrationSet::embedded()?);
//! let rules = NamespaceRules::default();
//!
//! // Boundary: one context per request
//! let mut context = TenantContext::new();
//! let scope = context.enter(TenantHeader::default().extract(request.headers())?)?;
//!
//! let resolved = rules.resolve(scope.tenant());
//! provisioner.ensure_tenant_ready(&scope, &resolved).await?;
//!
//! let mut conn = pool.acquire().await?;
//! with_namespace(&scope, &resolved, &mut conn, |conn| {
//!     Box::pin(async move {
//!         // every statement here runs inside the tenant namespace
//!         Ok::<_, TenancyError>(())
//!     })
//! })
//! .await?;
//! ```

pub mod backend;
pub mod boundary;
pub mod context;
pub mod error;
pub mod memory;
pub mod migration;
pub mod namespace;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod provisioner;
pub mod statements;
pub mod switcher;
pub mod tenant;

pub use backend::{ConnectionPool, NamespaceConnection, ProvisioningConnection};
pub use boundary::{DEFAULT_TENANT_HEADER, TenantHeader};
pub use context::{TenantContext, TenantScope};
pub use error::{ErrorClass, TenancyError, ValidationError, fingerprint};
pub use migration::{AppliedMigration, Migration, MigrationSet};
pub use namespace::{
    DEFAULT_NAMESPACE, MAX_NAMESPACE_LEN, NamespaceName, NamespaceRules, ResolvedNamespace,
    quote_ident, resolve, validate,
};
#[cfg(feature = "postgres")]
pub use postgres::{PgNamespacePool, PgPoolConfig, PgTenantConnection, PoolStatus};
pub use provisioner::{NamespaceProvisioner, ProvisioningReport, ProvisioningStatus};
pub use switcher::with_namespace;
pub use tenant::{MAX_TENANT_ID_LEN, TenantId};

/// Result type for tenancy operations.
pub type Result<T> = std::result::Result<T, TenancyError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{ConnectionPool, NamespaceConnection};
    pub use crate::boundary::TenantHeader;
    pub use crate::context::{TenantContext, TenantScope};
    pub use crate::error::{ErrorClass, TenancyError, ValidationError};
    pub use crate::migration::MigrationSet;
    pub use crate::namespace::{NamespaceName, NamespaceRules, ResolvedNamespace};
    #[cfg(feature = "postgres")]
    pub use crate::postgres::{PgNamespacePool, PgPoolConfig};
    pub use crate::provisioner::{NamespaceProvisioner, ProvisioningReport};
    pub use crate::switcher::with_namespace;
    pub use crate::tenant::TenantId;
}
