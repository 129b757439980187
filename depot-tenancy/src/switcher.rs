//! Connection Namespace Switcher
//!
//! Points a checked-out connection at one tenant namespace for the duration of
//! a single operation.
//!
//! # Usage
//!
//! ```rust,ignore
//! let resolved = rules.resolve(scope.tenant());
//! let mut conn = pool.acquire().await?;
//!
//! let rows = with_namespace(&scope, &resolved, &mut conn, |conn| {
//!     Box::pin(async move { conn.select("stock_item") })
//! })
//! .await?;
//! ```
//!
//! The search path is set to exactly the tenant namespace before the
//! operation and reset afterwards. If the reset fails, or the operation is
//! cancelled mid-flight, the connection is discarded instead of returning to
//! the pool.

use crate::backend::{DiscardGuard, NamespaceConnection};
use crate::context::TenantContext;
use crate::error::TenancyError;
use crate::namespace::ResolvedNamespace;
use std::future::Future;
use std::pin::Pin;
use tracing::{trace, warn};

/// Run `operation` with `conn` scoped to `namespace`
///
/// Fails with [`TenancyError::Consistency`] before touching the connection if
/// the active tenant in `context` is not the tenant `namespace` was resolved
/// for.
pub async fn with_namespace<C, F, T, E>(
    context: &TenantContext,
    namespace: &ResolvedNamespace,
    conn: &mut C,
    operation: F,
) -> Result<T, E>
where
    C: NamespaceConnection,
    F: FnOnce(&mut C) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + '_>>,
    E: From<TenancyError>,
{
    context.ensure_owns(namespace)?;

    let mut guard = DiscardGuard::new(conn, "namespace switch");
    guard.apply_search_path(namespace.name()).await?;
    trace!(tenant = %namespace.tenant(), namespace = %namespace.name(), "Search path applied");

    let outcome = operation(&mut *guard).await;

    match guard.reset_search_path().await {
        Ok(()) => {
            guard.disarm();
            trace!(namespace = %namespace.name(), "Search path reset");
        }
        Err(err) => {
            warn!(namespace = %namespace.name(), error = %err, "Search path reset failed");
        }
    }

    outcome
}
