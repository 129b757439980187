//! Request-Scoped Tenant Context
//!
//! Every request or message owns one [`TenantContext`]. The boundary enters a
//! [`TenantScope`] which populates the context and clears it when the scope is
//! dropped, whether the operation returned, failed or was cancelled.
//! Downstream code only ever sees `&TenantContext`.
//!
//! ```
//! use depot_tenancy::{TenantContext, TenantId};
//!
//! let mut context = TenantContext::new();
//! {
//!     let scope = context.enter(TenantId::parse("acme").unwrap()).unwrap();
//!     assert_eq!(scope.require().unwrap().as_str(), "acme");
//! }
//! assert!(!context.has_tenant());
//! ```

use crate::error::TenancyError;
use crate::namespace::ResolvedNamespace;
use crate::tenant::TenantId;
use std::ops::Deref;
use tracing::trace;

/// Tenant of the operation currently executing.
///
/// Deliberately not `Clone`: each unit of work owns exactly one.
#[derive(Debug, Default)]
pub struct TenantContext {
    tenant: Option<TenantId>,
}

impl TenantContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Active tenant, if established
    pub fn get(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub fn has_tenant(&self) -> bool {
        self.tenant.is_some()
    }

    /// Active tenant, or a consistency error if none was established
    pub fn require(&self) -> Result<&TenantId, TenancyError> {
        self.tenant.as_ref().ok_or_else(|| {
            TenancyError::Consistency("tenant-scoped operation without a tenant".to_string())
        })
    }

    /// Establish the tenant
    ///
    /// Fails if a tenant is already set; a context is never re-pointed at a
    /// different tenant mid-operation.
    pub fn set(&mut self, tenant: TenantId) -> Result<(), TenancyError> {
        if let Some(current) = &self.tenant {
            return Err(TenancyError::Consistency(format!(
                "context already holds tenant {current}"
            )));
        }
        trace!(tenant = %tenant, "Tenant context set");
        self.tenant = Some(tenant);
        Ok(())
    }

    /// Remove the tenant
    pub fn clear(&mut self) {
        if let Some(tenant) = self.tenant.take() {
            trace!(tenant = %tenant, "Tenant context cleared");
        }
    }

    /// Set the tenant for the lifetime of the returned scope
    pub fn enter(&mut self, tenant: TenantId) -> Result<TenantScope<'_>, TenancyError> {
        self.set(tenant.clone())?;
        Ok(TenantScope {
            context: self,
            tenant,
        })
    }

    /// Check that `resolved` was derived for the active tenant
    pub fn ensure_owns(&self, resolved: &ResolvedNamespace) -> Result<(), TenancyError> {
        let active = self.require()?;
        if active != resolved.tenant() {
            return Err(TenancyError::Consistency(format!(
                "namespace {} belongs to tenant {}, active tenant is {}",
                resolved.name(),
                resolved.tenant(),
                active
            )));
        }
        Ok(())
    }
}

/// Guard holding a populated [`TenantContext`].
///
/// Dereferences to the context for read access and clears it on drop.
#[derive(Debug)]
pub struct TenantScope<'a> {
    context: &'a mut TenantContext,
    tenant: TenantId,
}

impl TenantScope<'_> {
    /// Tenant this scope was entered with
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

impl Deref for TenantScope<'_> {
    type Target = TenantContext;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl Drop for TenantScope<'_> {
    fn drop(&mut self) {
        self.context.clear();
    }
}
