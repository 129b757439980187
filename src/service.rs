//! Request Boundary
//!
//! [`TenantService::run`] is the single entry point for tenant-scoped work:
//!
//! ```text
//! header -> context scope -> resolve -> ensure ready -> checkout -> switch -> operation
//! ```
//!
//! Any failure becomes a [`BoundaryRejection`] carrying the HTTP status the
//! caller should answer with. Invalid input maps to 400, a namespace that
//! cannot be made ready to 503 with `Retry-After`, and a broken context
//! invariant to 500.

use depot_tenancy::{
    ConnectionPool, ErrorClass, NamespaceProvisioner, NamespaceRules, TenancyError, TenantContext,
    TenantHeader, TenantId, with_namespace,
};
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::{HeaderMap, StatusCode};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Boxed tenant operation borrowing its connection
pub type Operation<'c, T> = Pin<Box<dyn Future<Output = Result<T, TenancyError>> + Send + 'c>>;

/// Why a tenant-scoped request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryRejection {
    pub status: StatusCode,
    pub class: ErrorClass,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl BoundaryRejection {
    /// `Retry-After` header for retryable rejections
    pub fn retry_after_header(&self) -> Option<(HeaderName, HeaderValue)> {
        self.retry_after
            .map(|delay| (RETRY_AFTER, HeaderValue::from(delay.as_secs().max(1))))
    }

    /// JSON response body
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": self.message,
            "status": self.status.as_u16(),
            "retryable": self.retryable,
        })
    }
}

impl fmt::Display for BoundaryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

impl std::error::Error for BoundaryRejection {}

impl From<TenancyError> for BoundaryRejection {
    fn from(err: TenancyError) -> Self {
        let class = err.class();
        match class {
            ErrorClass::Validation => debug!(error = %err, "Request rejected"),
            ErrorClass::Provisioning => warn!(error = %err, "Tenant namespace unavailable"),
            ErrorClass::Consistency => error!(error = %err, "Tenant context violated"),
        }

        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            class,
            retryable: err.is_retryable(),
            retry_after: err.retry_after(),
            message: err.to_string(),
        }
    }
}

/// Runs tenant-scoped operations against a pool
pub struct TenantService<P: ConnectionPool> {
    provisioner: Arc<NamespaceProvisioner<P>>,
    rules: NamespaceRules,
    header: TenantHeader,
}

impl<P: ConnectionPool> TenantService<P> {
    pub fn new(provisioner: Arc<NamespaceProvisioner<P>>, rules: NamespaceRules) -> Self {
        Self {
            provisioner,
            rules,
            header: TenantHeader::default(),
        }
    }

    pub fn with_header(mut self, header: TenantHeader) -> Self {
        self.header = header;
        self
    }

    pub fn header(&self) -> &TenantHeader {
        &self.header
    }

    pub fn rules(&self) -> &NamespaceRules {
        &self.rules
    }

    pub fn provisioner(&self) -> &Arc<NamespaceProvisioner<P>> {
        &self.provisioner
    }

    /// Run `operation` for the tenant named in `headers`
    pub async fn run<T, F>(&self, headers: &HeaderMap, operation: F) -> Result<T, BoundaryRejection>
    where
        F: FnOnce(&mut P::Connection) -> Operation<'_, T>,
    {
        let tenant = self.header.extract(headers)?;
        Ok(self.run_for(tenant, operation).await?)
    }

    /// Run `operation` for an already extracted tenant
    pub async fn run_for<T, F>(&self, tenant: TenantId, operation: F) -> Result<T, TenancyError>
    where
        F: FnOnce(&mut P::Connection) -> Operation<'_, T>,
    {
        let mut context = TenantContext::new();
        let scope = context.enter(tenant)?;
        let resolved = self.rules.resolve(scope.tenant());

        self.provisioner
            .ensure_tenant_ready(&scope, &resolved)
            .await?;

        let mut conn = self.provisioner.pool().acquire().await?;
        with_namespace(&scope, &resolved, &mut conn, operation).await
    }
}
