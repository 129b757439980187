//! Typed runtime settings built from [`DepotConfig`].

use crate::error::{DepotError, Result};
use crate::service::TenantService;
use depot_config::DepotConfig;
use depot_messaging::{ProvisioningListener, RetryPolicy, SubscribeOptions};
use depot_tenancy::{ConnectionPool, NamespaceProvisioner, NamespaceRules, TenantHeader};
use std::sync::Arc;

#[cfg(feature = "postgres")]
use depot_tenancy::{PgNamespacePool, PgPoolConfig};

/// Configuration converted into the types the runtime uses
#[derive(Debug, Clone)]
pub struct Settings {
    pub rules: NamespaceRules,
    pub header: TenantHeader,
    pub retry: RetryPolicy,
    pub channel: String,
    pub concurrency: usize,
    pub legacy_discriminators: bool,
    #[cfg(feature = "postgres")]
    pub database: Option<PgPoolConfig>,
}

impl Settings {
    pub fn from_config(config: &DepotConfig) -> Result<Self> {
        let ns = &config.namespace;
        let rules = NamespaceRules::new(ns.prefix.clone(), ns.suffix.clone())?
            .with_default_namespace(ns.default_namespace.clone())?
            .with_max_length(ns.max_length)?;

        let retry_config = &config.listener.retry;
        let retry = RetryPolicy::new(
            retry_config.initial_delay(),
            retry_config.max_delay(),
            retry_config.max_attempts,
        )
        .with_multiplier(retry_config.multiplier);

        Ok(Self {
            rules,
            header: TenantHeader::new(&config.boundary.tenant_header)?,
            retry,
            channel: config.listener.channel.clone(),
            concurrency: config.listener.concurrency,
            legacy_discriminators: config.listener.legacy_discriminators,
            #[cfg(feature = "postgres")]
            database: config.database.url.as_ref().map(|url| {
                PgPoolConfig::new(url.clone())
                    .with_pool_size(config.database.pool_size)
                    .with_connect_timeout(config.database.connect_timeout())
            }),
        })
    }

    /// Request boundary over `provisioner`
    pub fn service<P: ConnectionPool>(&self, provisioner: Arc<NamespaceProvisioner<P>>) -> TenantService<P> {
        TenantService::new(provisioner, self.rules.clone()).with_header(self.header.clone())
    }

    /// Provisioning event listener over `provisioner`
    pub fn listener<P: ConnectionPool>(
        &self,
        provisioner: Arc<NamespaceProvisioner<P>>,
    ) -> ProvisioningListener<P> {
        ProvisioningListener::new(provisioner, self.rules.clone())
            .with_retry_policy(self.retry.clone())
            .with_legacy_discriminators(self.legacy_discriminators)
    }

    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions::default()
            .with_concurrency(self.concurrency)
            .with_max_attempts(self.retry.max_attempts)
    }

    /// Open the PostgreSQL pool named by `[database] url`
    #[cfg(feature = "postgres")]
    pub fn pool(&self) -> Result<PgNamespacePool> {
        let config = self.database.as_ref().ok_or_else(|| {
            DepotError::Unavailable("no database configured; set DEPOT_DATABASE__URL".to_string())
        })?;
        Ok(PgNamespacePool::new(config)?)
    }
}

impl TryFrom<&DepotConfig> for Settings {
    type Error = DepotError;

    fn try_from(config: &DepotConfig) -> Result<Self> {
        Self::from_config(config)
    }
}
