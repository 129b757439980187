//! Tenant activation on the owning service.

use crate::MessageBroker;
use crate::error::MessagingError;
use crate::event::{PROVISIONING_CHANNEL, ProvisioningEvent};
use depot_tenancy::{
    ConnectionPool, NamespaceProvisioner, NamespaceRules, ProvisioningReport, TenantContext,
    TenantId,
};
use std::sync::Arc;
use tracing::info;

/// Provisions a tenant locally, then announces it to other services
///
/// The event is published only after the local namespace is ready, so a
/// failed activation never leaves other services ahead of the owner.
pub struct ActivationPublisher<B: MessageBroker, P: ConnectionPool> {
    broker: Arc<B>,
    provisioner: Arc<NamespaceProvisioner<P>>,
    rules: NamespaceRules,
    channel: String,
}

impl<B: MessageBroker, P: ConnectionPool> ActivationPublisher<B, P> {
    pub fn new(broker: Arc<B>, provisioner: Arc<NamespaceProvisioner<P>>, rules: NamespaceRules) -> Self {
        Self {
            broker,
            provisioner,
            rules,
            channel: PROVISIONING_CHANNEL.to_string(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Provision `tenant` and publish its provisioning event
    pub async fn activate(&self, tenant: &TenantId) -> Result<ProvisioningReport, MessagingError> {
        let mut context = TenantContext::new();
        let scope = context.enter(tenant.clone())?;
        let resolved = self.rules.resolve(scope.tenant());

        let report = self.provisioner.ensure_tenant_ready(&scope, &resolved).await?;

        let message = ProvisioningEvent::new(&resolved).to_message(&self.channel)?;
        let message_id = message.id.clone();
        self.broker.publish(message).await?;

        info!(
            tenant = %resolved.tenant(),
            namespace = %resolved.name(),
            message_id = %message_id,
            channel = %self.channel,
            "Tenant activated"
        );
        Ok(report)
    }
}
