//! Provisioning Event Listener
//!
//! Consumes provisioning events published by other services and converges the
//! local namespace for the tenant they name. Each delivery moves through
//!
//! ```text
//! Received -> TypeChecked -> Extracted -> ContextSet -> Provisioned -> Acknowledged
//!                 |              |                          |
//!              Ignored        Malformed                  Failed
//! ```
//!
//! Unrelated and malformed events are acknowledged so they never block the
//! channel. A delivery is left unacknowledged only when provisioning itself
//! failed and can be retried.

use crate::MessageHandler;
use crate::error::MessagingError;
use crate::event::{Discriminator, EventKind, NAMESPACE_FIELD, TENANT_FIELD};
use crate::message::{Delivery, ProcessingResult};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use depot_tenancy::{
    ConnectionPool, ErrorClass, NamespaceProvisioner, NamespaceRules, ProvisioningReport,
    ResolvedNamespace, TenancyError, TenantContext, TenantId, ValidationError,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Processing stage reached by a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    TypeChecked,
    Extracted,
    ContextSet,
    Provisioned,
    Acknowledged,
    /// Event of another kind, acknowledged without side effects
    Ignored,
    /// Undecodable or incomplete event, acknowledged with diagnostics
    Malformed,
    /// Provisioning failed; the transport decides redelivery
    Failed,
}

/// What happened to one delivery
#[derive(Debug, Clone)]
pub struct DeliveryTrace {
    pub delivery_id: String,
    pub attempt: u32,
    pub states: Vec<DeliveryState>,
    pub tenant: Option<String>,
    pub namespace: Option<String>,
    pub report: Option<ProvisioningReport>,
    pub outcome: ProcessingResult,
    pub diagnostic: Option<String>,
}

impl DeliveryTrace {
    fn start(delivery: &Delivery) -> Self {
        Self {
            delivery_id: delivery.message.id.clone(),
            attempt: delivery.attempt,
            states: vec![DeliveryState::Received],
            tenant: None,
            namespace: None,
            report: None,
            outcome: ProcessingResult::Success,
            diagnostic: None,
        }
    }

    /// Final state reached
    pub fn state(&self) -> DeliveryState {
        self.states
            .last()
            .copied()
            .unwrap_or(DeliveryState::Received)
    }

    pub fn reached(&self, state: DeliveryState) -> bool {
        self.states.contains(&state)
    }

    fn advance(&mut self, state: DeliveryState) {
        self.states.push(state);
    }

    fn finish(mut self, state: DeliveryState, outcome: ProcessingResult) -> Self {
        self.states.push(state);
        self.outcome = outcome;
        self
    }

    fn malformed(mut self, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        warn!(
            delivery_id = %self.delivery_id,
            attempt = self.attempt,
            diagnostic = %diagnostic,
            "Malformed provisioning event acknowledged"
        );
        self.diagnostic = Some(diagnostic);
        self.finish(DeliveryState::Malformed, ProcessingResult::Success)
    }
}

/// Handler converging local namespaces from provisioning events
pub struct ProvisioningListener<P: ConnectionPool> {
    provisioner: Arc<NamespaceProvisioner<P>>,
    rules: NamespaceRules,
    retry: RetryPolicy,
    legacy_discriminators: bool,
}

impl<P: ConnectionPool> ProvisioningListener<P> {
    pub fn new(provisioner: Arc<NamespaceProvisioner<P>>, rules: NamespaceRules) -> Self {
        Self {
            provisioner,
            rules,
            retry: RetryPolicy::default(),
            legacy_discriminators: true,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Recognise events from producers that predate the `kind` field
    pub fn with_legacy_discriminators(mut self, enabled: bool) -> Self {
        self.legacy_discriminators = enabled;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Process one delivery with a fresh tenant context
    pub async fn process(&self, delivery: &Delivery) -> DeliveryTrace {
        let mut context = TenantContext::new();
        self.process_with_context(&mut context, delivery).await
    }

    /// Process one delivery inside `context`
    ///
    /// The context is populated only while provisioning runs and is empty
    /// again when this returns, on every path.
    pub async fn process_with_context(
        &self,
        context: &mut TenantContext,
        delivery: &Delivery,
    ) -> DeliveryTrace {
        let mut trace = DeliveryTrace::start(delivery);
        debug!(
            delivery_id = %trace.delivery_id,
            attempt = trace.attempt,
            "Provisioning event received"
        );

        let payload = match delivery.message.parse_json::<Value>() {
            Ok(Value::Object(payload)) => payload,
            Ok(_) => return trace.malformed("payload is not a JSON object"),
            Err(_) => {
                return trace.malformed(format!(
                    "payload is not JSON ({} bytes)",
                    delivery.message.payload.len()
                ));
            }
        };

        match EventKind::classify(&payload, &delivery.message, self.legacy_discriminators) {
            EventKind::Provisioning(discriminator) => {
                if discriminator != Discriminator::Kind {
                    warn!(
                        delivery_id = %trace.delivery_id,
                        discriminator = ?discriminator,
                        "Provisioning event identified by a legacy discriminator"
                    );
                }
            }
            EventKind::Other(kind) => {
                debug!(delivery_id = %trace.delivery_id, kind = %kind, "Unrelated event ignored");
                trace.advance(DeliveryState::TypeChecked);
                return trace.finish(DeliveryState::Ignored, ProcessingResult::Success);
            }
            EventKind::Unmarked => return trace.malformed("event has no kind discriminator"),
        }
        trace.advance(DeliveryState::TypeChecked);

        let resolved = match self.extract(&payload) {
            Ok(resolved) => resolved,
            Err(err) => return trace.malformed(err.to_string()),
        };
        trace.tenant = Some(resolved.tenant().to_string());
        trace.namespace = Some(resolved.name().to_string());
        trace.advance(DeliveryState::Extracted);

        let result = match context.enter(resolved.tenant().clone()) {
            Ok(scope) => {
                trace.advance(DeliveryState::ContextSet);
                self.provisioner.ensure_tenant_ready(&scope, &resolved).await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(report) => {
                info!(
                    delivery_id = %trace.delivery_id,
                    attempt = trace.attempt,
                    tenant = %resolved.tenant(),
                    namespace = %resolved.name(),
                    applied = ?report.applied,
                    "Provisioning event handled"
                );
                trace.report = Some(report);
                trace.advance(DeliveryState::Provisioned);
                trace.finish(DeliveryState::Acknowledged, ProcessingResult::Success)
            }
            Err(err) => self.fail(trace, &resolved, err),
        }
    }

    fn extract(&self, payload: &Map<String, Value>) -> Result<ResolvedNamespace, ValidationError> {
        let tenant = required_str(payload, TENANT_FIELD)?;
        let namespace = required_str(payload, NAMESPACE_FIELD)?;
        let tenant = TenantId::parse(tenant)?;
        self.rules.verify(&tenant, namespace)
    }

    fn fail(
        &self,
        mut trace: DeliveryTrace,
        resolved: &ResolvedNamespace,
        err: TenancyError,
    ) -> DeliveryTrace {
        match err.class() {
            ErrorClass::Validation => trace.malformed(err.to_string()),
            ErrorClass::Provisioning => {
                let outcome = self.retry.decide(trace.attempt);
                warn!(
                    delivery_id = %trace.delivery_id,
                    attempt = trace.attempt,
                    tenant = %resolved.tenant(),
                    namespace = %resolved.name(),
                    error = %err,
                    outcome = ?outcome,
                    "Provisioning failed, event not acknowledged"
                );
                trace.diagnostic = Some(err.to_string());
                trace.finish(DeliveryState::Failed, outcome)
            }
            ErrorClass::Consistency => {
                tracing::error!(
                    delivery_id = %trace.delivery_id,
                    tenant = %resolved.tenant(),
                    error = %err,
                    "Tenant context violated while provisioning"
                );
                trace.diagnostic = Some(err.to_string());
                trace.finish(DeliveryState::Failed, ProcessingResult::DeadLetter)
            }
        }
    }
}

fn required_str<'a>(
    payload: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingField(field))
}

#[async_trait]
impl<P: ConnectionPool> MessageHandler for ProvisioningListener<P> {
    async fn handle(&self, delivery: Delivery) -> Result<ProcessingResult, MessagingError> {
        Ok(self.process(&delivery).await.outcome)
    }
}
