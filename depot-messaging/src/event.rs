//! Provisioning event wire format.
//!
//! ```json
//! {"kind": "tenant.namespace.provision", "tenantId": "acme-01",
//!  "namespace": "tenant_acme_01_schema", "occurredAt": "2026-01-01T00:00:00Z"}
//! ```
//!
//! `kind` is the discriminator. Producers that predate it are recognised by
//! their legacy markers while `legacy` detection is enabled.

use crate::error::MessagingError;
use crate::message::Message;
use chrono::{DateTime, Utc};
use depot_tenancy::ResolvedNamespace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default topic carrying provisioning events.
pub const PROVISIONING_CHANNEL: &str = "tenant.provisioning";

/// Discriminator value of the provisioning event.
pub const PROVISION_NAMESPACE: &str = "tenant.namespace.provision";

pub const KIND_FIELD: &str = "kind";
pub const TENANT_FIELD: &str = "tenantId";
pub const NAMESPACE_FIELD: &str = "namespace";

/// Header carrying the event kind on legacy producers.
pub const EVENT_TYPE_HEADER: &str = "x-event-type";

const LEGACY_TYPE_FIELDS: [&str; 2] = ["eventType", "type"];
const LEGACY_CLASS_FIELD: &str = "@class";
const LEGACY_CLASS_NAMES: [&str; 2] = ["TenantSchemaCreatedEvent", "TenantProvisioningEvent"];

/// Outbound provisioning event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningEvent {
    pub kind: String,
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub namespace: String,
    #[serde(rename = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
}

impl ProvisioningEvent {
    pub fn new(resolved: &ResolvedNamespace) -> Self {
        Self {
            kind: PROVISION_NAMESPACE.to_string(),
            tenant_id: resolved.tenant().to_string(),
            namespace: resolved.name().to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn to_message(&self, topic: &str) -> Result<Message, MessagingError> {
        Ok(Message::json(topic, self)?
            .with_header(EVENT_TYPE_HEADER, PROVISION_NAMESPACE)
            .with_correlation_id(self.tenant_id.clone()))
    }
}

/// Which marker identified the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discriminator {
    Kind,
    LegacyTypeField,
    LegacyClass,
    LegacyHeader,
}

/// Classification of an inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Provisioning(Discriminator),
    /// Some other event; acknowledged without side effects
    Other(String),
    /// No discriminator present
    Unmarked,
}

impl EventKind {
    /// Classify a decoded payload
    ///
    /// `kind` always wins. Legacy markers are consulted only when `kind` is
    /// absent and `legacy` is set.
    pub fn classify(payload: &Map<String, Value>, message: &Message, legacy: bool) -> Self {
        if let Some(kind) = payload.get(KIND_FIELD) {
            return match kind.as_str() {
                Some(PROVISION_NAMESPACE) => Self::Provisioning(Discriminator::Kind),
                Some(other) => Self::Other(other.to_string()),
                None => Self::Unmarked,
            };
        }

        if !legacy {
            return Self::Unmarked;
        }

        for field in LEGACY_TYPE_FIELDS {
            if let Some(value) = payload.get(field).and_then(Value::as_str) {
                return if is_legacy_provisioning(value) {
                    Self::Provisioning(Discriminator::LegacyTypeField)
                } else {
                    Self::Other(value.to_string())
                };
            }
        }

        if let Some(class) = payload.get(LEGACY_CLASS_FIELD).and_then(Value::as_str) {
            return if is_legacy_class(class) {
                Self::Provisioning(Discriminator::LegacyClass)
            } else {
                Self::Other(class.to_string())
            };
        }

        if let Some(value) = message.header(EVENT_TYPE_HEADER) {
            return if is_legacy_provisioning(value) {
                Self::Provisioning(Discriminator::LegacyHeader)
            } else {
                Self::Other(value.to_string())
            };
        }

        Self::Unmarked
    }
}

fn is_legacy_provisioning(value: &str) -> bool {
    value == PROVISION_NAMESPACE
        || LEGACY_CLASS_NAMES
            .iter()
            .any(|name| value == *name || name.strip_suffix("Event") == Some(value))
}

fn is_legacy_class(class: &str) -> bool {
    let simple = class.rsplit(['.', '$']).next().unwrap_or(class);
    LEGACY_CLASS_NAMES.contains(&simple)
}
