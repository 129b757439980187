//! # Depot Messaging
//!
//! Cross-service tenant provisioning over a message broker.
//!
//! When a tenant is activated, the owning service provisions its own
//! namespace and publishes a provisioning event. Every other service consumes
//! it with a [`ProvisioningListener`] and converges its own namespace. Delivery
//! is at least once; provisioning is idempotent, so redelivery is harmless.
//!
//! - [`Message`], [`Delivery`] and [`ProcessingResult`] describe the
//!   acknowledgement model.
//! - [`MessageBroker`] and [`MessageHandler`] are the transport seams;
//!   [`memory::InMemoryBroker`] implements them in-process.
//! - [`event`] decodes the provisioning event, [`retry`] decides backoff.
//!
//! ## Example
//!
//! ```
//! use depot_messaging::prelude::*;
//! use depot_tenancy::memory::{MemoryDatabase, MemoryPool};
//! use depot_tenancy::{MigrationSet, NamespaceProvisioner};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let provisioner = |db: &MemoryDatabase| {
//!     let pool = Arc::new(MemoryPool::new(db.clone()));
//!     Arc::new(NamespaceProvisioner::new(pool, MigrationSet::embedded().unwrap()))
//! };
//! let (inventory, orders) = (MemoryDatabase::new(), MemoryDatabase::new());
//! let broker = Arc::new(InMemoryBroker::new());
//!
//! // Every other service listens on the provisioning channel
//! let listener = ProvisioningListener::new(provisioner(&orders), NamespaceRules::default());
//! let _subscription = broker
//!     .subscribe_with_options(
//!         PROVISIONING_CHANNEL,
//!         Arc::new(listener),
//!         SubscribeOptions::default().with_concurrency(4),
//!     )
//!     .await
//!     .unwrap();
//!
//! // The owning service provisions locally, then announces the tenant
//! let publisher =
//!     ActivationPublisher::new(broker.clone(), provisioner(&inventory), NamespaceRules::default());
//! publisher.activate(&TenantId::parse("acme-01").unwrap()).await.unwrap();
//!
//! assert!(broker.settled(Duration::from_secs(5)).await);
//! assert!(orders.schema_exists("tenant_acme_01_schema"));
//! # });
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod error;
pub mod event;
pub mod listener;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod retry;

pub use error::MessagingError;
pub use event::{Discriminator, EventKind, PROVISION_NAMESPACE, PROVISIONING_CHANNEL, ProvisioningEvent};
pub use listener::{DeliveryState, DeliveryTrace, ProvisioningListener};
pub use memory::{BrokerStats, DeadLetter, InMemoryBroker, InMemorySubscription};
pub use message::{Delivery, Message, ProcessingResult};
pub use publisher::ActivationPublisher;
pub use retry::RetryPolicy;

/// Trait for handling received messages
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one delivery of a message
    async fn handle(&self, delivery: Delivery) -> Result<ProcessingResult, MessagingError>;

    /// Called when the handler itself fails
    async fn on_error(&self, error: &MessagingError) -> ProcessingResult {
        if error.is_retryable() {
            ProcessingResult::Retry {
                after: Duration::from_secs(1),
            }
        } else {
            ProcessingResult::DeadLetter
        }
    }
}

/// Function-based message handler
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ProcessingResult, MessagingError>> + Send,
{
    async fn handle(&self, delivery: Delivery) -> Result<ProcessingResult, MessagingError> {
        (self.0)(delivery).await
    }
}

/// Options for subscribing to messages
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Consumer group/tag
    pub consumer_group: Option<String>,
    /// Maximum concurrent handlers
    pub concurrency: Option<usize>,
    /// Dead-letter after this many attempts regardless of handler outcome
    pub max_attempts: Option<u32>,
}

impl SubscribeOptions {
    /// Set the consumer group
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Set the concurrency level
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Cap the number of delivery attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Subscription handle for managing a subscription
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Stop the subscription
    async fn unsubscribe(&self) -> Result<(), MessagingError>;

    /// Check if the subscription is active
    fn is_active(&self) -> bool;

    /// Get the topic name
    fn topic(&self) -> &str;
}

/// Core trait for message brokers
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// The subscription handle type
    type Subscription: Subscription;

    /// Publish a message
    async fn publish(&self, message: Message) -> Result<(), MessagingError>;

    /// Subscribe to a topic
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self::Subscription, MessagingError> {
        self.subscribe_with_options(topic, handler, SubscribeOptions::default())
            .await
    }

    /// Subscribe with options
    async fn subscribe_with_options(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> Result<Self::Subscription, MessagingError>;

    /// Check if connected to the broker
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<(), MessagingError>;
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::MessagingError;
    pub use crate::event::{PROVISION_NAMESPACE, PROVISIONING_CHANNEL, ProvisioningEvent};
    pub use crate::listener::ProvisioningListener;
    pub use crate::memory::InMemoryBroker;
    pub use crate::message::{Delivery, Message, ProcessingResult};
    pub use crate::publisher::ActivationPublisher;
    pub use crate::retry::RetryPolicy;
    pub use crate::{FnHandler, MessageBroker, MessageHandler, SubscribeOptions, Subscription};
    pub use depot_tenancy::{NamespaceRules, TenantId};
    pub use std::sync::Arc;
}
