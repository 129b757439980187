//! Provisioning events through the in-memory broker

use depot_messaging::prelude::*;
use depot_messaging::{DeliveryState, memory::InMemorySubscription};
use depot_tenancy::memory::{MemoryDatabase, MemoryPool};
use depot_tenancy::{MigrationSet, NamespaceProvisioner, TenantContext};
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

struct Service {
    db: MemoryDatabase,
    provisioner: Arc<NamespaceProvisioner<MemoryPool>>,
}

impl Service {
    fn new() -> Self {
        let db = MemoryDatabase::new();
        let pool = Arc::new(MemoryPool::new(db.clone()));
        let provisioner = Arc::new(NamespaceProvisioner::new(
            pool,
            MigrationSet::embedded().unwrap(),
        ));
        Self { db, provisioner }
    }

    fn listener(&self) -> ProvisioningListener<MemoryPool> {
        ProvisioningListener::new(self.provisioner.clone(), NamespaceRules::default())
            .with_retry_policy(RetryPolicy::new(
                Duration::from_millis(5),
                Duration::from_millis(20),
                4,
            ))
    }

    async fn subscribe(&self, broker: &InMemoryBroker) -> InMemorySubscription {
        broker
            .subscribe_with_options(
                PROVISIONING_CHANNEL,
                Arc::new(self.listener()),
                SubscribeOptions::default()
                    .with_consumer_group("inventory")
                    .with_concurrency(4),
            )
            .await
            .unwrap()
    }
}

fn event(tenant: &str, namespace: &str) -> Message {
    Message::json(
        PROVISIONING_CHANNEL,
        &json!({"kind": PROVISION_NAMESPACE, "tenantId": tenant, "namespace": namespace}),
    )
    .unwrap()
}

#[tokio::test]
async fn duplicate_delivery_is_acknowledged_without_migrations() {
    let service = Service::new();
    let listener = service.listener();
    let message = event("acme-01", "tenant_acme_01_schema");

    let first = listener.process(&Delivery::first(message.clone())).await;
    assert_eq!(first.state(), DeliveryState::Acknowledged);
    assert_eq!(first.report.unwrap().applied, vec![1, 2, 3]);
    let executed = service.db.migrations_executed();

    service
        .provisioner
        .forget(&depot_tenancy::validate("tenant_acme_01_schema").unwrap());
    let second = listener.process(&Delivery::first(message)).await;

    assert_eq!(second.state(), DeliveryState::Acknowledged);
    assert!(second.outcome.is_acknowledged());
    let report = second.report.unwrap();
    assert!(report.applied.is_empty());
    assert!(report.fast_path);
    assert_eq!(service.db.migrations_executed(), executed);
}

#[tokio::test]
async fn missing_namespace_is_acknowledged_without_provisioning() {
    let service = Service::new();
    let listener = service.listener();
    let message = Message::json(
        PROVISIONING_CHANNEL,
        &json!({"kind": PROVISION_NAMESPACE, "tenantId": "acme-01"}),
    )
    .unwrap();

    let trace = listener.process(&Delivery::first(message)).await;

    assert_eq!(trace.state(), DeliveryState::Malformed);
    assert_eq!(trace.outcome, ProcessingResult::Success);
    assert!(trace.diagnostic.unwrap().contains("namespace"));
    assert!(!service.db.schema_exists("tenant_acme_01_schema"));
    assert!(service.db.statements().is_empty());
}

#[tokio::test]
async fn hostile_tenant_is_acknowledged_without_statements() {
    let service = Service::new();
    let trace = service
        .listener()
        .process(&Delivery::first(event(
            "acme; DROP SCHEMA public",
            "tenant_acme_schema",
        )))
        .await;

    assert_eq!(trace.state(), DeliveryState::Malformed);
    assert!(!trace.diagnostic.unwrap().contains("DROP"));
    assert!(service.db.statements().is_empty());
}

#[tokio::test]
async fn legacy_discriminators_can_be_disabled() {
    let service = Service::new();
    let legacy = Message::json(
        PROVISIONING_CHANNEL,
        &json!({
            "@class": "com.depot.tenancy.TenantSchemaCreatedEvent",
            "tenantId": "globex",
            "namespace": "tenant_globex_schema",
        }),
    )
    .unwrap();

    let strict = service.listener().with_legacy_discriminators(false);
    let trace = strict.process(&Delivery::first(legacy.clone())).await;
    assert_eq!(trace.state(), DeliveryState::Malformed);
    assert!(!service.db.schema_exists("tenant_globex_schema"));

    let lenient = service.listener().with_legacy_discriminators(true);
    let trace = lenient.process(&Delivery::first(legacy)).await;
    assert_eq!(trace.state(), DeliveryState::Acknowledged);
    assert!(service.db.schema_exists("tenant_globex_schema"));
}

#[tokio::test]
async fn context_is_empty_after_every_path() {
    let service = Service::new();
    let listener = service.listener();
    let mut context = TenantContext::new();

    let payloads = [
        event("acme", "tenant_acme_schema"),
        event("acme", "tenant_other_schema"),
        Message::new(PROVISIONING_CHANNEL, b"{".to_vec()),
    ];
    for message in payloads {
        listener
            .process_with_context(&mut context, &Delivery::first(message))
            .await;
        assert!(!context.has_tenant());
    }

    service.db.set_unavailable(true);
    service
        .provisioner
        .forget(&depot_tenancy::validate("tenant_acme_schema").unwrap());
    let trace = listener
        .process_with_context(&mut context, &Delivery::first(event("acme", "tenant_acme_schema")))
        .await;
    assert_eq!(trace.state(), DeliveryState::Failed);
    assert!(!context.has_tenant());
}

#[tokio::test]
async fn broker_redelivers_until_provisioning_succeeds() {
    let service = Service::new();
    let broker = InMemoryBroker::new();
    let _subscription = service.subscribe(&broker).await;

    service.db.set_unavailable(true);
    broker
        .publish(event("initech", "tenant_initech_schema"))
        .await
        .unwrap();

    tokio::time::timeout(WAIT, async {
        while broker.stats().retried == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    service.db.set_unavailable(false);

    assert!(broker.settled(WAIT).await);
    let stats = broker.stats();
    assert!(stats.retried >= 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert!(service.db.schema_exists("tenant_initech_schema"));
    assert_eq!(
        service.db.applied_versions("tenant_initech_schema"),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn broker_dead_letters_after_max_attempts() {
    let service = Service::new();
    let broker = InMemoryBroker::new();
    let _subscription = service.subscribe(&broker).await;

    service.db.set_unavailable(true);
    broker
        .publish(event("umbrella", "tenant_umbrella_schema"))
        .await
        .unwrap();

    assert!(broker.settled(WAIT).await);
    let dead = broker.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 4);
    assert_eq!(broker.stats().retried, 3);
    assert!(!service.db.schema_exists("tenant_umbrella_schema"));
}

#[tokio::test]
async fn published_activation_reaches_other_services() {
    let owner = Service::new();
    let inventory = Service::new();
    let billing = Service::new();
    let broker = Arc::new(InMemoryBroker::new());

    let _a = inventory.subscribe(&broker).await;
    let _b = billing.subscribe(&broker).await;

    let publisher = ActivationPublisher::new(
        broker.clone(),
        owner.provisioner.clone(),
        NamespaceRules::default(),
    );
    for tenant in ["acme-01", "globex", "initech"] {
        publisher
            .activate(&TenantId::parse(tenant).unwrap())
            .await
            .unwrap();
    }

    assert!(broker.settled(WAIT).await);
    for service in [&owner, &inventory, &billing] {
        for namespace in [
            "tenant_acme_01_schema",
            "tenant_globex_schema",
            "tenant_initech_schema",
        ] {
            assert_eq!(service.db.applied_versions(namespace), vec![1, 2, 3]);
        }
    }
    assert_eq!(broker.stats().acked, 6);
}
