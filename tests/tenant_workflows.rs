//! End-to-end tenant workflows on the in-memory backend
//!
//! Two services share one configuration: `inventory` serves requests and
//! activates tenants, `orders` only listens for provisioning events.

use depot::messaging::memory::InMemorySubscription;
use depot::messaging::{Delivery, DeliveryState, Message, PROVISION_NAMESPACE};
use depot::prelude::*;
use depot::tenancy::memory::{MemoryDatabase, MemoryPool};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn settings() -> Settings {
    let config = DepotConfig::builder()
        .without_env()
        .set("listener.retry.initial_delay_ms", 50)
        .set("listener.retry.max_delay_ms", 200)
        .set("listener.retry.max_attempts", 4)
        .build()
        .unwrap();
    Settings::from_config(&config).unwrap()
}

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

    async fn listen(&self, settings: &Settings, broker: &InMemoryBroker) -> InMemorySubscription {
        broker
            .subscribe_with_options(
                &settings.channel,
                Arc::new(settings.listener(self.provisioner.clone())),
                settings.subscribe_options(),
            )
            .await
            .unwrap()
    }
}

fn tenant_headers(tenant: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-tenant-id", HeaderValue::from_str(tenant).unwrap());
    headers
}

fn provisioning_event(body: serde_json::Value) -> Message {
    Message::json("tenant.provisioning", &body).unwrap()
}

#[tokio::test]
async fn first_request_provisions_then_queries() {
    let settings = settings();
    let inventory = Service::new();
    let service = settings.service(inventory.provisioner.clone());

    let skus = service
        .run(&tenant_headers("acme-01"), |conn| {
            Box::pin(async move {
                conn.insert("stock_item", json!({"sku": "BOLT-M8", "qty": 40}))?;
                conn.select("stock_item")
            })
        })
        .await
        .unwrap();

    assert_eq!(skus.len(), 1);
    assert!(inventory.db.schema_exists("tenant_acme_01_schema"));
    assert_eq!(
        inventory.db.applied_versions("tenant_acme_01_schema"),
        vec![1, 2, 3]
    );
    assert_eq!(
        service.provisioner().pool().idle_search_paths(),
        vec![None]
    );
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let settings = settings();
    let inventory = Service::new();
    let service = settings.service(inventory.provisioner.clone());

    for (tenant, sku) in [("acme-01", "BOLT-M8"), ("globex", "NUT-M8")] {
        service
            .run(&tenant_headers(tenant), |conn| {
                Box::pin(async move { conn.insert("stock_item", json!({"sku": sku})) })
            })
            .await
            .unwrap();
    }

    let rows = service
        .run(&tenant_headers("globex"), |conn| {
            Box::pin(async move { conn.select("stock_item") })
        })
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"sku": "NUT-M8"})]);
}

#[tokio::test]
async fn alternate_spellings_cannot_reach_another_tenants_namespace() {
    let settings = settings();
    let inventory = Service::new();
    let service = settings.service(inventory.provisioner.clone());

    service
        .run(&tenant_headers("acme-01"), |conn| {
            Box::pin(async move { conn.insert("stock_item", json!({"sku": "BOLT-M8"})) })
        })
        .await
        .unwrap();
    let statements = inventory.db.statements().len();

    for alias in ["ACME-01", "acme_01", "Acme-01"] {
        let err = service
            .run(&tenant_headers(alias), |conn| {
                Box::pin(async move { conn.select("stock_item") })
            })
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST, "{alias}");
    }

    let trace = settings
        .listener(inventory.provisioner.clone())
        .process(&Delivery::first(provisioning_event(json!({
            "kind": PROVISION_NAMESPACE,
            "tenantId": "acme_01",
            "namespace": "tenant_acme_01_schema",
        }))))
        .await;
    assert_eq!(trace.state(), DeliveryState::Malformed);
    assert_eq!(inventory.db.statements().len(), statements);
}

#[tokio::test]
async fn hostile_tenant_header_is_rejected_before_any_statement() {
    let settings = settings();
    let inventory = Service::new();
    let service = settings.service(inventory.provisioner.clone());

    let err = service
        .run(&tenant_headers("acme; DROP SCHEMA public"), |_conn| {
            Box::pin(async { Ok(()) })
        })
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert!(!err.message.contains("DROP"));
    assert!(settings.rules.validate("acme; DROP SCHEMA public").is_err());
    assert!(inventory.db.statements().is_empty());
}

#[tokio::test]
async fn duplicate_event_is_acknowledged_without_migrations() {
    let settings = settings();
    let orders = Service::new();
    let listener = settings.listener(orders.provisioner.clone());
    let event = provisioning_event(json!({
        "kind": PROVISION_NAMESPACE,
        "tenantId": "acme-01",
        "namespace": "tenant_acme_01_schema",
    }));

    let first = listener.process(&Delivery::first(event.clone())).await;
    assert_eq!(first.state(), DeliveryState::Acknowledged);
    let executed = orders.db.migrations_executed();

    let second = listener.process(&Delivery::first(event)).await;
    assert_eq!(second.state(), DeliveryState::Acknowledged);
    assert!(second.report.unwrap().applied.is_empty());
    assert_eq!(orders.db.migrations_executed(), executed);
}

#[tokio::test]
async fn event_without_namespace_is_acknowledged_without_provisioning() {
    let settings = settings();
    let orders = Service::new();
    let listener = settings.listener(orders.provisioner.clone());

    let trace = listener
        .process(&Delivery::first(provisioning_event(json!({
            "kind": PROVISION_NAMESPACE,
            "tenantId": "acme-01",
        }))))
        .await;

    assert_eq!(trace.state(), DeliveryState::Malformed);
    assert!(trace.outcome.is_acknowledged());
    assert!(orders.db.statements().is_empty());
}

#[tokio::test]
async fn activation_converges_every_listening_service() {
    let settings = settings();
    let broker = Arc::new(InMemoryBroker::new());
    let inventory = Service::new();
    let orders = Service::new();
    let _subscription = orders.listen(&settings, &broker).await;

    let publisher = ActivationPublisher::new(
        broker.clone(),
        inventory.provisioner.clone(),
        settings.rules.clone(),
    )
    .with_channel(settings.channel.clone());

    let report = publisher
        .activate(&TenantId::parse("acme-01").unwrap())
        .await
        .unwrap();
    assert_eq!(report.applied, vec![1, 2, 3]);
    assert!(broker.settled(WAIT).await);

    assert!(orders.db.schema_exists("tenant_acme_01_schema"));
    assert_eq!(broker.stats().acked, 1);

    // The orders service now serves the tenant on the fast path
    let executed = orders.db.migrations_executed();
    let service = settings.service(orders.provisioner.clone());
    service
        .run(&tenant_headers("acme-01"), |conn| {
            Box::pin(async move { conn.select("stock_movement").map(|_| ()) })
        })
        .await
        .unwrap();
    assert_eq!(orders.db.migrations_executed(), executed);
}

#[tokio::test]
async fn unavailable_database_redelivers_until_ready() {
    let settings = settings();
    let broker = Arc::new(InMemoryBroker::new());
    let orders = Service::new();
    orders.db.set_unavailable(true);
    let _subscription = orders.listen(&settings, &broker).await;

    broker
        .publish(provisioning_event(json!({
            "kind": PROVISION_NAMESPACE,
            "tenantId": "globex",
            "namespace": "tenant_globex_schema",
        })))
        .await
        .unwrap();

    tokio::time::timeout(WAIT, async {
        while broker.stats().retried == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    orders.db.set_unavailable(false);

    assert!(broker.settled(WAIT).await);
    assert!(orders.db.schema_exists("tenant_globex_schema"));
    assert!(broker.dead_letters().is_empty());
}
