// Depot - schema-per-tenant PostgreSQL for multi-service platforms
//
// Every tenant owns one database namespace per service. This crate wires the
// member crates into a request boundary, an event listener and an operator
// CLI configured from one layered configuration.

pub mod error;
pub mod service;
pub mod settings;
pub mod telemetry;

pub use error::{DepotError, Result};
pub use service::{BoundaryRejection, TenantService};
pub use settings::Settings;

// Re-export member crates
pub use depot_config as config;
pub use depot_messaging as messaging;
pub use depot_tenancy as tenancy;

// Prelude for common imports
pub mod prelude {
    pub use crate::config::DepotConfig;
    pub use crate::messaging::{
        ActivationPublisher, InMemoryBroker, MessageBroker, ProvisioningListener, RetryPolicy,
    };
    pub use crate::service::{BoundaryRejection, TenantService};
    pub use crate::settings::Settings;
    pub use crate::tenancy::{
        ConnectionPool, MigrationSet, NamespaceProvisioner, NamespaceRules, ResolvedNamespace,
        TenancyError, TenantContext, TenantHeader, TenantId, with_namespace,
    };
}
