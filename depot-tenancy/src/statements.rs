//! SQL issued by the provisioner and switcher.
//!
//! Identifiers are only ever interpolated from a [`NamespaceName`] through
//! [`quote_ident`]. Values go through bind parameters.

use crate::namespace::{NamespaceName, quote_ident};

/// Table tracking applied migrations inside each tenant namespace.
pub const RECORD_TABLE: &str = "depot_provisioning_record";

/// Restores the server default search order.
pub const RESET_SEARCH_PATH: &str = "RESET search_path";

/// `$1`: namespace name.
pub const NAMESPACE_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1) AS present";

/// `$1`: namespace name, `$2`: [`RECORD_TABLE`].
pub const RECORD_TABLE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = $2) AS present";

pub fn create_namespace(name: &NamespaceName) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(name))
}

pub fn set_search_path(name: &NamespaceName) -> String {
    format!("SET search_path TO {}", quote_ident(name))
}

/// Transaction-scoped variant, reverted automatically on commit or rollback.
pub fn set_local_search_path(name: &NamespaceName) -> String {
    format!("SET LOCAL search_path TO {}", quote_ident(name))
}

pub fn create_record_table(name: &NamespaceName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{RECORD_TABLE} (\
         version BIGINT PRIMARY KEY, \
         description TEXT NOT NULL, \
         checksum TEXT NOT NULL, \
         applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        quote_ident(name)
    )
}

pub fn applied_versions(name: &NamespaceName) -> String {
    format!(
        "SELECT version, checksum FROM {}.{RECORD_TABLE} ORDER BY version",
        quote_ident(name)
    )
}

/// `$1`: version, `$2`: description, `$3`: checksum.
///
/// Affects one row for the caller that wins the version, zero for everyone
/// else. A concurrent uncommitted claim blocks until it commits or rolls back.
pub fn claim_version(name: &NamespaceName) -> String {
    format!(
        "INSERT INTO {}.{RECORD_TABLE} (version, description, checksum) \
         VALUES ($1, $2, $3) ON CONFLICT (version) DO NOTHING",
        quote_ident(name)
    )
}
