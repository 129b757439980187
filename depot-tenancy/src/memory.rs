//! In-memory database backend.
//!
//! Models just enough of PostgreSQL to exercise provisioning and connection
//! scoping without a server: schemas, tables created by migrations,
//! per-namespace provisioning records, transactional migration claims and
//! per-session search paths. Every statement is rendered through
//! [`crate::statements`] and recorded, so tests can assert on exactly what
//! would have been sent.
//!
//! Pooled sessions keep whatever search path they had when returned. Nothing
//! resets them on checkout, so a missed reset shows up as cross-tenant
//! leakage in tests.

use crate::Result;
use crate::backend::{ConnectionPool, NamespaceConnection, ProvisioningConnection};
use crate::error::TenancyError;
use crate::migration::{AppliedMigration, Migration};
use crate::namespace::{DEFAULT_NAMESPACE, NamespaceName};
use crate::statements;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

#[derive(Debug, Default)]
struct Schema {
    tables: BTreeMap<String, Vec<Value>>,
    record: Option<BTreeMap<i64, AppliedMigration>>,
}

#[derive(Debug)]
struct DbState {
    schemas: BTreeMap<String, Schema>,
    statements: Vec<String>,
    migrations_executed: usize,
    fail_migration: Option<i64>,
    fail_reset: bool,
    unavailable: bool,
    latency: Option<Duration>,
}

impl Default for DbState {
    fn default() -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert(DEFAULT_NAMESPACE.to_string(), Schema::default());
        Self {
            schemas,
            statements: Vec::new(),
            migrations_executed: 0,
            fail_migration: None,
            fail_reset: false,
            unavailable: false,
            latency: None,
        }
    }
}

impl DbState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(TenancyError::Database("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Shared in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DbState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every statement, widening race windows in tests
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    /// Make the migration with `version` fail inside its transaction
    pub fn fail_migration(&self, version: Option<i64>) {
        self.state.lock().fail_migration = version;
    }

    /// Make `RESET search_path` fail
    pub fn fail_reset(&self, fail: bool) {
        self.state.lock().fail_reset = fail;
    }

    /// Refuse connections and statements
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn schema_exists(&self, name: &str) -> bool {
        self.state.lock().schemas.contains_key(name)
    }

    /// Table names in `schema`, sorted
    pub fn tables(&self, schema: &str) -> Vec<String> {
        self.state
            .lock()
            .schemas
            .get(schema)
            .map(|s| s.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Versions in the provisioning record of `schema`
    pub fn applied_versions(&self, schema: &str) -> Vec<i64> {
        self.state
            .lock()
            .schemas
            .get(schema)
            .and_then(|s| s.record.as_ref())
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every statement issued so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Number of migration scripts actually executed
    pub fn migrations_executed(&self) -> usize {
        self.state.lock().migrations_executed
    }

    async fn pause(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    search_path: Option<String>,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Session>,
    next_id: u64,
    discarded: usize,
}

/// Connection pool over a [`MemoryDatabase`]
#[derive(Debug, Clone)]
pub struct MemoryPool {
    db: MemoryDatabase,
    state: Arc<Mutex<PoolState>>,
}

impl MemoryPool {
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            db,
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    /// Search paths of idle sessions, `None` meaning the server default
    pub fn idle_search_paths(&self) -> Vec<Option<String>> {
        self.state
            .lock()
            .idle
            .iter()
            .map(|s| s.search_path.clone())
            .collect()
    }

    /// Connections closed instead of being returned
    pub fn discarded(&self) -> usize {
        self.state.lock().discarded
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection> {
        self.db.state.lock().check_available()?;

        let session = {
            let mut state = self.state.lock();
            match state.idle.pop() {
                Some(session) => session,
                None => {
                    state.next_id += 1;
                    Session {
                        id: state.next_id,
                        search_path: None,
                    }
                }
            }
        };

        Ok(MemoryConnection {
            db: self.db.clone(),
            pool: self.state.clone(),
            session: Some(session),
            discarded: false,
        })
    }
}

/// Checked-out session
///
/// Returned to the pool on drop, with its search path untouched, unless
/// discarded.
#[derive(Debug)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    pool: Arc<Mutex<PoolState>>,
    session: Option<Session>,
    discarded: bool,
}

impl MemoryConnection {
    pub fn session_id(&self) -> u64 {
        self.session.as_ref().map(|s| s.id).unwrap_or_default()
    }

    /// Current search path, `None` meaning the server default
    pub fn search_path(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.search_path.clone())
    }

    /// Insert a row into `table`, resolved through the search path
    pub fn insert(&mut self, table: &str, row: Value) -> Result<()> {
        let schema = self.effective_schema();
        let mut state = self.db.state.lock();
        state.check_available()?;
        state
            .statements
            .push(format!("INSERT INTO {table} VALUES ($1)"));
        let rows = state
            .schemas
            .get_mut(&schema)
            .and_then(|s| s.tables.get_mut(table))
            .ok_or_else(|| missing_relation(table))?;
        rows.push(row);
        Ok(())
    }

    /// All rows of `table`, resolved through the search path
    pub fn select(&mut self, table: &str) -> Result<Vec<Value>> {
        let schema = self.effective_schema();
        let mut state = self.db.state.lock();
        state.check_available()?;
        state.statements.push(format!("SELECT * FROM {table}"));
        state
            .schemas
            .get(&schema)
            .and_then(|s| s.tables.get(table))
            .cloned()
            .ok_or_else(|| missing_relation(table))
    }

    fn effective_schema(&self) -> String {
        self.search_path()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| TenancyError::Database("connection closed".to_string()))
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut pool = self.pool.lock();
        match self.session.take() {
            Some(session) if !self.discarded => pool.idle.push(session),
            _ => pool.discarded += 1,
        }
    }
}

fn missing_relation(table: &str) -> TenancyError {
    TenancyError::Database(format!("relation \"{table}\" does not exist"))
}

#[async_trait]
impl NamespaceConnection for MemoryConnection {
    async fn apply_search_path(&mut self, name: &NamespaceName) -> Result<()> {
        self.db.pause().await;
        {
            let mut state = self.db.state.lock();
            state.check_available()?;
            state.statements.push(statements::set_search_path(name));
        }
        self.session_mut()?.search_path = Some(name.to_string());
        Ok(())
    }

    async fn reset_search_path(&mut self) -> Result<()> {
        self.db.pause().await;
        {
            let mut state = self.db.state.lock();
            state.check_available()?;
            state
                .statements
                .push(statements::RESET_SEARCH_PATH.to_string());
            if state.fail_reset {
                return Err(TenancyError::Database("server closed the connection".to_string()));
            }
        }
        self.session_mut()?.search_path = None;
        Ok(())
    }

    fn discard(&mut self) {
        self.discarded = true;
    }
}

#[async_trait]
impl ProvisioningConnection for MemoryConnection {
    async fn namespace_exists(&mut self, name: &NamespaceName) -> Result<bool> {
        self.db.pause().await;
        let mut state = self.db.state.lock();
        state.check_available()?;
        state.statements.push(statements::NAMESPACE_EXISTS.to_string());
        Ok(state.schemas.contains_key(name.as_str()))
    }

    async fn create_namespace(&mut self, name: &NamespaceName) -> Result<()> {
        self.db.pause().await;
        let mut state = self.db.state.lock();
        state.check_available()?;
        state.statements.push(statements::create_namespace(name));
        state.schemas.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn ensure_record_table(&mut self, name: &NamespaceName) -> Result<()> {
        self.db.pause().await;
        let mut state = self.db.state.lock();
        state.check_available()?;
        state.statements.push(statements::create_record_table(name));
        let schema = state
            .schemas
            .get_mut(name.as_str())
            .ok_or_else(|| TenancyError::Database(format!("schema \"{name}\" does not exist")))?;
        schema.record.get_or_insert_with(BTreeMap::new);
        Ok(())
    }

    async fn applied_migrations(&mut self, name: &NamespaceName) -> Result<Vec<AppliedMigration>> {
        self.db.pause().await;
        let mut state = self.db.state.lock();
        state.check_available()?;
        state
            .statements
            .push(statements::RECORD_TABLE_EXISTS.to_string());
        let has_record = state
            .schemas
            .get(name.as_str())
            .is_some_and(|s| s.record.is_some());
        if !has_record {
            return Ok(Vec::new());
        }
        state.statements.push(statements::applied_versions(name));
        Ok(state
            .schemas
            .get(name.as_str())
            .and_then(|s| s.record.as_ref())
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_migration(&mut self, name: &NamespaceName, migration: &Migration) -> Result<bool> {
        self.db.pause().await;
        let mut guard = self.db.state.lock();
        let state = &mut *guard;
        state.check_available()?;

        state.statements.push("BEGIN".to_string());
        state.statements.push(statements::set_local_search_path(name));
        state.statements.push(statements::claim_version(name));

        let schema = state
            .schemas
            .get_mut(name.as_str())
            .ok_or_else(|| TenancyError::Database(format!("schema \"{name}\" does not exist")))?;
        let record = schema.record.as_mut().ok_or_else(|| {
            TenancyError::Database(format!(
                "relation \"{}\" does not exist",
                statements::RECORD_TABLE
            ))
        })?;

        if record.contains_key(&migration.version()) {
            state.statements.push("COMMIT".to_string());
            return Ok(false);
        }

        state.statements.push(migration.script().to_string());
        if state.fail_migration == Some(migration.version()) {
            state.statements.push("ROLLBACK".to_string());
            return Err(TenancyError::Database(format!(
                "migration {} failed",
                migration.version()
            )));
        }

        record.insert(
            migration.version(),
            AppliedMigration {
                version: migration.version(),
                checksum: migration.checksum().to_string(),
            },
        );
        for caps in CREATE_TABLE.captures_iter(migration.script()) {
            schema
                .tables
                .entry(caps[1].to_ascii_lowercase())
                .or_default();
        }
        state.migrations_executed += 1;
        state.statements.push("COMMIT".to_string());
        Ok(true)
    }
}
