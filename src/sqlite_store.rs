//! SQLite-backed key and principal store
//!
//! Tables are created on open if missing. The `ca_keys.slot` column carries a
//! UNIQUE constraint so that only one row can ever claim the canonical slot,
//! which makes [`KeyStore::insert_canonical`] safe across processes sharing the
//! same database file.
//!
//! All statements run on the blocking pool via [`tokio::task::spawn_blocking`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use secrecy::SecretString;
use tracing::debug;

use crate::error::{CaError, CaResult};
use crate::key_store::{CaKeyRecord, InsertOutcome, KeyStore};
use crate::principals::{NewPrincipal, Principal, PrincipalStore, Role};

const CANONICAL_SLOT: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ca_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slot INTEGER NOT NULL UNIQUE,
    certificate_pem TEXT NOT NULL,
    private_key_pem TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    phone TEXT,
    role INTEGER NOT NULL,
    public_key TEXT,
    cert TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS users_role_idx ON users (role);
";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> CaResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Opening CA database");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> CaResult<Self> {
        debug!("Opening in-memory CA database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> CaResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> CaResult<T>
    where
        F: FnOnce(&mut Connection) -> CaResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        })
        .await
        .map_err(|e| CaError::Storage(format!("blocking database task failed: {}", e)))?
    }
}

fn select_canonical(conn: &Connection) -> rusqlite::Result<Option<CaKeyRecord>> {
    conn.query_row(
        "SELECT id, certificate_pem, private_key_pem FROM ca_keys ORDER BY id ASC LIMIT 1",
        [],
        |row| {
            Ok(CaKeyRecord {
                id: row.get(0)?,
                certificate_pem: row.get(1)?,
                private_key_pem: SecretString::from(row.get::<_, String>(2)?),
            })
        },
    )
    .optional()
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn principal_from_row(row: &Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: row.get(0)?,
        phone: row.get(1)?,
        role: Role(row.get(2)?),
        public_key: row.get(3)?,
        cert: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

const PRINCIPAL_COLUMNS: &str = "id, phone, role, public_key, cert, created_at, updated_at";

#[async_trait]
impl KeyStore for SqliteStore {
    async fn canonical_record(&self) -> CaResult<Option<CaKeyRecord>> {
        self.run(|conn| Ok(select_canonical(conn)?)).await
    }

    async fn insert_canonical(&self, record: CaKeyRecord) -> CaResult<InsertOutcome> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let inserted = tx.execute(
                "INSERT INTO ca_keys (slot, certificate_pem, private_key_pem, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(slot) DO NOTHING",
                params![
                    CANONICAL_SLOT,
                    record.certificate_pem,
                    record.private_key_pem(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            let outcome = if inserted == 1 {
                let mut record = record;
                record.id = tx.last_insert_rowid();
                InsertOutcome::Inserted(record)
            } else {
                let existing = select_canonical(&tx)?.ok_or_else(|| {
                    CaError::Storage("canonical slot taken but no CA record found".to_string())
                })?;
                InsertOutcome::AlreadyPresent(existing)
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }
}

#[async_trait]
impl PrincipalStore for SqliteStore {
    async fn insert_principal(&self, principal: NewPrincipal) -> CaResult<Principal> {
        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (phone, role, public_key, cert, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    principal.phone,
                    principal.role.0,
                    principal.public_key,
                    principal.cert,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            let stored = conn.query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", PRINCIPAL_COLUMNS),
                params![id],
                principal_from_row,
            )?;
            Ok(stored)
        })
        .await
    }

    async fn get_principal(&self, id: i64) -> CaResult<Option<Principal>> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE id = ?1", PRINCIPAL_COLUMNS),
                    params![id],
                    principal_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn find_by_role(&self, role: Role) -> CaResult<Vec<Principal>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE role = ?1 ORDER BY id ASC",
                PRINCIPAL_COLUMNS
            ))?;
            let rows = stmt.query_map(params![role.0], principal_from_row)?;
            let mut principals = Vec::new();
            for row in rows {
                principals.push(row?);
            }
            Ok(principals)
        })
        .await
    }

    async fn update_trust_material(
        &self,
        id: i64,
        public_key_pem: &str,
        certificate_pem: &str,
    ) -> CaResult<()> {
        let public_key_pem = public_key_pem.to_string();
        let certificate_pem = certificate_pem.to_string();
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE users SET public_key = ?1, cert = ?2, updated_at = ?3 WHERE id = ?4",
                params![public_key_pem, certificate_pem, Utc::now().to_rfc3339(), id],
            )?;
            if updated == 0 {
                return Err(CaError::Storage(format!("principal {} not found", id)));
            }
            Ok(())
        })
        .await
    }
}
