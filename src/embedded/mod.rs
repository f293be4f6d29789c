//! Embedded graph backend on SQLite.
//!
//! Speaks the statement subset the mapper generates (`MATCH`, `CREATE`,
//! `MERGE ... ON CREATE SET ... ON MATCH SET`, `SET`, `DELETE`,
//! `DETACH DELETE`, `RETURN`) over two tables, `nodes` and
//! `relationships`, with labels and properties stored as JSON text.
//!
//! URIs look like `embedded:///var/lib/app/graph.db`. Every auto-commit
//! statement runs on its own connection inside a SQLite transaction;
//! explicit transactions hold one connection under `BEGIN IMMEDIATE`.

mod executor;
mod parser;
mod store;

use log::{debug, warn};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::driver::{
    BasicAuth, ConnectionSettings, Connector, Driver, QueryResult, Statement, TransactionContext,
};
use crate::error::{DriverError, DriverResult};

use executor::Executor;

pub const EMBEDDED_SCHEME: &str = "embedded";

/// Opens [`EmbeddedGraph`]s for `embedded://` URIs.
///
/// With credentials configured, connections must present exactly those
/// credentials; without, any (or no) credentials are accepted.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedConnector {
    credentials: Option<BasicAuth>,
}

impl EmbeddedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: BasicAuth) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Filesystem path named by an `embedded://` URI
fn database_path(settings: &ConnectionSettings) -> DriverResult<PathBuf> {
    let host = settings.uri.host_str().unwrap_or_default();
    let path = format!("{}{}", host, settings.uri.path());
    if path.is_empty() || path == "/" {
        return Err(DriverError::ServiceUnavailable(format!(
            "no database path in {}",
            settings.uri
        )));
    }
    Ok(PathBuf::from(path))
}

impl Connector for EmbeddedConnector {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme.eq_ignore_ascii_case(EMBEDDED_SCHEME)
    }

    fn connect(&self, settings: &ConnectionSettings) -> DriverResult<Arc<dyn Driver>> {
        if !self.supports_scheme(settings.uri.scheme()) {
            return Err(DriverError::ServiceUnavailable(format!(
                "scheme {} is not served by the embedded backend",
                settings.uri.scheme()
            )));
        }

        if let Some(expected) = &self.credentials {
            if settings.auth.as_ref() != Some(expected) {
                return Err(DriverError::Authentication(
                    "the client is unauthorized due to authentication failure".to_string(),
                ));
            }
        }

        let graph = EmbeddedGraph::open(database_path(settings)?)?;
        Ok(Arc::new(graph))
    }
}

/// Handle to one graph database file.
#[derive(Debug, Clone)]
pub struct EmbeddedGraph {
    path: PathBuf,
}

impl EmbeddedGraph {
    /// Open (creating if needed) the database and its schema
    pub fn open<P: AsRef<Path>>(path: P) -> DriverResult<Self> {
        let graph = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = graph.open_connection()?;
        store::ensure_schema(&conn)?;
        debug!("Opened embedded graph at {}", graph.path.display());
        Ok(graph)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection with the backend pragmas applied
    fn open_connection(&self) -> DriverResult<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| {
            DriverError::ServiceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        // WAL lets readers proceed while a transaction holds the write lock;
        // busy_timeout makes writers queue instead of failing immediately.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA temp_store = MEMORY; \
             PRAGMA busy_timeout = 5000;",
        )?;

        Ok(conn)
    }
}

fn execute(conn: &Connection, statement: &Statement) -> DriverResult<QueryResult> {
    let query = parser::parse(&statement.text)?;
    Executor::new(conn, &statement.params).execute(&query)
}

impl Driver for EmbeddedGraph {
    fn run(&self, statement: &Statement) -> DriverResult<QueryResult> {
        let mut conn = self.open_connection()?;
        let tx = conn.transaction()?;
        let result = execute(&tx, statement)?;
        tx.commit()?;
        Ok(result)
    }

    fn begin_transaction(&self) -> DriverResult<Box<dyn TransactionContext>> {
        let conn = self.open_connection()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(EmbeddedTransaction { conn: Some(conn) }))
    }
}

/// An open `BEGIN IMMEDIATE` transaction. Rolls back when dropped unfinished.
pub struct EmbeddedTransaction {
    conn: Option<Connection>,
}

impl EmbeddedTransaction {
    fn connection(&self) -> DriverResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DriverError::Transaction("transaction already finished".to_string()))
    }

    fn finish(&mut self, sql: &str) -> DriverResult<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| DriverError::Transaction("transaction already finished".to_string()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl TransactionContext for EmbeddedTransaction {
    /// A failing statement is undone on its own; earlier statements in the
    /// transaction are kept until commit or rollback.
    fn run(&mut self, statement: &Statement) -> DriverResult<QueryResult> {
        let conn = self.connection()?;
        conn.execute_batch("SAVEPOINT statement")?;
        match execute(conn, statement) {
            Ok(result) => {
                conn.execute_batch("RELEASE statement")?;
                Ok(result)
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK TO statement; RELEASE statement")?;
                Err(e)
            }
        }
    }

    fn commit(mut self: Box<Self>) -> DriverResult<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> DriverResult<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for EmbeddedTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back abandoned transaction: {}", e);
            }
        }
    }
}
