//! Neo4j backend over the bolt protocol.
//!
//! Wraps a `neo4rs` [`Graph`] and blocks on a private tokio runtime so the
//! client API stays synchronous. URIs use the schemes `neo4rs` understands:
//! `bolt`, `neo4j` and their `+s` / `+ssc` (encrypted) variants.
//!
//! Unlike the embedded backend, a failing statement inside an explicit
//! transaction leaves the server-side transaction unusable; the next
//! statement or the commit reports the failure.

use log::{debug, warn};
use neo4rs::{query, BoltNull, BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use crate::driver::{
    ConnectionSettings, Connector, Counters, Driver, Edge, GraphValue, Node, PropertyMap,
    QueryResult, Record, Statement, TransactionContext,
};
use crate::error::{DriverError, DriverResult};

pub const BOLT_SCHEMES: &[&str] = &[
    "bolt", "bolt+s", "bolt+ssc", "neo4j", "neo4j+s", "neo4j+ssc",
];

/// Time allowed for establishing the first connection and authenticating.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens [`BoltGraph`]s for `bolt://` and `neo4j://` URIs.
#[derive(Debug, Clone)]
pub struct BoltConnector {
    connect_timeout: Duration,
    max_connections: usize,
}

impl Default for BoltConnector {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            max_connections: 16,
        }
    }
}

impl BoltConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

impl Connector for BoltConnector {
    fn supports_scheme(&self, scheme: &str) -> bool {
        BOLT_SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }

    fn connect(&self, settings: &ConnectionSettings) -> DriverResult<Arc<dyn Driver>> {
        if !self.supports_scheme(settings.uri.scheme()) {
            return Err(DriverError::ServiceUnavailable(format!(
                "scheme {} is not served by the bolt backend",
                settings.uri.scheme()
            )));
        }

        // Servers with authentication disabled accept any credentials.
        let (user, password) = settings
            .auth
            .as_ref()
            .map(|auth| (auth.user_name.as_str(), auth.password.as_str()))
            .unwrap_or(("", ""));
        let config = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(user)
            .password(password)
            .max_connections(self.max_connections)
            .build()
            .map_err(|e| DriverError::ServiceUnavailable(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ogm-bolt")
            .enable_all()
            .build()
            .map_err(|e| DriverError::ServiceUnavailable(e.to_string()))?;

        let timeout = self.connect_timeout;
        let graph = runtime.block_on(async {
            let connecting = async {
                let graph = Graph::connect(config).await?;
                // The pool connects lazily; a round trip surfaces refused
                // connections and rejected credentials here.
                let mut stream = graph.execute(query("RETURN 1")).await?;
                while stream.next().await?.is_some() {}
                Ok::<_, neo4rs::Error>(graph)
            };
            match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result.map_err(|e| classify(e.to_string(), true)),
                Err(_) => Err(DriverError::ServiceUnavailable(format!(
                    "no connection to {} within {:?}",
                    settings.uri, timeout
                ))),
            }
        })?;

        debug!("Connected to {}", settings.uri);
        Ok(Arc::new(BoltGraph {
            graph,
            runtime: Arc::new(runtime),
        }))
    }
}

/// Maps a `neo4rs` error message to the driver taxonomy. Failures before the
/// first statement ran count as the service being unavailable.
fn classify(message: String, connecting: bool) -> DriverError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unauthorized") || lower.contains("authentication") {
        DriverError::Authentication(message)
    } else if message.contains("SyntaxError") || message.contains("Statement.") {
        DriverError::Syntax(message)
    } else if connecting {
        DriverError::ServiceUnavailable(message)
    } else {
        DriverError::Backend(message)
    }
}

fn run_error(error: neo4rs::Error) -> DriverError {
    classify(error.to_string(), false)
}

/// Converts a bound parameter to its bolt representation.
fn bolt_value(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => BoltType::from(items.iter().map(bolt_value).collect::<Vec<_>>()),
        Value::Object(map) => BoltType::from(
            map.iter()
                .map(|(k, v)| (k.clone(), bolt_value(v)))
                .collect::<HashMap<String, BoltType>>(),
        ),
    }
}

fn bolt_query(statement: &Statement) -> Query {
    statement
        .params
        .iter()
        .fold(query(&statement.text), |q, (name, value)| {
            q.param(name, bolt_value(value))
        })
}

fn properties<F>(keys: Vec<&str>, get: F) -> DriverResult<PropertyMap>
where
    F: Fn(&str) -> Result<Value, neo4rs::DeError>,
{
    keys.into_iter()
        .map(|key| {
            get(key)
                .map(|value| (key.to_string(), value))
                .map_err(|e| DriverError::Backend(format!("property {}: {}", key, e)))
        })
        .collect()
}

fn graph_value(row: &Row, key: &str) -> DriverResult<GraphValue> {
    if let Ok(node) = row.get::<neo4rs::Node>(key) {
        return Ok(GraphValue::Node(Node {
            id: node.id(),
            labels: node.labels().into_iter().map(str::to_string).collect(),
            properties: properties(node.keys(), |k| node.get::<Value>(k))?,
        }));
    }
    if let Ok(rel) = row.get::<neo4rs::Relation>(key) {
        return Ok(GraphValue::Edge(Edge {
            id: rel.id(),
            rel_type: rel.typ().to_string(),
            start: rel.start_node_id(),
            end: rel.end_node_id(),
            properties: properties(rel.keys(), |k| rel.get::<Value>(k))?,
        }));
    }
    row.get::<Value>(key)
        .map(GraphValue::Scalar)
        .map_err(|e| DriverError::Backend(format!("column {}: {}", key, e)))
}

fn record(row: &Row) -> DriverResult<Record> {
    let keys: Vec<String> = row.keys().into_iter().map(|k| k.value).collect();
    let values = keys
        .iter()
        .map(|key| graph_value(row, key))
        .collect::<DriverResult<Vec<_>>>()?;
    Ok(Record { keys, values })
}

fn counters(stats: &neo4rs::summary::Counters) -> Counters {
    Counters {
        nodes_created: stats.nodes_created,
        nodes_deleted: stats.nodes_deleted,
        relationships_created: stats.relationships_created,
        relationships_deleted: stats.relationships_deleted,
        labels_added: stats.labels_added,
    }
}

/// Connection pool to one Neo4j server or cluster.
pub struct BoltGraph {
    graph: Graph,
    runtime: Arc<Runtime>,
}

impl Driver for BoltGraph {
    fn run(&self, statement: &Statement) -> DriverResult<QueryResult> {
        self.runtime.block_on(async {
            let mut stream = self
                .graph
                .execute(bolt_query(statement))
                .await
                .map_err(run_error)?;
            let mut records = Vec::new();
            while let Some(row) = stream.next().await.map_err(run_error)? {
                records.push(record(&row)?);
            }
            let summary = stream.finish().await.map_err(run_error)?;
            Ok(QueryResult {
                records,
                counters: summary.map(|s| counters(&s.stats)).unwrap_or_default(),
            })
        })
    }

    fn begin_transaction(&self) -> DriverResult<Box<dyn TransactionContext>> {
        let txn = self
            .runtime
            .block_on(self.graph.start_txn())
            .map_err(run_error)?;
        Ok(Box::new(BoltTransaction {
            txn: Some(txn),
            runtime: self.runtime.clone(),
        }))
    }
}

/// An open server-side transaction. Rolls back when dropped unfinished.
pub struct BoltTransaction {
    txn: Option<Txn>,
    runtime: Arc<Runtime>,
}

impl BoltTransaction {
    fn take(&mut self) -> DriverResult<Txn> {
        self.txn
            .take()
            .ok_or_else(|| DriverError::Transaction("transaction already finished".to_string()))
    }
}

impl TransactionContext for BoltTransaction {
    fn run(&mut self, statement: &Statement) -> DriverResult<QueryResult> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| DriverError::Transaction("transaction already finished".to_string()))?;
        self.runtime.block_on(async {
            let mut stream = txn.execute(bolt_query(statement)).await.map_err(run_error)?;
            let mut records = Vec::new();
            while let Some(row) = stream.next(txn.handle()).await.map_err(run_error)? {
                records.push(record(&row)?);
            }
            let summary = stream.finish(txn.handle()).await.map_err(run_error)?;
            Ok(QueryResult {
                records,
                counters: summary.map(|s| counters(&s.stats)).unwrap_or_default(),
            })
        })
    }

    fn commit(mut self: Box<Self>) -> DriverResult<()> {
        let txn = self.take()?;
        self.runtime.block_on(txn.commit()).map_err(run_error)
    }

    fn rollback(mut self: Box<Self>) -> DriverResult<()> {
        let txn = self.take()?;
        self.runtime.block_on(txn.rollback()).map_err(run_error)
    }
}

impl Drop for BoltTransaction {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = self.runtime.block_on(txn.rollback()) {
                warn!("Rollback of dropped bolt transaction failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BasicAuth;
    use serde_json::json;
    use url::Url;

    #[test]
    fn test_supported_schemes() {
        let connector = BoltConnector::new();
        for scheme in ["bolt", "neo4j", "neo4j+s", "BOLT+SSC"] {
            assert!(connector.supports_scheme(scheme), "{}", scheme);
        }
        assert!(!connector.supports_scheme("embedded"));
        assert!(!connector.supports_scheme("http"));
    }

    #[test]
    fn test_bolt_value_conversion() {
        assert!(matches!(bolt_value(&Value::Null), BoltType::Null(_)));
        assert!(matches!(bolt_value(&json!(true)), BoltType::Boolean(_)));
        assert!(matches!(bolt_value(&json!(42)), BoltType::Integer(_)));
        assert!(matches!(bolt_value(&json!(2.5)), BoltType::Float(_)));
        assert!(matches!(bolt_value(&json!("O'Brien")), BoltType::String(_)));
        assert!(matches!(bolt_value(&json!([1, "a"])), BoltType::List(_)));
        assert!(matches!(bolt_value(&json!({"since": 1843})), BoltType::Map(_)));
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            classify(
                "Neo4j error `Neo.ClientError.Security.Unauthorized`: bad credentials".into(),
                true
            ),
            DriverError::Authentication(_)
        ));
        assert!(matches!(
            classify(
                "Neo4j error `Neo.ClientError.Statement.SyntaxError`: Invalid input".into(),
                false
            ),
            DriverError::Syntax(_)
        ));
        assert!(matches!(
            classify("Connection refused (os error 111)".into(), true),
            DriverError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            classify("Connection reset by peer".into(), false),
            DriverError::Backend(_)
        ));
    }

    #[test]
    fn test_unreachable_server_is_service_unavailable() {
        let settings = ConnectionSettings {
            uri: Url::parse("bolt://127.0.0.1:1").unwrap(),
            auth: BasicAuth::from_parts("neo4j", "secret"),
        };
        let connector = BoltConnector::new().with_connect_timeout(Duration::from_secs(5));
        let result = connector.connect(&settings);
        assert!(matches!(result, Err(DriverError::ServiceUnavailable(_))));
    }

    #[test]
    fn test_wrong_scheme_is_rejected() {
        let settings = ConnectionSettings {
            uri: Url::parse("embedded:///tmp/graph.db").unwrap(),
            auth: None,
        };
        assert!(matches!(
            BoltConnector::new().connect(&settings),
            Err(DriverError::ServiceUnavailable(_))
        ));
    }
}
