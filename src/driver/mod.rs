//! The execution boundary: what the mapper needs from a graph driver.
//!
//! A [`Connector`] turns connection settings into a [`Driver`]; a driver runs
//! statements in auto-commit sessions or hands out [`TransactionContext`]s.
//! Results come back as [`Record`]s plus the [`Counters`] the backend
//! reports for the statement.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::DriverResult;

pub use serde_json::Value;

/// Node and relationship properties, in insertion order.
pub type PropertyMap = serde_json::Map<String, Value>;

/// Statement text plus its bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: PropertyMap,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: PropertyMap::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn params(mut self, params: PropertyMap) -> Self {
        self.params.extend(params);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub id: i64,
    pub rel_type: String,
    pub start: i64,
    pub end: i64,
    pub properties: PropertyMap,
}

/// One column of a result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GraphValue {
    Node(Node),
    Edge(Edge),
    Scalar(Value),
}

impl GraphValue {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            GraphValue::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<Node> {
        match self {
            GraphValue::Node(node) => Some(node),
            _ => None,
        }
    }
}

/// A result row; `keys[i]` names `values[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    pub keys: Vec<String>,
    pub values: Vec<GraphValue>,
}

impl Record {
    pub fn get(&self, index: usize) -> Option<&GraphValue> {
        self.values.get(index)
    }
}

/// Mutations a statement applied, as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub labels_added: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub records: Vec<Record>,
    pub counters: Counters,
}

impl QueryResult {
    /// The node in the first column of the first row, if any.
    pub fn first_node(&self) -> Option<&Node> {
        self.records.first().and_then(|r| r.get(0)).and_then(GraphValue::as_node)
    }

    /// Nodes from the first column of every row, skipping non-node values.
    pub fn into_nodes(self) -> Vec<Node> {
        self.records
            .into_iter()
            .filter_map(|r| r.values.into_iter().next())
            .filter_map(GraphValue::into_node)
            .collect()
    }
}

/// Username/password pair. The password never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub user_name: String,
    pub password: String,
}

impl BasicAuth {
    /// Credentials only when both parts are non-blank.
    pub fn from_parts(user_name: &str, password: &str) -> Option<Self> {
        if user_name.trim().is_empty() || password.trim().is_empty() {
            return None;
        }
        Some(Self {
            user_name: user_name.to_string(),
            password: password.to_string(),
        })
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub uri: Url,
    pub auth: Option<BasicAuth>,
}

/// An open statement executor.
pub trait Driver: Send + Sync {
    /// Runs a statement in its own auto-commit session.
    fn run(&self, statement: &Statement) -> DriverResult<QueryResult>;

    /// Opens an explicit transaction.
    fn begin_transaction(&self) -> DriverResult<Box<dyn TransactionContext>>;
}

/// An open transaction. Dropping it without `commit` must roll back.
pub trait TransactionContext: Send {
    fn run(&mut self, statement: &Statement) -> DriverResult<QueryResult>;
    fn commit(self: Box<Self>) -> DriverResult<()>;
    fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// Creates drivers for the URI schemes it understands.
pub trait Connector: Send + Sync {
    fn supports_scheme(&self, scheme: &str) -> bool;
    fn connect(&self, settings: &ConnectionSettings) -> DriverResult<Arc<dyn Driver>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_auth_requires_both_parts() {
        assert!(BasicAuth::from_parts("neo4j", "secret").is_some());
        assert!(BasicAuth::from_parts("neo4j", "  ").is_none());
        assert!(BasicAuth::from_parts("", "secret").is_none());
    }

    #[test]
    fn test_basic_auth_debug_hides_password() {
        let auth = BasicAuth::from_parts("neo4j", "hunter2").unwrap();
        let debug = format!("{:?}", auth);
        assert!(debug.contains("neo4j"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_first_node_and_into_nodes() {
        let node = Node {
            id: 7,
            labels: vec!["User".into()],
            properties: PropertyMap::new(),
        };
        let result = QueryResult {
            records: vec![
                Record {
                    keys: vec!["n".into()],
                    values: vec![GraphValue::Node(node.clone())],
                },
                Record {
                    keys: vec!["n".into()],
                    values: vec![GraphValue::Scalar(json!(1))],
                },
            ],
            counters: Counters::default(),
        };
        assert_eq!(result.first_node(), Some(&node));
        assert_eq!(result.into_nodes(), vec![node]);
    }
}
