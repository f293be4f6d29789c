//! Evaluates parsed statements against the store, one clause at a time.
//!
//! Each clause maps a list of binding rows to a new list. `MATCH` expands
//! rows with every combination of matching nodes and relationships, writes
//! act once per row, and `RETURN` projects the final rows into records.

use rusqlite::Connection;
use std::collections::HashMap;

use crate::driver::{Counters, Edge, GraphValue, Node, PropertyMap, QueryResult, Record, Value};
use crate::entity::Direction;
use crate::error::{DriverError, DriverResult};

use super::parser::{
    Clause, Expr, NodePattern, PathPattern, Query, RelPattern, ReturnItem, SetItem,
};
use super::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Node(i64),
    Edge(i64),
}

type Row = HashMap<String, Bound>;

pub struct Executor<'c> {
    conn: &'c Connection,
    params: &'c PropertyMap,
    counters: Counters,
}

impl<'c> Executor<'c> {
    pub fn new(conn: &'c Connection, params: &'c PropertyMap) -> Self {
        Self {
            conn,
            params,
            counters: Counters::default(),
        }
    }

    pub fn execute(mut self, query: &Query) -> DriverResult<QueryResult> {
        let mut rows: Vec<Row> = vec![Row::new()];
        let mut records = Vec::new();

        for clause in &query.clauses {
            match clause {
                Clause::Match(paths) => {
                    for path in paths {
                        rows = self.match_path(rows, path)?;
                    }
                }
                Clause::Create(path) => {
                    for row in rows.iter_mut() {
                        self.create_path(row, path)?;
                    }
                }
                Clause::Merge {
                    pattern,
                    on_create,
                    on_match,
                } => {
                    rows = self.merge_path(rows, pattern, on_create, on_match)?;
                }
                Clause::Set(items) => {
                    for row in &rows {
                        self.apply_set(row, items)?;
                    }
                }
                Clause::Delete { detach, variables } => {
                    for row in &rows {
                        self.delete(row, variables, *detach)?;
                    }
                }
                Clause::Return(items) => {
                    records = self.project(&rows, items)?;
                }
            }
        }

        Ok(QueryResult {
            records,
            counters: self.counters,
        })
    }

    fn eval(&self, expr: &Expr) -> DriverResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| DriverError::Syntax(format!("missing parameter ${}", name))),
        }
    }

    fn properties_match(
        &self,
        actual: &PropertyMap,
        expected: &[(String, Expr)],
    ) -> DriverResult<bool> {
        for (key, expr) in expected {
            let wanted = self.eval(expr)?;
            match actual.get(key) {
                Some(value) if values_equal(value, &wanted) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn node_matches(&self, node: &Node, pattern: &NodePattern) -> DriverResult<bool> {
        if !pattern.labels.iter().all(|l| node.labels.contains(l)) {
            return Ok(false);
        }
        self.properties_match(&node.properties, &pattern.properties)
    }

    fn bound_node(&self, row: &Row, variable: &str) -> DriverResult<Option<i64>> {
        match row.get(variable) {
            Some(Bound::Node(id)) => Ok(Some(*id)),
            Some(Bound::Edge(_)) => Err(DriverError::Syntax(format!(
                "variable {} is a relationship, not a node",
                variable
            ))),
            None => Ok(None),
        }
    }

    /// Candidate nodes for a pattern, honouring an existing binding.
    fn candidates(&self, row: &Row, pattern: &NodePattern) -> DriverResult<Vec<Node>> {
        if let Some(variable) = &pattern.variable {
            if let Some(id) = self.bound_node(row, variable)? {
                let node = store::node(self.conn, id)?;
                return Ok(node.into_iter().collect());
            }
        }
        store::nodes(self.conn, pattern.labels.first().map(String::as_str))
    }

    fn matching_nodes(&self, row: &Row, pattern: &NodePattern) -> DriverResult<Vec<Node>> {
        let mut matched = Vec::new();
        for node in self.candidates(row, pattern)? {
            if self.node_matches(&node, pattern)? {
                matched.push(node);
            }
        }
        Ok(matched)
    }

    /// Relationships leaving `node_id` along `rel`, paired with the far node.
    fn hops(&self, node_id: i64, rel: &RelPattern) -> DriverResult<Vec<(Edge, i64)>> {
        let mut hops = Vec::new();
        for edge in store::edges(self.conn, node_id, rel.direction, &rel.rel_type)? {
            if !self.properties_match(&edge.properties, &rel.properties)? {
                continue;
            }
            let other = match rel.direction {
                Direction::Outgoing => edge.end,
                Direction::Incoming => edge.start,
            };
            hops.push((edge, other));
        }
        Ok(hops)
    }

    fn match_path(&self, rows: Vec<Row>, path: &PathPattern) -> DriverResult<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            for start in self.matching_nodes(&row, &path.start)? {
                let mut with_start = row.clone();
                bind(&mut with_start, &path.start.variable, Bound::Node(start.id));

                let Some((rel, end)) = &path.hop else {
                    out.push(with_start);
                    continue;
                };

                for (edge, other) in self.hops(start.id, rel)? {
                    let Some(end_node) = store::node(self.conn, other)? else {
                        continue;
                    };
                    if let Some(id) = self.binding_of(&row, end)? {
                        if id != other {
                            continue;
                        }
                    }
                    if !self.node_matches(&end_node, end)? {
                        continue;
                    }
                    let mut full = with_start.clone();
                    bind(&mut full, &rel.variable, Bound::Edge(edge.id));
                    bind(&mut full, &end.variable, Bound::Node(other));
                    out.push(full);
                }
            }
        }
        Ok(out)
    }

    fn evaluated_properties(&self, properties: &[(String, Expr)]) -> DriverResult<PropertyMap> {
        let mut map = PropertyMap::new();
        for (key, expr) in properties {
            let value = self.eval(expr)?;
            if !value.is_null() {
                map.insert(key.clone(), value);
            }
        }
        Ok(map)
    }

    /// A bound node, or a freshly created one when the variable is unbound.
    fn node_for_create(&mut self, row: &mut Row, pattern: &NodePattern) -> DriverResult<i64> {
        if let Some(variable) = &pattern.variable {
            if let Some(id) = self.bound_node(row, variable)? {
                if !pattern.labels.is_empty() || !pattern.properties.is_empty() {
                    return Err(DriverError::Syntax(format!(
                        "variable {} is already bound",
                        variable
                    )));
                }
                return Ok(id);
            }
        }

        let properties = self.evaluated_properties(&pattern.properties)?;
        let node = store::insert_node(self.conn, &pattern.labels, &properties)?;
        self.counters.nodes_created += 1;
        self.counters.labels_added += pattern.labels.len() as u64;
        bind(row, &pattern.variable, Bound::Node(node.id));
        Ok(node.id)
    }

    fn create_edge(
        &mut self,
        row: &mut Row,
        rel: &RelPattern,
        left: i64,
        right: i64,
    ) -> DriverResult<i64> {
        let (start, end) = match rel.direction {
            Direction::Outgoing => (left, right),
            Direction::Incoming => (right, left),
        };
        let properties = self.evaluated_properties(&rel.properties)?;
        let edge = store::insert_edge(self.conn, &rel.rel_type, start, end, &properties)?;
        self.counters.relationships_created += 1;
        bind(row, &rel.variable, Bound::Edge(edge.id));
        Ok(edge.id)
    }

    fn create_path(&mut self, row: &mut Row, path: &PathPattern) -> DriverResult<()> {
        let left = self.node_for_create(row, &path.start)?;
        if let Some((rel, end)) = &path.hop {
            let right = self.node_for_create(row, end)?;
            self.create_edge(row, rel, left, right)?;
        }
        Ok(())
    }

    fn merge_path(
        &mut self,
        rows: Vec<Row>,
        path: &PathPattern,
        on_create: &[SetItem],
        on_match: &[SetItem],
    ) -> DriverResult<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let matched = self.match_path(vec![row.clone()], path)?;
            if matched.is_empty() {
                let mut created = row;
                match &path.hop {
                    None => {
                        self.node_for_create(&mut created, &path.start)?;
                    }
                    Some((rel, end)) => {
                        let left = self.required_binding(&created, &path.start)?;
                        let right = self.required_binding(&created, end)?;
                        self.create_edge(&mut created, rel, left, right)?;
                    }
                }
                self.apply_set(&created, on_create)?;
                out.push(created);
            } else {
                for found in matched {
                    self.apply_set(&found, on_match)?;
                    out.push(found);
                }
            }
        }
        Ok(out)
    }

    fn binding_of(&self, row: &Row, pattern: &NodePattern) -> DriverResult<Option<i64>> {
        match &pattern.variable {
            Some(variable) => self.bound_node(row, variable),
            None => Ok(None),
        }
    }

    /// Relationship merges only connect nodes an earlier `MATCH` bound.
    fn required_binding(&self, row: &Row, pattern: &NodePattern) -> DriverResult<i64> {
        self.binding_of(row, pattern)?.ok_or_else(|| {
            DriverError::Syntax("MERGE of a relationship needs bound endpoints".to_string())
        })
    }

    fn apply_set(&mut self, row: &Row, items: &[SetItem]) -> DriverResult<()> {
        for item in items {
            match item {
                SetItem::Property {
                    variable,
                    key,
                    value,
                } => {
                    let value = self.eval(value)?;
                    match row.get(variable.as_str()) {
                        Some(Bound::Node(id)) => {
                            let Some(mut node) = store::node(self.conn, *id)? else {
                                continue;
                            };
                            set_property(&mut node.properties, key, value);
                            store::save_node(self.conn, &node)?;
                        }
                        Some(Bound::Edge(id)) => {
                            let Some(mut edge) = store::edge(self.conn, *id)? else {
                                continue;
                            };
                            set_property(&mut edge.properties, key, value);
                            store::save_edge(self.conn, &edge)?;
                        }
                        None => return Err(unbound(variable)),
                    }
                }
                SetItem::Label { variable, label } => {
                    let id = self
                        .bound_node(row, variable)?
                        .ok_or_else(|| unbound(variable))?;
                    let Some(mut node) = store::node(self.conn, id)? else {
                        continue;
                    };
                    if !node.labels.contains(label) {
                        node.labels.push(label.clone());
                        store::save_node(self.conn, &node)?;
                        self.counters.labels_added += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, row: &Row, variables: &[String], detach: bool) -> DriverResult<()> {
        for variable in variables {
            match row.get(variable.as_str()) {
                Some(Bound::Node(id)) => {
                    if detach {
                        self.counters.relationships_deleted += store::delete_edges_of(self.conn, *id)?;
                    } else if store::has_edges(self.conn, *id)? {
                        return Err(DriverError::Syntax(format!(
                            "cannot delete node {} that still has relationships; use DETACH DELETE",
                            variable
                        )));
                    }
                    if store::delete_node(self.conn, *id)? {
                        self.counters.nodes_deleted += 1;
                    }
                }
                Some(Bound::Edge(id)) => {
                    if store::delete_edge(self.conn, *id)? {
                        self.counters.relationships_deleted += 1;
                    }
                }
                None => return Err(unbound(variable)),
            }
        }
        Ok(())
    }

    fn project(&self, rows: &[Row], items: &[ReturnItem]) -> DriverResult<Vec<Record>> {
        let keys: Vec<String> = items
            .iter()
            .map(|item| match item {
                ReturnItem::Variable(name) => name.clone(),
                ReturnItem::Expr(Expr::Param(name)) => format!("${}", name),
                ReturnItem::Expr(Expr::Literal(value)) => value.to_string(),
            })
            .collect();

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let value = match item {
                    ReturnItem::Variable(name) => match row.get(name.as_str()) {
                        Some(Bound::Node(id)) => store::node(self.conn, *id)?
                            .map(GraphValue::Node)
                            .unwrap_or(GraphValue::Scalar(Value::Null)),
                        Some(Bound::Edge(id)) => store::edge(self.conn, *id)?
                            .map(GraphValue::Edge)
                            .unwrap_or(GraphValue::Scalar(Value::Null)),
                        None => return Err(unbound(name)),
                    },
                    ReturnItem::Expr(expr) => GraphValue::Scalar(self.eval(expr)?),
                };
                values.push(value);
            }
            records.push(Record {
                keys: keys.clone(),
                values,
            });
        }
        Ok(records)
    }
}

fn bind(row: &mut Row, variable: &Option<String>, value: Bound) {
    if let Some(name) = variable {
        row.insert(name.clone(), value);
    }
}

fn unbound(variable: &str) -> DriverError {
    DriverError::Syntax(format!("variable {} is not defined", variable))
}

/// Setting a property to null removes it.
fn set_property(properties: &mut PropertyMap, key: &str, value: Value) {
    if value.is_null() {
        properties.remove(key);
    } else {
        properties.insert(key.to_string(), value);
    }
}

/// Property equality for pattern matching. Numbers compare by value and
/// null never matches anything.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (a, b) => a == b,
    }
}
