//! Row-level access to the node and relationship tables.

use rusqlite::{params, Connection, OptionalExtension};

use crate::driver::{Edge, Node, PropertyMap};
use crate::entity::Direction;
use crate::error::DriverResult;

/// Create the graph tables if they do not exist yet
pub fn ensure_schema(conn: &Connection) -> DriverResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            labels TEXT NOT NULL,
            properties TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rel_type TEXT NOT NULL,
            start_id INTEGER NOT NULL REFERENCES nodes(id),
            end_id INTEGER NOT NULL REFERENCES nodes(id),
            properties TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_relationships_start ON relationships(start_id, rel_type);
        CREATE INDEX IF NOT EXISTS idx_relationships_end ON relationships(end_id, rel_type);",
    )?;
    Ok(())
}

fn decode_node(id: i64, labels: &str, properties: &str) -> DriverResult<Node> {
    Ok(Node {
        id,
        labels: serde_json::from_str(labels)?,
        properties: serde_json::from_str(properties)?,
    })
}

fn decode_edge(
    (id, rel_type, start, end, properties): (i64, String, i64, i64, String),
) -> DriverResult<Edge> {
    Ok(Edge {
        id,
        rel_type,
        start,
        end,
        properties: serde_json::from_str(&properties)?,
    })
}

/// All nodes, or only those carrying `label`, in creation order
pub fn nodes(conn: &Connection, label: Option<&str>) -> DriverResult<Vec<Node>> {
    let rows: Vec<(i64, String, String)> = match label {
        Some(label) => {
            let mut stmt = conn.prepare(
                "SELECT id, labels, properties FROM nodes
                 WHERE EXISTS (SELECT 1 FROM json_each(nodes.labels) WHERE json_each.value = ?1)
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![label], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare("SELECT id, labels, properties FROM nodes ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            rows
        }
    };

    rows.iter()
        .map(|(id, labels, properties)| decode_node(*id, labels, properties))
        .collect()
}

pub fn node(conn: &Connection, id: i64) -> DriverResult<Option<Node>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT labels, properties FROM nodes WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(labels, properties)| decode_node(id, &labels, &properties))
        .transpose()
}

pub fn insert_node(
    conn: &Connection,
    labels: &[String],
    properties: &PropertyMap,
) -> DriverResult<Node> {
    conn.execute(
        "INSERT INTO nodes (labels, properties) VALUES (?1, ?2)",
        params![serde_json::to_string(labels)?, serde_json::to_string(properties)?],
    )?;
    Ok(Node {
        id: conn.last_insert_rowid(),
        labels: labels.to_vec(),
        properties: properties.clone(),
    })
}

/// Write back labels and properties of an existing node
pub fn save_node(conn: &Connection, node: &Node) -> DriverResult<()> {
    conn.execute(
        "UPDATE nodes SET labels = ?1, properties = ?2 WHERE id = ?3",
        params![
            serde_json::to_string(&node.labels)?,
            serde_json::to_string(&node.properties)?,
            node.id
        ],
    )?;
    Ok(())
}

pub fn delete_node(conn: &Connection, id: i64) -> DriverResult<bool> {
    let deleted = conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Relationships of `rel_type` leaving (`Outgoing`) or entering
/// (`Incoming`) the node
pub fn edges(
    conn: &Connection,
    node_id: i64,
    direction: Direction,
    rel_type: &str,
) -> DriverResult<Vec<Edge>> {
    let sql = match direction {
        Direction::Outgoing => {
            "SELECT id, rel_type, start_id, end_id, properties FROM relationships
             WHERE start_id = ?1 AND rel_type = ?2 ORDER BY id"
        }
        Direction::Incoming => {
            "SELECT id, rel_type, start_id, end_id, properties FROM relationships
             WHERE end_id = ?1 AND rel_type = ?2 ORDER BY id"
        }
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![node_id, rel_type], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    rows.into_iter().map(decode_edge).collect()
}

pub fn edge(conn: &Connection, id: i64) -> DriverResult<Option<Edge>> {
    let row = conn
        .query_row(
            "SELECT id, rel_type, start_id, end_id, properties FROM relationships WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;

    row.map(decode_edge).transpose()
}

pub fn insert_edge(
    conn: &Connection,
    rel_type: &str,
    start: i64,
    end: i64,
    properties: &PropertyMap,
) -> DriverResult<Edge> {
    conn.execute(
        "INSERT INTO relationships (rel_type, start_id, end_id, properties) VALUES (?1, ?2, ?3, ?4)",
        params![rel_type, start, end, serde_json::to_string(properties)?],
    )?;
    Ok(Edge {
        id: conn.last_insert_rowid(),
        rel_type: rel_type.to_string(),
        start,
        end,
        properties: properties.clone(),
    })
}

pub fn save_edge(conn: &Connection, edge: &Edge) -> DriverResult<()> {
    conn.execute(
        "UPDATE relationships SET properties = ?1 WHERE id = ?2",
        params![serde_json::to_string(&edge.properties)?, edge.id],
    )?;
    Ok(())
}

pub fn delete_edge(conn: &Connection, id: i64) -> DriverResult<bool> {
    let deleted = conn.execute("DELETE FROM relationships WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Remove every relationship touching the node; returns how many went
pub fn delete_edges_of(conn: &Connection, node_id: i64) -> DriverResult<u64> {
    let deleted = conn.execute(
        "DELETE FROM relationships WHERE start_id = ?1 OR end_id = ?1",
        params![node_id],
    )?;
    Ok(deleted as u64)
}

pub fn has_edges(conn: &Connection, node_id: i64) -> DriverResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM relationships WHERE start_id = ?1 OR end_id = ?1",
        params![node_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
