//! Relationship resolution for read paths.
//!
//! One query per relationship field, in declaration order. Related nodes
//! come back as plain property maps and are merged into the root node's map
//! before it is materialized.

use serde_json::Value;

use crate::driver::{PropertyMap, Statement};
use crate::entity::{Cardinality, EntityDescriptor, RelationshipField, UUID_FIELD};
use crate::error::Result;
use crate::query::{Substitutions, Template};

use super::OgmClient;

/// Statement fetching the nodes on the far side of `field` for a root node
/// of `descriptor`, bound to the root's identifier as `$value`.
pub(crate) fn related_query(
    descriptor: &EntityDescriptor,
    field: &RelationshipField,
) -> Result<String> {
    let related = field.target.descriptor();
    Template::GetByProperty.render(
        &Substitutions::new()
            .with("label", descriptor.label)
            .with("property", UUID_FIELD)
            .with("relationship", field.relationship.pattern(""))
            .with(
                "relatedNode",
                format!("(rNode:{}{{IsDeleted:false}})", related.label),
            )
            .with("result", "rNode"),
    )
}

/// Related data for the node `uuid`, keyed by relationship field name.
///
/// `Many` fields always get an array (possibly empty); `One` fields get the
/// first match and are left out when nothing matches.
pub(crate) fn fetch_related(
    client: &OgmClient,
    descriptor: &EntityDescriptor,
    uuid: &str,
) -> Result<PropertyMap> {
    let mut related = PropertyMap::new();

    for field in descriptor.relationship_fields() {
        let text = related_query(descriptor, &field)?;
        let result = client.execute(Statement::new(text).param("value", uuid))?;
        let mut nodes = result
            .into_nodes()
            .into_iter()
            .map(|node| Value::Object(node.properties));

        match field.target.cardinality {
            Cardinality::Many => {
                related.insert(field.name.to_string(), Value::Array(nodes.collect()));
            }
            Cardinality::One => {
                if let Some(first) = nodes.next() {
                    related.insert(field.name.to_string(), first);
                }
            }
        }
    }

    Ok(related)
}

/// Overlays resolved relationship data onto a node's own properties.
pub(crate) fn merge_related(properties: &mut PropertyMap, related: PropertyMap) {
    for (key, value) in related {
        properties.insert(key, value);
    }
}
