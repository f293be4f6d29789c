//! Static per-type metadata: label, persisted fields, relationship fields.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{Entity, IS_DELETED_FIELD, UPDATED_AT_FIELD, UUID_FIELD};
use crate::error::{OgmError, Result};
use crate::query::is_identifier;

/// Edge direction relative to the entity declaring the relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    /// Arrow fragments placed before and after `[r:NAME]`.
    pub fn arrows(self) -> (&'static str, &'static str) {
        match self {
            Direction::Incoming => ("<-", "-"),
            Direction::Outgoing => ("-", "->"),
        }
    }
}

/// A named, directed relationship (`-[r:NAME]->` or `<-[r:NAME]-`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relationship<'a> {
    pub direction: Direction,
    pub name: &'a str,
}

impl<'a> Relationship<'a> {
    pub const fn incoming(name: &'a str) -> Self {
        Self {
            direction: Direction::Incoming,
            name,
        }
    }

    pub const fn outgoing(name: &'a str) -> Self {
        Self {
            direction: Direction::Outgoing,
            name,
        }
    }

    /// Renders the edge fragment, e.g. `<-[r:WROTE]-`.
    pub fn pattern(&self, properties: &str) -> String {
        let (from, to) = self.direction.arrows();
        format!("{}[r:{}{}]{}", from, self.name, properties, to)
    }
}

/// Whether a relationship field holds one related entity or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// The entity type on the far side of a relationship field.
///
/// Holds a function pointer rather than the descriptor itself so that
/// self-referencing types (a `User` with a `BestFriend: User`) can be
/// declared in a `static`.
#[derive(Debug, Clone, Copy)]
pub struct RelatedType {
    descriptor: fn() -> &'static EntityDescriptor,
    pub cardinality: Cardinality,
}

impl RelatedType {
    pub const fn one<T: Entity>() -> Self {
        Self {
            descriptor: T::descriptor,
            cardinality: Cardinality::One,
        }
    }

    pub const fn many<T: Entity>() -> Self {
        Self {
            descriptor: T::descriptor,
            cardinality: Cardinality::Many,
        }
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        (self.descriptor)()
    }
}

/// How a field takes part in persistence.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Stored as a node property
    Scalar,
    /// Present on the type, never written or read as a property
    NotMapped,
    /// Resolved through an edge to another node
    Relationship {
        relationship: Relationship<'static>,
        target: RelatedType,
    },
}

/// Metadata for one declared field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar,
        }
    }

    pub const fn not_mapped(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::NotMapped,
        }
    }

    pub const fn relationship(
        name: &'static str,
        relationship: Relationship<'static>,
        target: RelatedType,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Relationship {
                relationship,
                target,
            },
        }
    }
}

/// A relationship field as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipField {
    pub name: &'static str,
    pub relationship: Relationship<'static>,
    pub target: RelatedType,
}

/// Label plus field table for one entity type.
///
/// The system fields (`Uuid`, `IsDeleted`, `UpdatedAt`) come from
/// [`EntityBase`](super::EntityBase) and are not listed in `fields`.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub label: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl EntityDescriptor {
    /// User-declared scalar fields, in declaration order.
    pub fn scalar_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Scalar))
            .map(|f| f.name)
    }

    /// Every field written as a property, identifier last.
    pub fn persistable_fields(&self) -> Vec<&'static str> {
        let mut fields = self.settable_fields();
        fields.push(UUID_FIELD);
        fields
    }

    /// Persisted fields a caller may set; the identifier is system-assigned.
    pub fn settable_fields(&self) -> Vec<&'static str> {
        self.scalar_fields()
            .chain([IS_DELETED_FIELD, UPDATED_AT_FIELD])
            .collect()
    }

    /// Relationship fields, in declaration order.
    pub fn relationship_fields(&self) -> impl Iterator<Item = RelationshipField> + '_ {
        self.fields.iter().filter_map(|f| match f.kind {
            FieldKind::Relationship {
                relationship,
                target,
            } => Some(RelationshipField {
                name: f.name,
                relationship,
                target,
            }),
            _ => None,
        })
    }

    /// Checks the table before any statement is built from it.
    ///
    /// Labels, field names and relationship names end up as statement text,
    /// so all of them must be plain identifiers.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(self.label) {
            return Err(OgmError::Config(format!(
                "entity label {:?} is not a valid identifier",
                self.label
            )));
        }

        let mut seen: HashSet<&str> = [UUID_FIELD, IS_DELETED_FIELD, UPDATED_AT_FIELD]
            .into_iter()
            .collect();

        for field in self.fields {
            if !is_identifier(field.name) {
                return Err(OgmError::Config(format!(
                    "{}: field name {:?} is not a valid identifier",
                    self.label, field.name
                )));
            }
            if !seen.insert(field.name) {
                return Err(OgmError::Config(format!(
                    "{}: field {} is declared twice or shadows a system field",
                    self.label, field.name
                )));
            }
        }

        for field in self.relationship_fields() {
            if !is_identifier(field.relationship.name) {
                return Err(OgmError::Config(format!(
                    "{}.{}: relationship name {:?} is not a valid identifier",
                    self.label, field.name, field.relationship.name
                )));
            }
            let related = field.target.descriptor();
            if !is_identifier(related.label) {
                return Err(OgmError::Config(format!(
                    "{}.{}: related type has no usable label ({:?})",
                    self.label, field.name, related.label
                )));
            }
        }

        Ok(())
    }
}
