//! Typed entities and the metadata that drives their mapping.
//!
//! An entity is a serde-(de)serializable struct that flattens an
//! [`EntityBase`] and declares an [`EntityDescriptor`] table. Property maps
//! coming back from the graph are turned into entities with [`map_row`];
//! no per-type mapping code is needed beyond the descriptor.

mod descriptor;

pub use descriptor::{
    Cardinality, Direction, EntityDescriptor, FieldDescriptor, FieldKind, RelatedType,
    Relationship, RelationshipField,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::driver::PropertyMap;
use crate::error::{OgmError, Result};

/// Property holding the system-assigned identifier.
pub const UUID_FIELD: &str = "Uuid";
/// Soft-delete flag filtered into every read.
pub const IS_DELETED_FIELD: &str = "IsDeleted";
/// Epoch milliseconds of the last soft delete.
pub const UPDATED_AT_FIELD: &str = "UpdatedAt";

/// System fields shared by every entity. Flatten it into the entity struct:
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// #[serde(default, rename_all = "PascalCase")]
/// struct User {
///     #[serde(flatten)]
///     base: EntityBase,
///     email: String,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityBase {
    #[serde(rename = "Uuid", default)]
    pub uuid: String,
    #[serde(rename = "IsDeleted", default)]
    pub is_deleted: bool,
    #[serde(rename = "UpdatedAt", default)]
    pub updated_at: Option<f64>,
}

/// A node type the client can read and write.
///
/// Relationship and not-mapped fields must tolerate being absent from a
/// property map, so entity structs normally carry `#[serde(default)]`.
pub trait Entity: Serialize + DeserializeOwned + Default {
    fn descriptor() -> &'static EntityDescriptor;
    fn base(&self) -> &EntityBase;
    fn base_mut(&mut self) -> &mut EntityBase;

    fn uuid(&self) -> &str {
        &self.base().uuid
    }
}

/// Identifier format used when a node is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentifierFormat {
    /// `67e55044-10b1-426f-9247-bb680e5fe0c8`
    #[default]
    Hyphenated,
    /// `67e5504410b1426f9247bb680e5fe0c8`
    Simple,
}

impl IdentifierFormat {
    pub fn from_strip_hyphens(strip_hyphens: bool) -> Self {
        if strip_hyphens {
            IdentifierFormat::Simple
        } else {
            IdentifierFormat::Hyphenated
        }
    }

    pub fn generate(self) -> String {
        let id = Uuid::new_v4();
        match self {
            IdentifierFormat::Hyphenated => id.hyphenated().to_string(),
            IdentifierFormat::Simple => id.simple().to_string(),
        }
    }
}

/// Extracts `fields` from `entity` as a property map, in the order given.
///
/// `None` values serialize as present `null`s, so a field missing from the
/// serialized entity means the descriptor and the struct disagree.
pub fn to_properties<T: Entity>(entity: &T, fields: &[&str]) -> Result<PropertyMap> {
    let label = T::descriptor().label;
    let Value::Object(mut all) = serde_json::to_value(entity)? else {
        return Err(OgmError::Config(format!(
            "{} does not serialize to a property map",
            label
        )));
    };

    fields
        .iter()
        .map(|field| match all.remove(*field) {
            Some(value) => Ok((field.to_string(), value)),
            None => Err(OgmError::Config(format!(
                "{}: field {} is not serialized by the entity type",
                label, field
            ))),
        })
        .collect()
}

/// Materializes a node's (merged) property map as `T`.
pub fn map_row<T: Entity>(properties: PropertyMap) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(properties))?)
}

/// Current time as epoch milliseconds, the unit used for `UpdatedAt`.
pub fn timestamp_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default, rename_all = "PascalCase")]
    struct Movie {
        #[serde(flatten)]
        base: EntityBase,
        title: String,
        released: i64,
        #[serde(skip)]
        cached_rating: f64,
        actors: Vec<Actor>,
    }

    impl Entity for Movie {
        fn descriptor() -> &'static EntityDescriptor {
            static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
                label: "Movie",
                fields: &[
                    FieldDescriptor::scalar("Title"),
                    FieldDescriptor::scalar("Released"),
                    FieldDescriptor::not_mapped("CachedRating"),
                    FieldDescriptor::relationship(
                        "Actors",
                        Relationship::incoming("ACTED_IN"),
                        RelatedType::many::<Actor>(),
                    ),
                ],
            };
            &DESCRIPTOR
        }
        fn base(&self) -> &EntityBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut EntityBase {
            &mut self.base
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default, rename_all = "PascalCase")]
    struct Actor {
        #[serde(flatten)]
        base: EntityBase,
        name: String,
    }

    impl Entity for Actor {
        fn descriptor() -> &'static EntityDescriptor {
            static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
                label: "Actor",
                fields: &[FieldDescriptor::scalar("Name")],
            };
            &DESCRIPTOR
        }
        fn base(&self) -> &EntityBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut EntityBase {
            &mut self.base
        }
    }

    #[test]
    fn test_identifier_formats() {
        let hyphenated = IdentifierFormat::Hyphenated.generate();
        assert_eq!(hyphenated.len(), 36);
        assert_eq!(hyphenated.chars().filter(|&c| c == '-').count(), 4);

        let simple = IdentifierFormat::from_strip_hyphens(true).generate();
        assert_eq!(simple.len(), 32);
        assert!(simple.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identifiers_are_fresh() {
        let a = IdentifierFormat::default().generate();
        let b = IdentifierFormat::default().generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_to_properties_follows_field_order() {
        let movie = Movie {
            title: "Heat".to_string(),
            released: 1995,
            cached_rating: 8.3,
            ..Default::default()
        };
        let fields = Movie::descriptor().settable_fields();
        let props = to_properties(&movie, &fields).unwrap();

        let keys: Vec<_> = props.keys().cloned().collect();
        assert_eq!(keys, vec!["Title", "Released", "IsDeleted", "UpdatedAt"]);
        assert_eq!(props["Title"], json!("Heat"));
        assert_eq!(props["UpdatedAt"], Value::Null);
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default, rename_all = "PascalCase")]
    struct Account {
        #[serde(flatten)]
        base: EntityBase,
        email: String,
    }

    impl Entity for Account {
        fn descriptor() -> &'static EntityDescriptor {
            static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
                label: "Account",
                fields: &[FieldDescriptor::scalar("Emial")],
            };
            &DESCRIPTOR
        }
        fn base(&self) -> &EntityBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut EntityBase {
            &mut self.base
        }
    }

    #[test]
    fn test_to_properties_rejects_unserialized_field() {
        let account = Account {
            email: "a@example.com".to_string(),
            ..Default::default()
        };
        let fields = Account::descriptor().settable_fields();
        match to_properties(&account, &fields) {
            Err(OgmError::Config(message)) => {
                assert!(message.contains("Account"));
                assert!(message.contains("Emial"));
            }
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn test_map_row_with_related_nodes() {
        let mut props = PropertyMap::new();
        props.insert("Uuid".into(), json!("m-1"));
        props.insert("IsDeleted".into(), json!(false));
        props.insert("Title".into(), json!("Heat"));
        props.insert("Released".into(), json!(1995));
        props.insert(
            "Actors".into(),
            json!([{ "Uuid": "a-1", "IsDeleted": false, "Name": "Al Pacino" }]),
        );

        let movie: Movie = map_row(props).unwrap();
        assert_eq!(movie.uuid(), "m-1");
        assert_eq!(movie.released, 1995);
        assert_eq!(movie.actors.len(), 1);
        assert_eq!(movie.actors[0].name, "Al Pacino");
        assert_eq!(movie.base.updated_at, None);
    }

    #[test]
    fn test_map_row_type_mismatch_is_mapping_error() {
        let mut props = PropertyMap::new();
        props.insert("Released".into(), json!("not a year"));
        let err = map_row::<Movie>(props).unwrap_err();
        assert!(matches!(err, OgmError::Mapping(_)));
    }
}
