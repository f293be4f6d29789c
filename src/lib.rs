#[cfg(feature = "bolt")]
pub mod bolt;
pub mod client;
pub mod config;
pub mod driver;
pub mod embedded;
pub mod entity;
pub mod error;
pub mod query;

pub use client::{ClientSettings, OgmClient, Transaction};
pub use config::Config;
pub use entity::{
    Cardinality, Direction, Entity, EntityBase, EntityDescriptor, FieldDescriptor, RelatedType,
    Relationship,
};
pub use error::{DriverError, OgmError, Result};
