#![allow(dead_code)]

use cypher_ogm::embedded::EmbeddedConnector;
use cypher_ogm::{
    ClientSettings, Entity, EntityBase, EntityDescriptor, FieldDescriptor, OgmClient, RelatedType,
    Relationship,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct User {
    #[serde(flatten)]
    pub base: EntityBase,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub age: Option<i64>,
    #[serde(skip)]
    pub full_name: String,
    pub posts: Vec<Post>,
    pub best_friend: Option<Box<User>>,
}

impl Entity for User {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
            label: "User",
            fields: &[
                FieldDescriptor::scalar("FirstName"),
                FieldDescriptor::scalar("LastName"),
                FieldDescriptor::scalar("Email"),
                FieldDescriptor::scalar("Age"),
                FieldDescriptor::not_mapped("FullName"),
                FieldDescriptor::relationship(
                    "Posts",
                    Relationship::outgoing("WROTE"),
                    RelatedType::many::<Post>(),
                ),
                FieldDescriptor::relationship(
                    "BestFriend",
                    Relationship::outgoing("BEST_FRIEND"),
                    RelatedType::one::<User>(),
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
pub struct Post {
    #[serde(flatten)]
    pub base: EntityBase,
    pub title: String,
    pub body: String,
    pub author: Option<Box<User>>,
}

impl Entity for Post {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
            label: "Post",
            fields: &[
                FieldDescriptor::scalar("Title"),
                FieldDescriptor::scalar("Body"),
                FieldDescriptor::relationship(
                    "Author",
                    Relationship::incoming("WROTE"),
                    RelatedType::one::<User>(),
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

pub fn user(first: &str, last: &str, email: &str) -> User {
    User {
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: email.to_string(),
        ..Default::default()
    }
}

pub fn post(title: &str) -> Post {
    Post {
        title: title.to_string(),
        body: format!("{} body", title),
        ..Default::default()
    }
}

pub fn embedded_uri(temp_dir: &TempDir) -> String {
    format!("embedded://{}", temp_dir.path().join("graph.db").display())
}

/// A client connected to a fresh embedded graph. Keep the `TempDir` alive
/// for as long as the client is used.
pub fn connected_client() -> (TempDir, OgmClient) {
    let temp_dir = TempDir::new().unwrap();
    let mut client = OgmClient::new(
        ClientSettings::new(embedded_uri(&temp_dir)),
        Arc::new(EmbeddedConnector::new()),
    );
    client.connect().unwrap();
    (temp_dir, client)
}
