//! Named statement templates with `@placeholder` slots.

use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::{OgmError, Result};

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid regex pattern")
    })
}

/// The statement catalogue, one entry per operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Create,
    Merge,
    GetAll,
    GetByProperty,
    GetByProperties,
    Update,
    Delete,
    Drop,
    DropByProperties,
    CreateRelationship,
    MergeRelationship,
    DropRelationship,
    AddLabel,
}

impl Template {
    pub fn text(self) -> &'static str {
        match self {
            Template::Create => "CREATE (n:@label{@conditions}) RETURN n",
            Template::Merge => {
                "MERGE (n:@label{@conditions}) @on_create_clause @on_match_clause RETURN n"
            }
            Template::GetAll => "MATCH (n:@label{IsDeleted:false}) RETURN @result",
            Template::GetByProperty => {
                "MATCH (n:@label{@property:$value,IsDeleted:false})@relationship@relatedNode RETURN @result"
            }
            Template::GetByProperties => {
                "MATCH (n:@label{@clause,IsDeleted:false})@relationship@relatedNode RETURN @result"
            }
            Template::Update => "MATCH (n:@label{Uuid:$Uuid,IsDeleted:false}) SET @clause @return",
            Template::Delete => {
                "MATCH (n:@label{Uuid:$Uuid,IsDeleted:false}) SET n.UpdatedAt=$UpdatedAt,n.IsDeleted=true RETURN n"
            }
            Template::Drop => "MATCH (n:@label{Uuid:$Uuid}) DETACH DELETE n",
            Template::DropByProperties => "MATCH (n:@label{@clause}) DETACH DELETE n",
            Template::CreateRelationship => {
                "MATCH (from{Uuid:$uuidFrom}),(to{Uuid:$uuidTo}) CREATE (from)@fromPartDirection[r:@relationshipName@clause]@toPartDirection(to) RETURN r"
            }
            Template::MergeRelationship => {
                "MATCH (from{Uuid:$uuidFrom}),(to{Uuid:$uuidTo}) MERGE (from)@fromPartDirection[r:@relationshipName]@toPartDirection(to) RETURN r"
            }
            Template::DropRelationship => {
                "MATCH ({Uuid:$uuidIncoming})@fromPartDirection[r:@relationshipName]@toPartDirection({Uuid:$uuidOutgoing}) DELETE r"
            }
            Template::AddLabel => "MATCH (n{Uuid:$Uuid}) SET n:@label",
        }
    }

    /// Placeholder names the template expects, without the `@`.
    pub fn placeholders(self) -> BTreeSet<&'static str> {
        placeholder_regex()
            .captures_iter(self.text())
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Fills every placeholder from `substitutions`.
    ///
    /// Substitution is a single pass over the template text, so substituted
    /// fragments are never rescanned. Supplying a placeholder the template
    /// does not have, or omitting one it does, is an error.
    pub fn render(self, substitutions: &Substitutions) -> Result<String> {
        let expected = self.placeholders();

        if let Some(missing) = expected
            .iter()
            .find(|name| !substitutions.values.contains_key(**name))
        {
            return Err(OgmError::Template(format!(
                "{:?} template is missing @{}",
                self, missing
            )));
        }

        if let Some(unknown) = substitutions
            .values
            .keys()
            .find(|name| !expected.contains(name.as_str()))
        {
            return Err(OgmError::Template(format!(
                "{:?} template has no @{} placeholder",
                self, unknown
            )));
        }

        let rendered = placeholder_regex().replace_all(self.text(), |caps: &Captures| {
            substitutions
                .values
                .get(&caps[1])
                .cloned()
                .unwrap_or_default()
        });

        Ok(rendered.trim_end().to_string())
    }
}

/// Structural fragments keyed by placeholder name (without the `@`).
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, placeholder: &str, fragment: impl Into<String>) -> Self {
        self.values.insert(placeholder.to_string(), fragment.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_get_all() {
        let text = Template::GetAll
            .render(&Substitutions::new().with("label", "User").with("result", "n"))
            .unwrap();
        assert_eq!(text, "MATCH (n:User{IsDeleted:false}) RETURN n");
    }

    #[test]
    fn test_render_is_order_independent() {
        let a = Substitutions::new()
            .with("label", "User")
            .with("property", "Email")
            .with("relationship", "")
            .with("relatedNode", "")
            .with("result", "n");
        let b = Substitutions::new()
            .with("result", "n")
            .with("relatedNode", "")
            .with("relationship", "")
            .with("property", "Email")
            .with("label", "User");
        assert_eq!(
            Template::GetByProperty.render(&a).unwrap(),
            Template::GetByProperty.render(&b).unwrap()
        );
        assert_eq!(
            Template::GetByProperty.render(&a).unwrap(),
            "MATCH (n:User{Email:$value,IsDeleted:false}) RETURN n"
        );
    }

    #[test]
    fn test_adjacent_placeholders_do_not_collide() {
        let text = Template::GetByProperty
            .render(
                &Substitutions::new()
                    .with("label", "User")
                    .with("property", "Uuid")
                    .with("relationship", "-[r:WROTE]->")
                    .with("relatedNode", "(rNode:Post{IsDeleted:false})")
                    .with("result", "rNode"),
            )
            .unwrap();
        assert_eq!(
            text,
            "MATCH (n:User{Uuid:$value,IsDeleted:false})-[r:WROTE]->(rNode:Post{IsDeleted:false}) RETURN rNode"
        );
    }

    #[test]
    fn test_substituted_fragment_is_not_rescanned() {
        let text = Template::AddLabel
            .render(&Substitutions::new().with("label", "@label"))
            .unwrap();
        assert_eq!(text, "MATCH (n{Uuid:$Uuid}) SET n:@label");
    }

    #[test]
    fn test_missing_placeholder_is_error() {
        let err = Template::GetAll
            .render(&Substitutions::new().with("label", "User"))
            .unwrap_err();
        assert!(matches!(err, OgmError::Template(_)));
        assert!(err.to_string().contains("@result"));
    }

    #[test]
    fn test_unknown_placeholder_is_error() {
        let err = Template::Drop
            .render(&Substitutions::new().with("label", "User").with("Uuid", "x"))
            .unwrap_err();
        assert!(err.to_string().contains("@Uuid"));
    }

    #[test]
    fn test_update_without_return_has_no_trailing_space() {
        let text = Template::Update
            .render(
                &Substitutions::new()
                    .with("label", "User")
                    .with("clause", "n.Email=$Email")
                    .with("return", ""),
            )
            .unwrap();
        assert_eq!(
            text,
            "MATCH (n:User{Uuid:$Uuid,IsDeleted:false}) SET n.Email=$Email"
        );
    }

    #[test]
    fn test_identifiers_are_never_placeholders() {
        for template in [
            Template::Update,
            Template::Delete,
            Template::Drop,
            Template::CreateRelationship,
            Template::MergeRelationship,
            Template::DropRelationship,
            Template::AddLabel,
        ] {
            let placeholders = template.placeholders();
            assert!(!placeholders.iter().any(|p| p.to_lowercase().contains("uuid")));
        }
    }
}
