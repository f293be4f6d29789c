//! Clause builders: property maps to clause text plus bound parameters.

use crate::driver::PropertyMap;
use crate::error::{OgmError, Result};

use super::is_identifier;

/// Clause text together with the parameters it references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clause {
    pub text: String,
    pub params: PropertyMap,
}

impl Clause {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// `{text}` for a non-empty clause, nothing otherwise.
    pub fn braced(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", self.text)
        }
    }
}

fn ensure_property_name(name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(OgmError::InvalidArgument(format!(
            "property name {:?} is not a valid identifier",
            name
        )))
    }
}

/// Renders each entry with `part(key, param)` and binds its value as `param`.
fn build_clause(
    properties: &PropertyMap,
    param_prefix: &str,
    part: impl Fn(&str, &str) -> String,
) -> Result<Clause> {
    let mut parts = Vec::with_capacity(properties.len());
    let mut params = PropertyMap::new();

    for (key, value) in properties {
        ensure_property_name(key)?;
        let param = format!("{}{}", param_prefix, key);
        parts.push(part(key, &param));
        params.insert(param, value.clone());
    }

    Ok(Clause {
        text: parts.join(","),
        params,
    })
}

/// Builds `k1:$k1,k2:$k2,...` for use inside a node or edge pattern.
///
/// Parameter names are the keys prefixed with `param_prefix`, which lets
/// several clauses share one statement without their parameters colliding.
pub fn condition_clause(properties: &PropertyMap, param_prefix: &str) -> Result<Clause> {
    build_clause(properties, param_prefix, |key, param| {
        format!("{}:${}", key, param)
    })
}

/// Builds `var.k1=$k1,var.k2=$k2,...` for a `SET` clause.
pub fn assignment_clause(
    properties: &PropertyMap,
    variable: &str,
    param_prefix: &str,
) -> Result<Clause> {
    build_clause(properties, param_prefix, |key, param| {
        format!("{}.{}=${}", variable, key, param)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn props(pairs: &[(&str, Value)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_condition_clause_empty() {
        let clause = condition_clause(&PropertyMap::new(), "").unwrap();
        assert!(clause.is_empty());
        assert!(clause.params.is_empty());
        assert_eq!(clause.braced(), "");
    }

    #[test]
    fn test_condition_clause_single_has_no_separator() {
        let clause = condition_clause(&props(&[("Email", json!("a@b.c"))]), "").unwrap();
        assert_eq!(clause.text, "Email:$Email");
        assert_eq!(clause.braced(), "{Email:$Email}");
    }

    #[test]
    fn test_separator_count_is_n_minus_one() {
        for n in 0usize..6 {
            let map: PropertyMap = (0..n).map(|i| (format!("k{}", i), json!(i))).collect();
            let condition = condition_clause(&map, "").unwrap();
            let assignment = assignment_clause(&map, "n", "").unwrap();
            let expected = n.saturating_sub(1);
            assert_eq!(condition.text.matches(',').count(), expected);
            assert_eq!(assignment.text.matches(',').count(), expected);
            assert!(!condition.text.starts_with(','));
            assert!(!condition.text.ends_with(','));
        }
    }

    #[test]
    fn test_condition_clause_follows_map_order() {
        let clause = condition_clause(
            &props(&[("LastName", json!("Kir")), ("FirstName", json!("Oktay"))]),
            "",
        )
        .unwrap();
        assert_eq!(clause.text, "LastName:$LastName,FirstName:$FirstName");
    }

    #[test]
    fn test_string_values_are_bound_unmodified() {
        let tricky = "O\"Brien' }) DETACH DELETE n //";
        let clause = condition_clause(&props(&[("LastName", json!(tricky))]), "").unwrap();
        assert!(!clause.text.contains("Brien"));
        assert_eq!(clause.params["LastName"], json!(tricky));
    }

    #[test]
    fn test_assignment_clause_with_prefixes() {
        let clause = assignment_clause(
            &props(&[("FirstName", json!("Oktay")), ("IsDeleted", json!(false))]),
            "n",
            "onMatch_",
        )
        .unwrap();
        assert_eq!(
            clause.text,
            "n.FirstName=$onMatch_FirstName,n.IsDeleted=$onMatch_IsDeleted"
        );
        assert_eq!(clause.params["onMatch_FirstName"], json!("Oktay"));
        assert!(!clause.params.contains_key("FirstName"));
    }

    #[test]
    fn test_invalid_property_name_is_argument_error() {
        let err = condition_clause(&props(&[("a}) DELETE n", json!(1))]), "").unwrap_err();
        assert!(matches!(err, OgmError::InvalidArgument(_)));
    }
}
