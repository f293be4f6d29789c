//! Statement text composition: the template catalogue and clause builders.
//!
//! Only structural fragments (labels, clause skeletons, arrows) are placed
//! into statement text. Values always travel as bound parameters.

mod clause;
mod template;

pub use clause::{assignment_clause, condition_clause, Clause};
pub use template::{Substitutions, Template};

use regex::Regex;
use std::sync::OnceLock;

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex pattern")
    })
}

/// True when `name` can be written into statement text as a label,
/// property key or relationship type without quoting.
pub fn is_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("User"));
        assert!(is_identifier("first_name"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("Email}) DETACH DELETE n //"));
        assert!(!is_identifier("has space"));
        assert!(!is_identifier("Uuid:$x"));
    }
}
