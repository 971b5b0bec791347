use std::fmt;

use crate::error::StagewiseError;

/// Longest identifier accepted for interpolation into a statement.
const MAX_IDENT_LEN: usize = 128;

/// A table or column name that is safe to interpolate into SQL text.
///
/// Values always travel as bound parameters. Names cannot, so every name
/// that ends up inside a statement goes through an `Ident`. A syntactically
/// valid `Ident` is not proof the object exists: use the `checked_*`
/// constructors on [`SchemaProbe`](crate::probe::SchemaProbe) to obtain
/// identifiers that were verified against the live schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn parse(name: &str) -> Result<Self, StagewiseError> {
        if Self::is_valid(name) {
            Ok(Ident(name.to_string()))
        } else {
            Err(StagewiseError::InvalidIdentifier(name.to_string()))
        }
    }

    /// ASCII letters, digits and underscores, not starting with a digit.
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        name.len() <= MAX_IDENT_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Renders the quoted form, ready for interpolation.
impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["product_product", "_tmp", "a1", "openupgrade_legacy_8_0_valuation"] {
            assert!(Ident::parse(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for name in ["", "1abc", "drop table", "x;--", "name\"", "tab\tle", "é"] {
            assert!(
                matches!(Ident::parse(name), Err(StagewiseError::InvalidIdentifier(_))),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_display_quotes() {
        let ident = Ident::parse("stock_move").unwrap();
        assert_eq!(ident.to_string(), "\"stock_move\"");
        assert_eq!(ident.as_str(), "stock_move");
    }

    proptest! {
        #[test]
        fn prop_valid_identifiers_never_contain_quotes(name in "\\PC{0,40}") {
            if let Ok(ident) = Ident::parse(&name) {
                prop_assert!(!ident.as_str().contains('"'));
                prop_assert!(!ident.as_str().contains(' '));
                prop_assert!(!ident.as_str().contains(';'));
            }
        }

        #[test]
        fn prop_snake_case_names_accepted(name in "[a-z_][a-z0-9_]{0,40}") {
            prop_assert!(Ident::parse(&name).is_ok());
        }
    }
}
