//! Attribute values: normalisation and the lexical constraints of the declared types

use crate::entity::{EntityTable, EntityValue, ExpansionError, ExpansionGuard};
use pullxml_syntax::types::AttType;
use pullxml_syntax::{char_ref_value, is_name, is_nmtoken, predefined_entity};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    /// false when the attribute was supplied from a default in the DTD
    pub specified: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Attribute {
        Attribute {
            name: name.into(),
            value: value.into(),
            specified: true,
        }
    }

    /// `xmlns` or `xmlns:*`
    pub fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.name.starts_with("xmlns:")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValueError {
    Expansion(ExpansionError),
    UndeclaredEntity(String),
    /// attribute values may not reference external entities
    ExternalEntity(String),
    UnparsedEntity(String),
    /// replacement text of an entity referenced from an attribute value contains `<`
    LtInReplacement(String),
    InvalidReference(String),
}

impl From<ExpansionError> for AttributeValueError {
    fn from(e: ExpansionError) -> Self {
        AttributeValueError::Expansion(e)
    }
}

impl fmt::Display for AttributeValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValueError::Expansion(e) => write!(f, "{}", e),
            AttributeValueError::UndeclaredEntity(name) => write!(f, "entity {} is not declared", name),
            AttributeValueError::ExternalEntity(name) => {
                write!(f, "attribute value references external entity {}", name)
            }
            AttributeValueError::UnparsedEntity(name) => {
                write!(f, "attribute value references unparsed entity {}", name)
            }
            AttributeValueError::LtInReplacement(name) => {
                write!(f, "replacement text of entity {} contains '<'", name)
            }
            AttributeValueError::InvalidReference(r) => write!(f, "malformed reference {:?}", r),
        }
    }
}

impl std::error::Error for AttributeValueError {}

/// Normalises an attribute value as written (with references unexpanded).
///
/// References are replaced and white space characters become spaces; when `tokenized` is set
/// (the attribute is declared with a type other than CDATA) runs of spaces are then collapsed
/// and leading and trailing spaces removed.
pub fn normalize_value(
    raw: &str,
    tokenized: bool,
    entities: &EntityTable,
    guard: &mut ExpansionGuard,
) -> Result<String, AttributeValueError> {
    let mut out = String::with_capacity(raw.len());
    append_normalized(raw, entities, guard, &mut out)?;
    if tokenized {
        Ok(collapse(&out))
    } else {
        Ok(out)
    }
}

pub fn collapse(value: &str) -> String {
    value
        .split(' ')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn append_normalized(
    text: &str,
    entities: &EntityTable,
    guard: &mut ExpansionGuard,
    out: &mut String,
) -> Result<(), AttributeValueError> {
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if c != '&' {
            out.push(if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c });
            rest = &rest[c.len_utf8()..];
            continue;
        }
        let end = rest
            .find(';')
            .ok_or_else(|| AttributeValueError::InvalidReference(rest.to_string()))?;
        let reference = &rest[1..end];
        rest = &rest[end + 1..];
        if let Some(body) = reference.strip_prefix('#') {
            // character references are not subject to white space normalisation
            let c = char_ref_value(body)
                .ok_or_else(|| AttributeValueError::InvalidReference(reference.to_string()))?;
            out.push(c);
        } else if let Some(c) = predefined_entity(reference) {
            out.push(c);
        } else {
            let entity = entities
                .general(reference)
                .ok_or_else(|| AttributeValueError::UndeclaredEntity(reference.to_string()))?;
            match &entity.value {
                EntityValue::Internal(replacement) => {
                    if replacement.contains('<') {
                        return Err(AttributeValueError::LtInReplacement(reference.to_string()));
                    }
                    guard.enter(reference)?;
                    guard.account(replacement.len())?;
                    append_normalized(replacement, entities, guard, out)?;
                    guard.leave();
                }
                EntityValue::External { ndata: Some(_), .. } => {
                    return Err(AttributeValueError::UnparsedEntity(reference.to_string()))
                }
                EntityValue::External { .. } => {
                    return Err(AttributeValueError::ExternalEntity(reference.to_string()))
                }
            }
        }
    }
    Ok(())
}

/// Checks the normalised value against the lexical form required by the declared type.  Other
/// constraints (enumeration membership, references to IDs, entities and notations) are applied
/// during validation.
pub fn is_lexically_valid(att_type: &AttType, value: &str) -> bool {
    match att_type {
        AttType::CData => true,
        AttType::Id | AttType::IdRef | AttType::Entity => is_name(value),
        AttType::IdRefs | AttType::Entities => {
            !value.is_empty() && value.split(' ').all(is_name)
        }
        AttType::NmToken => is_nmtoken(value),
        AttType::NmTokens => !value.is_empty() && value.split(' ').all(is_nmtoken),
        AttType::Notation(names) | AttType::Enumeration(names) => names.iter().any(|n| n == value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use assert_matches::assert_matches;

    fn table() -> EntityTable {
        let mut table = EntityTable::new();
        for (name, text) in &[("sp", "a\tb"), ("nested", "[&sp;]"), ("loop", "&loop;"), ("lt2", "<")] {
            table.declare(
                Entity {
                    name: name.to_string(),
                    value: EntityValue::Internal(text.to_string()),
                    span: None,
                    externally_declared: false,
                },
                false,
            );
        }
        table
    }

    fn normalize(raw: &str, tokenized: bool) -> Result<String, AttributeValueError> {
        normalize_value(raw, tokenized, &table(), &mut ExpansionGuard::default())
    }

    #[test]
    fn whitespace() {
        assert_eq!(normalize(" a\n\tb ", false).unwrap(), " a  b ");
        assert_eq!(normalize(" a\n\tb ", true).unwrap(), "a b");
        assert_eq!(normalize("a&#10;b", false).unwrap(), "a\nb");
    }

    #[test]
    fn references() {
        assert_eq!(normalize("&lt;&amp;&#x41;", false).unwrap(), "<&A");
        assert_eq!(normalize("x&nested;y", false).unwrap(), "x[a b]y");
        assert_matches!(normalize("&loop;", false), Err(AttributeValueError::Expansion(ExpansionError::Recursive(_))));
        assert_matches!(normalize("&nope;", false), Err(AttributeValueError::UndeclaredEntity(n)) if n == "nope");
        assert_matches!(normalize("&lt2;", false), Err(AttributeValueError::LtInReplacement(_)));
    }

    #[test]
    fn lexical_forms() {
        assert!(is_lexically_valid(&AttType::Id, "a1"));
        assert!(!is_lexically_valid(&AttType::Id, "1a"));
        assert!(is_lexically_valid(&AttType::IdRefs, "a b c"));
        assert!(!is_lexically_valid(&AttType::IdRefs, ""));
        assert!(is_lexically_valid(&AttType::NmTokens, "1 2"));
        assert!(is_lexically_valid(
            &AttType::Enumeration(vec!["x".to_string(), "y".to_string()]),
            "y"
        ));
        assert!(!is_lexically_valid(&AttType::Enumeration(vec!["x".to_string()]), "z"));
    }
}
