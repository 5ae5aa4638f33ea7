use pullxml_syntax::types::ExternalId;
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// Default limit on the nesting of entity references
pub const MAX_ENTITY_DEPTH: usize = 40;
/// Default limit on the total number of characters produced by entity expansion in one document
pub const MAX_EXPANSION: usize = 10_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    /// replacement text, with character and parameter-entity references already expanded
    Internal(String),
    External {
        id: ExternalId,
        /// location of the entity in which the declaration appeared, against which a relative
        /// system identifier is resolved
        base: Option<Url>,
        /// notation of an unparsed entity
        ndata: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub value: EntityValue,
    pub span: Option<codemap::Span>,
    /// declared in the external subset or an external parameter entity, rather than the
    /// internal subset
    pub externally_declared: bool,
}

impl Entity {
    pub fn is_external(&self) -> bool {
        matches!(self.value, EntityValue::External { .. })
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self.value, EntityValue::External { ndata: Some(_), .. })
    }
}

/// The general and parameter entities of a document
#[derive(Debug, Clone)]
pub struct EntityTable {
    general: HashMap<String, Entity>,
    parameter: HashMap<String, Entity>,
}

impl Default for EntityTable {
    fn default() -> Self {
        EntityTable::new()
    }
}

impl EntityTable {
    /// A table holding just the predefined entities
    pub fn new() -> EntityTable {
        let mut table = EntityTable {
            general: HashMap::new(),
            parameter: HashMap::new(),
        };
        for (name, text) in &[
            ("lt", "&#60;"),
            ("gt", ">"),
            ("amp", "&#38;"),
            ("apos", "'"),
            ("quot", "\""),
        ] {
            table.general.insert(
                name.to_string(),
                Entity {
                    name: name.to_string(),
                    value: EntityValue::Internal(text.to_string()),
                    span: None,
                    externally_declared: false,
                },
            );
        }
        table
    }

    /// Adds the declaration unless the name is already declared, in which case the first
    /// declaration is kept and `false` is returned
    pub fn declare(&mut self, entity: Entity, parameter: bool) -> bool {
        let map = if parameter {
            &mut self.parameter
        } else {
            &mut self.general
        };
        if map.contains_key(&entity.name) {
            return false;
        }
        map.insert(entity.name.clone(), entity);
        true
    }

    pub fn general(&self, name: &str) -> Option<&Entity> {
        self.general.get(name)
    }

    pub fn parameter(&self, name: &str) -> Option<&Entity> {
        self.parameter.get(name)
    }

    pub fn is_unparsed(&self, name: &str) -> bool {
        self.general(name).map_or(false, Entity::is_unparsed)
    }

    pub fn general_entities(&self) -> impl Iterator<Item = &Entity> {
        self.general.values()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpansionError {
    /// the entity is referenced from within its own replacement text
    Recursive(String),
    /// references nested more deeply than the configured limit
    TooDeep { name: String, limit: usize },
    /// more replacement text than the configured limit
    TooLarge { limit: usize },
}

impl fmt::Display for ExpansionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpansionError::Recursive(name) => write!(f, "entity {} references itself", name),
            ExpansionError::TooDeep { name, limit } => write!(
                f,
                "expanding entity {} exceeds the maximum entity nesting depth of {}",
                name, limit
            ),
            ExpansionError::TooLarge { limit } => write!(
                f,
                "entity expansion exceeds the limit of {} characters",
                limit
            ),
        }
    }
}

impl std::error::Error for ExpansionError {}

/// Tracks the entities currently being expanded, detecting reference loops and enforcing limits
/// on nesting and on the total amount of expanded text
#[derive(Debug, Clone)]
pub struct ExpansionGuard {
    stack: Vec<String>,
    max_depth: usize,
    max_expansion: usize,
    expanded: usize,
}

impl Default for ExpansionGuard {
    fn default() -> Self {
        ExpansionGuard::new(MAX_ENTITY_DEPTH, MAX_EXPANSION)
    }
}

impl ExpansionGuard {
    pub fn new(max_depth: usize, max_expansion: usize) -> ExpansionGuard {
        ExpansionGuard {
            stack: vec![],
            max_depth,
            max_expansion,
            expanded: 0,
        }
    }

    pub fn enter(&mut self, name: &str) -> Result<(), ExpansionError> {
        if self.stack.iter().any(|n| n == name) {
            return Err(ExpansionError::Recursive(name.to_string()));
        }
        if self.stack.len() >= self.max_depth {
            return Err(ExpansionError::TooDeep {
                name: name.to_string(),
                limit: self.max_depth,
            });
        }
        self.stack.push(name.to_string());
        Ok(())
    }

    pub fn leave(&mut self) {
        self.stack.pop();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Records `len` further characters of replacement text
    pub fn account(&mut self, len: usize) -> Result<(), ExpansionError> {
        self.expanded += len;
        if self.expanded > self.max_expansion {
            Err(ExpansionError::TooLarge {
                limit: self.max_expansion,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn internal(name: &str, text: &str) -> Entity {
        Entity {
            name: name.to_string(),
            value: EntityValue::Internal(text.to_string()),
            span: None,
            externally_declared: false,
        }
    }

    #[test]
    fn first_declaration_wins() {
        let mut table = EntityTable::new();
        assert!(table.declare(internal("e", "one"), false));
        assert!(!table.declare(internal("e", "two"), false));
        assert_matches!(&table.general("e").unwrap().value, EntityValue::Internal(t) if t == "one");
        // parameter entities are a separate namespace
        assert!(table.declare(internal("e", "pe"), true));
        assert!(!table.declare(internal("lt", "<"), false));
    }

    #[test]
    fn guard_limits() {
        let mut guard = ExpansionGuard::new(2, 10);
        guard.enter("a").unwrap();
        assert_matches!(guard.enter("a"), Err(ExpansionError::Recursive(n)) if n == "a");
        guard.enter("b").unwrap();
        assert_matches!(guard.enter("c"), Err(ExpansionError::TooDeep { limit: 2, .. }));
        guard.leave();
        assert_eq!(guard.depth(), 1);
        guard.account(10).unwrap();
        assert_matches!(guard.account(1), Err(ExpansionError::TooLarge { limit: 10 }));
    }
}
