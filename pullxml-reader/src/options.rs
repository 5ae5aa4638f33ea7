use pullxml_model::entity::{MAX_ENTITY_DEPTH, MAX_EXPANSION};

/// Parser behaviour, set with builder-style methods:
///
/// ```
/// use pullxml_reader::ReaderOptions;
/// let options = ReaderOptions::default().validate(true).max_entity_depth(8);
/// assert!(options.loads_external_dtd());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    pub(crate) substitute_entities: bool,
    pub(crate) default_attributes: bool,
    pub(crate) validate: bool,
    pub(crate) load_external_dtd: bool,
    pub(crate) max_entity_depth: usize,
    pub(crate) max_expansion: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            substitute_entities: false,
            default_attributes: false,
            validate: false,
            load_external_dtd: false,
            max_entity_depth: MAX_ENTITY_DEPTH,
            max_expansion: MAX_EXPANSION,
        }
    }
}

impl ReaderOptions {
    /// Attribute defaulting, entity substitution and validation together
    pub fn reference() -> ReaderOptions {
        ReaderOptions::default()
            .default_attributes(true)
            .substitute_entities(true)
            .validate(true)
    }

    /// Replace references to parsed entities by their content rather than reporting
    /// `EntityReference` nodes
    pub fn substitute_entities(mut self, on: bool) -> Self {
        self.substitute_entities = on;
        self
    }

    pub fn default_attributes(mut self, on: bool) -> Self {
        self.default_attributes = on;
        self
    }

    pub fn validate(mut self, on: bool) -> Self {
        self.validate = on;
        self
    }

    pub fn load_external_dtd(mut self, on: bool) -> Self {
        self.load_external_dtd = on;
        self
    }

    pub fn max_entity_depth(mut self, depth: usize) -> Self {
        self.max_entity_depth = depth;
        self
    }

    /// Limit on the total number of characters produced by entity expansion
    pub fn max_expansion(mut self, chars: usize) -> Self {
        self.max_expansion = chars;
        self
    }

    pub fn is_substituting_entities(&self) -> bool {
        self.substitute_entities
    }

    pub fn is_defaulting_attributes(&self) -> bool {
        self.default_attributes
    }

    pub fn is_validating(&self) -> bool {
        self.validate
    }

    /// Both attribute defaulting and validation need the declarations of the external subset
    pub fn loads_external_dtd(&self) -> bool {
        self.load_external_dtd || self.default_attributes || self.validate
    }

    /// External parsed entities are read when their content is substituted or validated
    pub fn loads_external_entities(&self) -> bool {
        self.substitute_entities || self.validate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_bundle() {
        let options = ReaderOptions::reference();
        assert!(options.is_substituting_entities());
        assert!(options.is_defaulting_attributes());
        assert!(options.is_validating());
        assert!(options.loads_external_dtd());
        assert_eq!(options.max_entity_depth, MAX_ENTITY_DEPTH);
    }

    #[test]
    fn external_dtd_implied() {
        assert!(!ReaderOptions::default().loads_external_dtd());
        assert!(ReaderOptions::default().default_attributes(true).loads_external_dtd());
        assert!(ReaderOptions::default().load_external_dtd(true).loads_external_dtd());
        assert!(!ReaderOptions::default().substitute_entities(true).loads_external_dtd());
    }
}
