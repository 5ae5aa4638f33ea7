use crate::attribute::Attribute;
use crate::content::Dfa;
use crate::entity::EntityTable;
use crate::{DeclarationError, ModelWarning};
use codemap::CodeMap;
use pullxml_syntax::types::{AttType, DefaultDecl, ExternalId};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone)]
pub enum ContentModel {
    Empty,
    Any,
    /// `(#PCDATA | a | b)*`, holding the permitted child element names
    Mixed(HashSet<String>),
    /// element content, matched by the compiled automaton
    Children(Dfa),
}

#[derive(Debug, Clone)]
pub struct ElementType {
    pub name: String,
    pub span: codemap::Span,
    pub content: ContentModel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    pub att_type: AttType,
    /// the default as declared, with any value already normalised
    pub default: DefaultDecl,
    pub span: codemap::Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notation {
    pub name: String,
    pub id: ExternalId,
    pub span: codemap::Span,
}

/// The declarations of a document type
pub struct Dtd {
    pub name: String,
    pub external_id: Option<ExternalId>,
    pub(crate) elements: HashMap<String, ElementType>,
    pub(crate) attlists: HashMap<String, Vec<AttributeDef>>,
    pub(crate) notations: HashMap<String, Notation>,
    pub(crate) entities: EntityTable,
    pub(crate) codemap: CodeMap,
    pub(crate) declaration_errors: Vec<DeclarationError>,
    pub(crate) warnings: Vec<ModelWarning>,
    pub(crate) has_external_parts: bool,
}

impl fmt::Debug for Dtd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dtd")
            .field("name", &self.name)
            .field("external_id", &self.external_id)
            .field("elements", &self.elements.len())
            .field("attlists", &self.attlists.len())
            .field("notations", &self.notations.len())
            .finish()
    }
}

impl Dtd {
    pub(crate) fn new(name: &str, external_id: Option<ExternalId>) -> Dtd {
        Dtd {
            name: name.to_string(),
            has_external_parts: external_id.is_some(),
            external_id,
            elements: HashMap::new(),
            attlists: HashMap::new(),
            notations: HashMap::new(),
            entities: EntityTable::new(),
            codemap: CodeMap::new(),
            declaration_errors: vec![],
            warnings: vec![],
        }
    }

    pub fn element(&self, name: &str) -> Option<&ElementType> {
        self.elements.get(name)
    }

    /// Attribute declarations for the given element, in declaration order
    pub fn attributes(&self, element: &str) -> &[AttributeDef] {
        self.attlists.get(element).map_or(&[], Vec::as_slice)
    }

    pub fn attribute(&self, element: &str, name: &str) -> Option<&AttributeDef> {
        self.attributes(element).iter().find(|a| a.name == name)
    }

    pub fn notation(&self, name: &str) -> Option<&Notation> {
        self.notations.get(name)
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    /// True when the element is declared with element content, so that white space between
    /// its children is not significant
    pub fn has_element_content(&self, name: &str) -> bool {
        matches!(
            self.element(name).map(|e| &e.content),
            Some(ContentModel::Children(_))
        )
    }

    /// Problems found in the declarations themselves, which make any document using this DTD
    /// invalid
    pub fn declaration_errors(&self) -> &[DeclarationError] {
        &self.declaration_errors
    }

    pub fn warnings(&self) -> &[ModelWarning] {
        &self.warnings
    }

    /// The document type refers to an external subset or to parameter entities, so that
    /// declarations may be missing if those could not be read
    pub fn has_external_parts(&self) -> bool {
        self.has_external_parts
    }

    /// Adds the attributes which have a default value in the DTD but are missing from the given
    /// list, marking them as not specified
    pub fn apply_defaults(&self, element: &str, attributes: &mut Vec<Attribute>) {
        for def in self.attributes(element) {
            if let Some(value) = def.default.value() {
                if !attributes.iter().any(|a| a.name == def.name) {
                    attributes.push(Attribute {
                        name: def.name.clone(),
                        value: value.to_string(),
                        specified: false,
                    });
                }
            }
        }
    }

    pub fn dump_diagnostic(&self, diagnostic: codemap_diagnostic::Diagnostic) {
        let mut emitter = codemap_diagnostic::Emitter::stderr(
            codemap_diagnostic::ColorConfig::Always,
            Some(&self.codemap),
        );
        emitter.emit(&[diagnostic]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use crate::DtdBuilder;

    fn dtd(subset: &str) -> Dtd {
        let resolver = Resolver::default();
        let mut builder = DtdBuilder::new("doc", None, &resolver);
        builder.internal_subset(subset, "internal").unwrap();
        builder.finish()
    }

    #[test]
    fn defaults_applied() {
        let dtd = dtd(r#"<!ATTLIST doc
              fixed CDATA #FIXED "X"
              dflt (a|b) "a"
              opt CDATA #IMPLIED
              req CDATA #REQUIRED>"#);
        let mut attrs = vec![Attribute::new("dflt", "b")];
        dtd.apply_defaults("doc", &mut attrs);
        assert_eq!(
            attrs,
            vec![
                Attribute::new("dflt", "b"),
                Attribute {
                    name: "fixed".to_string(),
                    value: "X".to_string(),
                    specified: false,
                },
            ]
        );
        let mut attrs = vec![];
        dtd.apply_defaults("other", &mut attrs);
        assert!(attrs.is_empty());
    }

    #[test]
    fn element_content() {
        let dtd = dtd("<!ELEMENT doc (a*)> <!ELEMENT a (#PCDATA)> <!ELEMENT b ANY>");
        assert!(dtd.has_element_content("doc"));
        assert!(!dtd.has_element_content("a"));
        assert!(matches!(dtd.element("b").unwrap().content, ContentModel::Any));
        assert!(dtd.element("c").is_none());
    }
}
