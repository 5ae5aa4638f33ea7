//! Checks a stream of elements, attributes and character data against a document type.
//!
//! The validator is driven by the caller, which reports each event in document order.  Errors
//! never stop the stream; they are collected and make the final verdict `Invalid`.

use pullxml_model::attribute::{is_lexically_valid, Attribute};
use pullxml_model::content::StateId;
use pullxml_model::{ContentModel, DeclarationErrorKind, Dtd};
use pullxml_syntax::types::{AttType, DefaultDecl};
use pullxml_syntax::{is_whitespace_str, Position};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// no errors so far, but the document has not been completely read
    Unknown,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Document(Position),
    /// a declaration in the DTD, within the DTD's codemap
    Declaration(codemap::Span),
    /// the end of the document
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidityErrorKind {
    NoDtd,
    /// part of the DTD could not be read
    IncompleteDtd(String),
    Declaration(DeclarationErrorKind),
    RootMismatch {
        expected: String,
        found: String,
    },
    UndeclaredElement(String),
    ElementNotAllowed {
        parent: String,
        child: String,
        expected: Vec<String>,
    },
    /// an element declared EMPTY has content
    NotEmpty(String),
    TextNotAllowed(String),
    Incomplete {
        element: String,
        expected: Vec<String>,
    },
    UndeclaredAttribute {
        element: String,
        attribute: String,
    },
    MissingAttribute {
        element: String,
        attribute: String,
    },
    FixedMismatch {
        element: String,
        attribute: String,
        expected: String,
        found: String,
    },
    InvalidAttributeValue {
        element: String,
        attribute: String,
        value: String,
    },
    NotUnparsedEntity {
        attribute: String,
        name: String,
    },
    DuplicateId(String),
    UnresolvedIdRef(String),
    UndeclaredEntity(String),
}

impl fmt::Display for ValidityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidityErrorKind::NoDtd => f.write_str("no DTD found"),
            ValidityErrorKind::IncompleteDtd(reason) => write!(f, "{}", reason),
            ValidityErrorKind::Declaration(kind) => write!(f, "{}", kind),
            ValidityErrorKind::RootMismatch { expected, found } => write!(
                f,
                "root element {} does not match the document type name {}",
                found, expected
            ),
            ValidityErrorKind::UndeclaredElement(name) => write!(f, "no declaration for element {}", name),
            ValidityErrorKind::ElementNotAllowed { parent, child, .. } => {
                write!(f, "element {} is not allowed here in {}", child, parent)
            }
            ValidityErrorKind::NotEmpty(name) => {
                write!(f, "element {} was declared EMPTY but has content", name)
            }
            ValidityErrorKind::TextNotAllowed(name) => {
                write!(f, "element {} was declared with element content but contains text", name)
            }
            ValidityErrorKind::Incomplete { element, expected } => write!(
                f,
                "content of element {} is incomplete, expected {}",
                element,
                expected.join(" | ")
            ),
            ValidityErrorKind::UndeclaredAttribute { element, attribute } => {
                write!(f, "no declaration for attribute {} of element {}", attribute, element)
            }
            ValidityErrorKind::MissingAttribute { element, attribute } => {
                write!(f, "element {} does not carry required attribute {}", element, attribute)
            }
            ValidityErrorKind::FixedMismatch {
                element,
                attribute,
                expected,
                found,
            } => write!(
                f,
                "value {:?} of attribute {} of {} is not the #FIXED value {:?}",
                found, attribute, element, expected
            ),
            ValidityErrorKind::InvalidAttributeValue {
                element,
                attribute,
                value,
            } => write!(
                f,
                "value {:?} of attribute {} of {} does not match its declared type",
                value, attribute, element
            ),
            ValidityErrorKind::NotUnparsedEntity { attribute, name } => write!(
                f,
                "attribute {} refers to {}, which is not an unparsed entity",
                attribute, name
            ),
            ValidityErrorKind::DuplicateId(id) => write!(f, "ID {} is already defined", id),
            ValidityErrorKind::UnresolvedIdRef(id) => write!(f, "IDREF {} has no matching ID", id),
            ValidityErrorKind::UndeclaredEntity(name) => write!(f, "entity {} is not declared", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidityError {
    pub kind: ValidityErrorKind,
    pub location: Location,
}

impl fmt::Display for ValidityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Location::Document(pos) => write!(f, "{}: {}", pos, self.kind),
            _ => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ValidityError {}

#[derive(Clone, Copy)]
enum Frame {
    /// the element is undeclared, or its content has already been found not to match
    Unchecked,
    Empty,
    Any,
    Mixed,
    Children(StateId),
}

struct OpenElement {
    name: String,
    frame: Frame,
}

pub struct Validator {
    dtd: Option<Rc<Dtd>>,
    stack: Vec<OpenElement>,
    ids: HashSet<String>,
    idrefs: Vec<(String, Position)>,
    errors: Vec<ValidityError>,
    seen_root: bool,
    finished: bool,
}

impl Validator {
    /// Starts validation against the given DTD.  Without a DTD the document can only be
    /// invalid.
    pub fn new(dtd: Option<Rc<Dtd>>) -> Validator {
        let mut validator = Validator {
            dtd,
            stack: vec![],
            ids: HashSet::new(),
            idrefs: vec![],
            errors: vec![],
            seen_root: false,
            finished: false,
        };
        match validator.dtd.clone() {
            Some(dtd) => {
                for e in dtd.declaration_errors() {
                    validator.record(ValidityErrorKind::Declaration(e.kind.clone()), Location::Declaration(e.span));
                }
                for w in dtd.warnings() {
                    validator.record(ValidityErrorKind::IncompleteDtd(w.to_string()), Location::End);
                }
            }
            None => validator.record(ValidityErrorKind::NoDtd, Location::End),
        }
        validator
    }

    pub fn dtd(&self) -> Option<&Rc<Dtd>> {
        self.dtd.as_ref()
    }

    pub fn record(&mut self, kind: ValidityErrorKind, location: Location) {
        let error = ValidityError { kind, location };
        debug!("validity error: {}", error);
        self.errors.push(error);
    }

    fn error_at(&mut self, kind: ValidityErrorKind, position: Position) {
        self.record(kind, Location::Document(position));
    }

    pub fn observe_start_element(&mut self, name: &str, attributes: &[Attribute], position: Position) {
        let dtd = match &self.dtd {
            Some(dtd) => dtd.clone(),
            None => return,
        };
        if self.stack.is_empty() && !self.seen_root {
            self.seen_root = true;
            if dtd.name != name {
                self.error_at(
                    ValidityErrorKind::RootMismatch {
                        expected: dtd.name.clone(),
                        found: name.to_string(),
                    },
                    position,
                );
            }
        }
        self.child(&dtd, name, position);

        let frame = match dtd.element(name) {
            None => {
                self.error_at(ValidityErrorKind::UndeclaredElement(name.to_string()), position);
                Frame::Unchecked
            }
            Some(decl) => match &decl.content {
                ContentModel::Empty => Frame::Empty,
                ContentModel::Any => Frame::Any,
                ContentModel::Mixed(_) => Frame::Mixed,
                ContentModel::Children(dfa) => Frame::Children(dfa.start()),
            },
        };
        self.attributes(&dtd, name, attributes, position);
        self.stack.push(OpenElement {
            name: name.to_string(),
            frame,
        });
    }

    /// Advances the content of the parent element past a child element
    fn child(&mut self, dtd: &Dtd, name: &str, position: Position) {
        let parent = match self.stack.last_mut() {
            Some(p) => p,
            None => return,
        };
        let error = match (parent.frame, dtd.element(&parent.name).map(|e| &e.content)) {
            (Frame::Empty, _) => Some(ValidityErrorKind::NotEmpty(parent.name.clone())),
            (Frame::Mixed, Some(ContentModel::Mixed(names))) if !names.contains(name) => {
                let mut expected: Vec<String> = names.iter().cloned().collect();
                expected.sort();
                Some(ValidityErrorKind::ElementNotAllowed {
                    parent: parent.name.clone(),
                    child: name.to_string(),
                    expected,
                })
            }
            (Frame::Children(state), Some(ContentModel::Children(dfa))) => match dfa.step(state, name) {
                Some(next) => {
                    parent.frame = Frame::Children(next);
                    None
                }
                None => Some(ValidityErrorKind::ElementNotAllowed {
                    parent: parent.name.clone(),
                    child: name.to_string(),
                    expected: dfa.expected(state).map(str::to_string).collect(),
                }),
            },
            _ => None,
        };
        if let Some(kind) = error {
            parent.frame = Frame::Unchecked;
            self.error_at(kind, position);
        }
    }

    fn attributes(&mut self, dtd: &Dtd, element: &str, attributes: &[Attribute], position: Position) {
        for attr in attributes {
            let def = match dtd.attribute(element, &attr.name) {
                Some(def) => def,
                None => {
                    if !attr.is_namespace_declaration() {
                        self.error_at(
                            ValidityErrorKind::UndeclaredAttribute {
                                element: element.to_string(),
                                attribute: attr.name.clone(),
                            },
                            position,
                        );
                    }
                    continue;
                }
            };
            if !is_lexically_valid(&def.att_type, &attr.value) {
                self.error_at(
                    ValidityErrorKind::InvalidAttributeValue {
                        element: element.to_string(),
                        attribute: attr.name.clone(),
                        value: attr.value.clone(),
                    },
                    position,
                );
                continue;
            }
            if let DefaultDecl::Fixed(fixed) = &def.default {
                if *fixed != attr.value {
                    self.error_at(
                        ValidityErrorKind::FixedMismatch {
                            element: element.to_string(),
                            attribute: attr.name.clone(),
                            expected: fixed.clone(),
                            found: attr.value.clone(),
                        },
                        position,
                    );
                }
            }
            match &def.att_type {
                AttType::Id => {
                    if !self.ids.insert(attr.value.clone()) {
                        self.error_at(ValidityErrorKind::DuplicateId(attr.value.clone()), position);
                    }
                }
                AttType::IdRef | AttType::IdRefs => {
                    for id in attr.value.split(' ') {
                        self.idrefs.push((id.to_string(), position));
                    }
                }
                AttType::Entity | AttType::Entities => {
                    for name in attr.value.split(' ') {
                        if !dtd.entities().is_unparsed(name) {
                            self.error_at(
                                ValidityErrorKind::NotUnparsedEntity {
                                    attribute: attr.name.clone(),
                                    name: name.to_string(),
                                },
                                position,
                            );
                        }
                    }
                }
                _ => (),
            }
        }
        for def in dtd.attributes(element) {
            if def.default == DefaultDecl::Required && !attributes.iter().any(|a| a.name == def.name) {
                self.error_at(
                    ValidityErrorKind::MissingAttribute {
                        element: element.to_string(),
                        attribute: def.name.clone(),
                    },
                    position,
                );
            }
        }
    }

    /// Character data, including CDATA sections, within the current element
    pub fn observe_text(&mut self, text: &str, position: Position) {
        let open = match self.stack.last_mut() {
            Some(open) => open,
            None => return,
        };
        let kind = match open.frame {
            Frame::Empty if !text.is_empty() => ValidityErrorKind::NotEmpty(open.name.clone()),
            Frame::Children(_) if !is_whitespace_str(text) => {
                ValidityErrorKind::TextNotAllowed(open.name.clone())
            }
            _ => return,
        };
        open.frame = Frame::Unchecked;
        self.error_at(kind, position);
    }

    /// A comment or processing instruction, which an element declared EMPTY may not contain
    pub fn observe_markup(&mut self, position: Position) {
        if let Some(open) = self.stack.last_mut() {
            if let Frame::Empty = open.frame {
                let kind = ValidityErrorKind::NotEmpty(open.name.clone());
                open.frame = Frame::Unchecked;
                self.error_at(kind, position);
            }
        }
    }

    pub fn observe_end_element(&mut self, name: &str, position: Position) {
        let open = match self.stack.pop() {
            Some(open) => open,
            None => return,
        };
        debug_assert_eq!(open.name, name);
        if let Frame::Children(state) = open.frame {
            let dtd = match &self.dtd {
                Some(dtd) => dtd.clone(),
                None => return,
            };
            if let Some(ContentModel::Children(dfa)) = dtd.element(name).map(|e| &e.content) {
                if !dfa.is_accepting(state) {
                    self.error_at(
                        ValidityErrorKind::Incomplete {
                            element: name.to_string(),
                            expected: dfa.expected(state).map(str::to_string).collect(),
                        },
                        position,
                    );
                }
            }
        }
    }

    /// A reference to a general entity which is reported rather than expanded
    pub fn observe_entity_reference(&mut self, name: &str, position: Position) {
        let declared = self
            .dtd
            .as_ref()
            .map_or(false, |dtd| dtd.entities().general(name).is_some());
        if !declared {
            self.error_at(ValidityErrorKind::UndeclaredEntity(name.to_string()), position);
        }
    }

    /// Completes validation at the end of the document, resolving IDREFs.  Further calls return
    /// the same verdict.
    pub fn finalize(&mut self) -> Verdict {
        if !self.finished {
            self.finished = true;
            let idrefs = std::mem::take(&mut self.idrefs);
            for (id, position) in idrefs {
                if !self.ids.contains(&id) {
                    self.error_at(ValidityErrorKind::UnresolvedIdRef(id), position);
                }
            }
        }
        self.verdict()
    }

    /// `Invalid` as soon as any error has been found, otherwise `Unknown` until `finalize()`
    pub fn verdict(&self) -> Verdict {
        if !self.errors.is_empty() {
            Verdict::Invalid
        } else if self.finished {
            Verdict::Valid
        } else {
            Verdict::Unknown
        }
    }

    pub fn errors(&self) -> &[ValidityError] {
        &self.errors
    }

    /// Renders an error against the source text of the document
    pub fn diagnostic(
        &self,
        name: String,
        source: String,
        err: &ValidityError,
    ) -> (codemap::CodeMap, Vec<codemap_diagnostic::Diagnostic>) {
        let mut map = codemap::CodeMap::new();
        let file = map.add_file(name, source);
        let mut spans = vec![];
        if let Location::Document(pos) = err.location {
            let len = file.source().len();
            let start = pos.offset.min(len);
            let end = file.source()[start..]
                .find('>')
                .map_or(start, |n| start + n + 1);
            spans.push(codemap_diagnostic::SpanLabel {
                span: file.span.subspan(start as _, end as _),
                label: None,
                style: codemap_diagnostic::SpanStyle::Primary,
            });
        }
        let mut diagnostics = vec![codemap_diagnostic::Diagnostic {
            level: codemap_diagnostic::Level::Error,
            message: err.kind.to_string(),
            code: None,
            spans,
        }];
        let expected = match &err.kind {
            ValidityErrorKind::ElementNotAllowed { expected, .. }
            | ValidityErrorKind::Incomplete { expected, .. } => Some(expected),
            _ => None,
        };
        if let Some(expected) = expected {
            let message = if expected.is_empty() {
                "Remove this".to_string()
            } else {
                format!("Expected {}", expected.join(" | "))
            };
            diagnostics.push(codemap_diagnostic::Diagnostic {
                level: codemap_diagnostic::Level::Help,
                message,
                code: None,
                spans: vec![],
            });
        }
        (map, diagnostics)
    }

    /// Prints errors in the declarations against the DTD's own source
    pub fn dump_declaration_diagnostics(&self) {
        if let Some(dtd) = &self.dtd {
            for error in dtd.declaration_errors() {
                dtd.dump_diagnostic(error.diagnostic());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pullxml_model::resolver::Resolver;
    use pullxml_model::DtdBuilder;

    fn dtd(name: &str, subset: &str) -> Rc<Dtd> {
        let resolver = Resolver::default();
        let mut builder = DtdBuilder::new(name, None, &resolver);
        builder.internal_subset(subset, "test.xml").unwrap();
        Rc::new(builder.finish())
    }

    fn pos() -> Position {
        Position::default()
    }

    #[test]
    fn valid_document() {
        let mut v = Validator::new(Some(dtd("r", "<!ELEMENT r (#PCDATA)>")));
        v.observe_start_element("r", &[], pos());
        v.observe_text("hello", pos());
        v.observe_end_element("r", pos());
        assert_eq!(v.verdict(), Verdict::Unknown);
        assert_eq!(v.finalize(), Verdict::Valid);
        assert_eq!(v.finalize(), Verdict::Valid);
    }

    #[test]
    fn child_not_allowed() {
        let mut v = Validator::new(Some(dtd("r", "<!ELEMENT r (#PCDATA)>")));
        v.observe_start_element("r", &[], pos());
        v.observe_start_element("bad", &[], pos());
        assert_eq!(v.verdict(), Verdict::Invalid);
        v.observe_end_element("bad", pos());
        v.observe_end_element("r", pos());
        assert_eq!(v.finalize(), Verdict::Invalid);
        assert_matches!(
            &v.errors()[0].kind,
            ValidityErrorKind::ElementNotAllowed { child, .. } if child == "bad"
        );
        assert_matches!(&v.errors()[1].kind, ValidityErrorKind::UndeclaredElement(n) if n == "bad");
    }

    #[test]
    fn element_content() {
        let d = dtd(
            "doc",
            "<!ELEMENT doc (a, b+)> <!ELEMENT a EMPTY> <!ELEMENT b (#PCDATA)>",
        );
        let mut v = Validator::new(Some(d.clone()));
        v.observe_start_element("doc", &[], pos());
        v.observe_text("\n  ", pos());
        v.observe_start_element("a", &[], pos());
        v.observe_end_element("a", pos());
        v.observe_end_element("doc", pos());
        v.finalize();
        assert_matches!(
            v.errors(),
            [ValidityError { kind: ValidityErrorKind::Incomplete { element, expected }, .. }]
                if element == "doc" && expected == &vec!["b".to_string()]
        );

        let mut v = Validator::new(Some(d));
        v.observe_start_element("doc", &[], pos());
        v.observe_text("text", pos());
        v.observe_start_element("a", &[], pos());
        v.observe_text("x", pos());
        v.observe_end_element("a", pos());
        v.observe_end_element("doc", pos());
        v.finalize();
        let kinds: Vec<_> = v.errors().iter().map(|e| &e.kind).collect();
        assert_matches!(kinds[0], ValidityErrorKind::TextNotAllowed(n) if n == "doc");
        assert_matches!(kinds[1], ValidityErrorKind::NotEmpty(n) if n == "a");
    }

    #[test]
    fn ids_checked_at_end() {
        let d = dtd(
            "doc",
            "<!ELEMENT doc (item*)> <!ELEMENT item EMPTY>
             <!ATTLIST item id ID #IMPLIED ref IDREF #IMPLIED>",
        );
        let mut v = Validator::new(Some(d.clone()));
        v.observe_start_element("doc", &[], pos());
        v.observe_start_element("item", &[Attribute::new("ref", "later")], pos());
        v.observe_end_element("item", pos());
        v.observe_start_element("item", &[Attribute::new("id", "later")], pos());
        v.observe_end_element("item", pos());
        v.observe_end_element("doc", pos());
        assert_eq!(v.verdict(), Verdict::Unknown);
        assert_eq!(v.finalize(), Verdict::Valid);

        let mut v = Validator::new(Some(d));
        v.observe_start_element("doc", &[], pos());
        for attrs in &[
            vec![Attribute::new("id", "x")],
            vec![Attribute::new("id", "x")],
            vec![Attribute::new("ref", "dangling")],
        ] {
            v.observe_start_element("item", attrs, pos());
            v.observe_end_element("item", pos());
        }
        v.observe_end_element("doc", pos());
        assert_eq!(v.verdict(), Verdict::Invalid);
        v.finalize();
        let kinds: Vec<_> = v.errors().iter().map(|e| &e.kind).collect();
        assert_matches!(kinds.as_slice(), [
            ValidityErrorKind::DuplicateId(_),
            ValidityErrorKind::UnresolvedIdRef(r),
        ] if r == "dangling");
    }

    #[test]
    fn attributes() {
        let d = dtd(
            "doc",
            r#"<!ELEMENT doc EMPTY>
               <!ATTLIST doc
                   req CDATA #REQUIRED
                   fixed CDATA #FIXED "1"
                   choice (a|b) #IMPLIED
                   tok NMTOKEN #IMPLIED>"#,
        );
        let mut v = Validator::new(Some(d));
        v.observe_start_element(
            "doc",
            &[
                Attribute::new("fixed", "2"),
                Attribute::new("choice", "c"),
                Attribute::new("tok", "a b"),
                Attribute::new("other", "x"),
                Attribute::new("xmlns", "urn:x"),
            ],
            pos(),
        );
        v.observe_end_element("doc", pos());
        v.finalize();
        let kinds: Vec<_> = v.errors().iter().map(|e| &e.kind).collect();
        assert_matches!(kinds.as_slice(), [
            ValidityErrorKind::FixedMismatch { .. },
            ValidityErrorKind::InvalidAttributeValue { attribute: a, .. },
            ValidityErrorKind::InvalidAttributeValue { attribute: b, .. },
            ValidityErrorKind::UndeclaredAttribute { attribute: c, .. },
            ValidityErrorKind::MissingAttribute { attribute: d, .. },
        ] if a == "choice" && b == "tok" && c == "other" && d == "req");
    }

    #[test]
    fn root_and_declarations() {
        let d = dtd("doc", "<!ELEMENT x ((a, b) | (a, c))> <!ELEMENT other ANY>");
        let mut v = Validator::new(Some(d));
        assert_eq!(v.verdict(), Verdict::Invalid);
        v.observe_start_element("other", &[], pos());
        v.observe_end_element("other", pos());
        v.finalize();
        assert_matches!(&v.errors()[0].location, Location::Declaration(_));
        assert_matches!(&v.errors()[1].kind, ValidityErrorKind::RootMismatch { found, .. } if found == "other");
    }

    #[test]
    fn no_dtd() {
        let mut v = Validator::new(None);
        v.observe_start_element("doc", &[], pos());
        v.observe_end_element("doc", pos());
        assert_eq!(v.finalize(), Verdict::Invalid);
        assert_matches!(v.errors()[0].kind, ValidityErrorKind::NoDtd);
    }

    #[test]
    fn diagnostic_spans_tag() {
        let mut v = Validator::new(Some(dtd("r", "<!ELEMENT r (#PCDATA)>")));
        let source = "<r><bad/></r>";
        v.observe_start_element("r", &[], pos());
        let at = Position {
            line: 1,
            column: 4,
            offset: 3,
        };
        v.observe_start_element("bad", &[], at);
        let (_map, diagnostics) = v.diagnostic("doc.xml".to_string(), source.to_string(), &v.errors()[0]);
        assert_eq!(diagnostics[0].message, "element bad is not allowed here in r");
        assert_eq!(diagnostics[1].message, "Remove this");
    }
}
