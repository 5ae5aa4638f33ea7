//! The document type model: declarations gathered from the internal and external DTD subsets,
//! compiled into a form which can be checked against a stream of elements.

use crate::entity::{Entity, EntityValue, ExpansionError, ExpansionGuard};
use crate::resolver::{ResolutionError, Resource, Resolver};
use pullxml_syntax::dtd::{parse_markup_decl, parse_subset, DtdSyntaxError};
use pullxml_syntax::types::{
    AttType, AttlistDecl, ContentSpec, DeclItem, DefaultDecl, ElementDecl, EntityDecl, EntityDef,
    ExternalId, MarkupDecl, NotationDecl,
};
use pullxml_syntax::{char_ref_value, is_name_char, is_name_start_char, read_entity_text, LexError};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

pub mod attribute;
pub mod catalog;
pub mod content;
pub mod entity;
pub mod model;
pub mod resolver;

pub use crate::model::{AttributeDef, ContentModel, Dtd, ElementType, Notation};

/// A fatal error in the DTD, after which no further declarations are read
#[derive(Debug)]
pub enum ModelError {
    Syntax {
        span: codemap::Span,
        error: DtdSyntaxError,
    },
    /// the external subset or an external parameter entity is not well-formed text
    Lexical {
        url: String,
        error: LexError,
    },
    /// parameter-entity references may not appear within declarations in the internal subset
    ParameterEntityInMarkup {
        span: codemap::Span,
        name: String,
    },
    ConditionalInInternalSubset(codemap::Span),
    InvalidConditionalKeyword {
        span: codemap::Span,
        keyword: String,
    },
    Expansion {
        span: codemap::Span,
        error: ExpansionError,
    },
    InvalidEntityValue {
        span: codemap::Span,
        reference: String,
    },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Syntax { error, .. } => write!(f, "{}", error),
            ModelError::Lexical { url, error } => write!(f, "{}: {}", url, error),
            ModelError::ParameterEntityInMarkup { name, .. } => write!(
                f,
                "parameter entity reference %{}; is not allowed within markup in the internal subset",
                name
            ),
            ModelError::ConditionalInInternalSubset(_) => {
                f.write_str("conditional sections are not allowed in the internal subset")
            }
            ModelError::InvalidConditionalKeyword { keyword, .. } => {
                write!(f, "conditional section keyword must be INCLUDE or IGNORE, not {:?}", keyword)
            }
            ModelError::Expansion { error, .. } => write!(f, "{}", error),
            ModelError::InvalidEntityValue { reference, .. } => {
                write!(f, "invalid character reference {:?} in entity value", reference)
            }
        }
    }
}

impl std::error::Error for ModelError {}

impl ModelError {
    pub fn diagnostic(&self) -> codemap_diagnostic::Diagnostic {
        let (span, label) = match self {
            ModelError::Syntax { span, .. } => (Some(*span), "the DTD cannot be parsed from here"),
            ModelError::Lexical { .. } => (None, ""),
            ModelError::ParameterEntityInMarkup { span, .. } => (Some(*span), "within this declaration"),
            ModelError::ConditionalInInternalSubset(span) => (Some(*span), "conditional section"),
            ModelError::InvalidConditionalKeyword { span, .. } => (Some(*span), "conditional section"),
            ModelError::Expansion { span, .. } => (Some(*span), "referenced here"),
            ModelError::InvalidEntityValue { span, .. } => (Some(*span), "in this declaration"),
        };
        codemap_diagnostic::Diagnostic {
            level: codemap_diagnostic::Level::Error,
            message: self.to_string(),
            code: None,
            spans: span
                .map(|span| codemap_diagnostic::SpanLabel {
                    span,
                    style: codemap_diagnostic::SpanStyle::Primary,
                    label: Some(label.to_owned()),
                })
                .into_iter()
                .collect(),
        }
    }
}

/// A validity problem in the declarations
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarationError {
    pub span: codemap::Span,
    pub kind: DeclarationErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationErrorKind {
    DuplicateElement {
        name: String,
        original: codemap::Span,
    },
    DuplicateNotation(String),
    DuplicateMixedName {
        element: String,
        name: String,
    },
    NotDeterministic(String),
    MultipleIds {
        element: String,
        attribute: String,
    },
    IdWithDefault {
        element: String,
        attribute: String,
    },
    InvalidDefault {
        element: String,
        attribute: String,
        reason: String,
    },
    UndeclaredNotation {
        notation: String,
        referrer: String,
    },
    UndeclaredParameterEntity(String),
}

impl fmt::Display for DeclarationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationErrorKind::DuplicateElement { name, .. } => {
                write!(f, "element {} is declared more than once", name)
            }
            DeclarationErrorKind::DuplicateNotation(name) => {
                write!(f, "notation {} is declared more than once", name)
            }
            DeclarationErrorKind::DuplicateMixedName { element, name } => write!(
                f,
                "{} appears more than once in the content model of {}",
                name, element
            ),
            DeclarationErrorKind::NotDeterministic(name) => {
                write!(f, "content model of {} is not deterministic", name)
            }
            DeclarationErrorKind::MultipleIds { element, attribute } => write!(
                f,
                "element {} has more than one ID attribute, {} is not the first",
                element, attribute
            ),
            DeclarationErrorKind::IdWithDefault { element, attribute } => write!(
                f,
                "ID attribute {} of {} must be #IMPLIED or #REQUIRED",
                attribute, element
            ),
            DeclarationErrorKind::InvalidDefault {
                element,
                attribute,
                reason,
            } => write!(
                f,
                "default value of attribute {} of {} is invalid: {}",
                attribute, element, reason
            ),
            DeclarationErrorKind::UndeclaredNotation { notation, referrer } => {
                write!(f, "notation {} used by {} is not declared", notation, referrer)
            }
            DeclarationErrorKind::UndeclaredParameterEntity(name) => {
                write!(f, "parameter entity %{}; is not declared", name)
            }
        }
    }
}

impl DeclarationError {
    pub fn diagnostic(&self) -> codemap_diagnostic::Diagnostic {
        let mut spans = vec![codemap_diagnostic::SpanLabel {
            span: self.span,
            style: codemap_diagnostic::SpanStyle::Primary,
            label: None,
        }];
        if let DeclarationErrorKind::DuplicateElement { original, .. } = &self.kind {
            spans.push(codemap_diagnostic::SpanLabel {
                span: *original,
                style: codemap_diagnostic::SpanStyle::Secondary,
                label: Some("first declared here".to_owned()),
            });
        }
        codemap_diagnostic::Diagnostic {
            level: codemap_diagnostic::Level::Error,
            message: self.kind.to_string(),
            code: None,
            spans,
        }
    }
}

/// A part of the DTD which could not be read, leaving the model possibly incomplete
#[derive(Debug)]
pub enum ModelWarning {
    UnresolvedSubset {
        id: ExternalId,
        error: ResolutionError,
    },
    UnresolvedEntity {
        name: String,
        error: ResolutionError,
    },
}

impl fmt::Display for ModelWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelWarning::UnresolvedSubset { error, .. } => {
                write!(f, "could not load the external DTD subset: {}", error)
            }
            ModelWarning::UnresolvedEntity { name, error } => {
                write!(f, "could not load parameter entity %{};: {}", name, error)
            }
        }
    }
}

/// Where the text being read came from
struct Source {
    file: Arc<codemap::File>,
    /// offset of the text being parsed within the file
    offset: usize,
    base: Option<Url>,
    /// in the external subset or an external parameter entity
    external: bool,
    /// within the replacement text of a parameter entity
    nested: bool,
}

impl Source {
    fn span(&self, range: Range<usize>) -> codemap::Span {
        self.file
            .span
            .subspan((self.offset + range.start) as u64, (self.offset + range.end) as u64)
    }

    fn at(&self, offset: usize) -> Source {
        Source {
            file: self.file.clone(),
            offset: self.offset + offset,
            base: self.base.clone(),
            external: self.external,
            nested: self.nested,
        }
    }

    fn allows_references_in_markup(&self) -> bool {
        self.external || self.nested
    }
}

/// Builds a `Dtd` from the markup declarations of the internal and external subsets.
///
/// Declarations are processed in document order, the internal subset first.  For each kind of
/// declaration the first one seen for a name is the one that counts.
pub struct DtdBuilder<'a> {
    resolver: &'a Resolver,
    dtd: Dtd,
    guard: ExpansionGuard,
}

impl<'a> DtdBuilder<'a> {
    pub fn new(name: &str, external_id: Option<ExternalId>, resolver: &'a Resolver) -> DtdBuilder<'a> {
        DtdBuilder {
            resolver,
            dtd: Dtd::new(name, external_id),
            guard: ExpansionGuard::default(),
        }
    }

    /// Limits the expansion of parameter entities
    pub fn with_guard(mut self, guard: ExpansionGuard) -> DtdBuilder<'a> {
        self.guard = guard;
        self
    }

    /// Reads the declarations of the internal subset; `origin` names the document containing it
    pub fn internal_subset(&mut self, text: &str, origin: &str) -> Result<(), ModelError> {
        let file = self
            .dtd
            .codemap
            .add_file(format!("{} (internal subset)", origin), text.to_string());
        let src = Source {
            file: file.clone(),
            offset: 0,
            base: None,
            external: false,
            nested: false,
        };
        self.process(file.source(), &src)
    }

    /// Locates and reads the external subset named by the DOCTYPE declaration.  A subset which
    /// cannot be found is recorded as a warning.
    pub fn load_external_subset(&mut self, base: Option<&Url>) -> Result<(), ModelError> {
        let id = match &self.dtd.external_id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };
        match self
            .resolver
            .resolve(id.public_id.as_deref(), id.system_id.as_deref(), base)
        {
            Ok(resource) => self.external_subset(resource),
            Err(error) => {
                warn!("could not load external subset of {}: {}", self.dtd.name, error);
                self.dtd.warnings.push(ModelWarning::UnresolvedSubset { id, error });
                Ok(())
            }
        }
    }

    pub fn external_subset(&mut self, resource: Resource) -> Result<(), ModelError> {
        debug!("reading external subset {}", resource.url);
        self.dtd.has_external_parts = true;
        let text = read_entity_text(resource.reader).map_err(|error| ModelError::Lexical {
            url: resource.url.to_string(),
            error,
        })?;
        let file = self.dtd.codemap.add_file(resource.url.to_string(), text);
        let src = Source {
            file: file.clone(),
            offset: 0,
            base: Some(resource.url),
            external: true,
            nested: false,
        };
        self.process(file.source(), &src)
    }

    pub fn finish(mut self) -> Dtd {
        let mut errors = vec![];
        for (element, defs) in &self.dtd.attlists {
            for def in defs {
                if let AttType::Notation(names) = &def.att_type {
                    for name in names {
                        if !self.dtd.notations.contains_key(name) {
                            errors.push(DeclarationError {
                                span: def.span,
                                kind: DeclarationErrorKind::UndeclaredNotation {
                                    notation: name.clone(),
                                    referrer: format!("attribute {} of {}", def.name, element),
                                },
                            });
                        }
                    }
                }
            }
        }
        for entity in self.dtd.entities.general_entities() {
            if let EntityValue::External {
                ndata: Some(notation),
                ..
            } = &entity.value
            {
                if !self.dtd.notations.contains_key(notation) {
                    if let Some(span) = entity.span {
                        errors.push(DeclarationError {
                            span,
                            kind: DeclarationErrorKind::UndeclaredNotation {
                                notation: notation.clone(),
                                referrer: format!("entity {}", entity.name),
                            },
                        });
                    }
                }
            }
        }
        self.dtd.declaration_errors.extend(errors);
        self.dtd
    }

    fn process(&mut self, text: &str, src: &Source) -> Result<(), ModelError> {
        let items = parse_subset(text).map_err(|error| ModelError::Syntax {
            span: src.span(error.offset..error.offset),
            error,
        })?;
        for item in items {
            match item {
                DeclItem::Whitespace | DeclItem::Comment | DeclItem::Pi { .. } => (),
                DeclItem::PeReference { span, name } => {
                    self.include_parameter_entity(&name, src, src.span(span))?
                }
                DeclItem::Markup { span, text } => self.markup_decl(&text, src, src.span(span))?,
                DeclItem::Conditional {
                    span,
                    keyword,
                    body,
                } => {
                    let cspan = src.span(span.clone());
                    if !src.external {
                        return Err(ModelError::ConditionalInInternalSubset(cspan));
                    }
                    let keyword = if keyword.starts_with('%') {
                        self.expand_references(&keyword, src, cspan)?
                    } else {
                        keyword
                    };
                    match keyword.trim() {
                        "INCLUDE" => {
                            let body_start = span.end - "]]>".len() - body.len();
                            self.process(&body, &src.at(body_start))?
                        }
                        "IGNORE" => trace!("ignoring conditional section"),
                        other => {
                            return Err(ModelError::InvalidConditionalKeyword {
                                span: cspan,
                                keyword: other.to_string(),
                            })
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn include_parameter_entity(
        &mut self,
        name: &str,
        src: &Source,
        span: codemap::Span,
    ) -> Result<(), ModelError> {
        self.dtd.has_external_parts = true;
        let (text, base, external) = match self.parameter_text(name, src, span)? {
            Some(t) => t,
            None => return Ok(()),
        };
        let file = self.dtd.codemap.add_file(format!("%{};", name), text);
        let nested = Source {
            file: file.clone(),
            offset: 0,
            base,
            external: external || src.external,
            nested: true,
        };
        self.enter(name, span)?;
        let result = self.process(file.source(), &nested);
        self.guard.leave();
        result
    }

    /// The replacement text of a parameter entity, with the base URL and externality of its
    /// content.  `None` if the entity is undeclared or cannot be loaded, which is recorded.
    fn parameter_text(
        &mut self,
        name: &str,
        src: &Source,
        span: codemap::Span,
    ) -> Result<Option<(String, Option<Url>, bool)>, ModelError> {
        let entity = match self.dtd.entities.parameter(name) {
            Some(e) => e.clone(),
            None => {
                self.dtd.declaration_errors.push(DeclarationError {
                    span,
                    kind: DeclarationErrorKind::UndeclaredParameterEntity(name.to_string()),
                });
                return Ok(None);
            }
        };
        match entity.value {
            EntityValue::Internal(text) => Ok(Some((text, src.base.clone(), false))),
            EntityValue::External { id, base, .. } => {
                match self
                    .resolver
                    .resolve(id.public_id.as_deref(), id.system_id.as_deref(), base.as_ref())
                {
                    Ok(resource) => {
                        debug!("reading parameter entity %{}; from {}", name, resource.url);
                        let text = read_entity_text(resource.reader).map_err(|error| {
                            ModelError::Lexical {
                                url: resource.url.to_string(),
                                error,
                            }
                        })?;
                        Ok(Some((text, Some(resource.url), true)))
                    }
                    Err(error) => {
                        warn!("could not load parameter entity %{};: {}", name, error);
                        self.dtd.warnings.push(ModelWarning::UnresolvedEntity {
                            name: name.to_string(),
                            error,
                        });
                        Ok(None)
                    }
                }
            }
        }
    }

    fn enter(&mut self, name: &str, span: codemap::Span) -> Result<(), ModelError> {
        self.guard
            .enter(&format!("%{}", name))
            .map_err(|error| ModelError::Expansion { span, error })
    }

    /// Replaces parameter-entity references occurring outside literals within the text of a
    /// declaration, each replacement padded with a space either side
    fn expand_references(
        &mut self,
        text: &str,
        src: &Source,
        span: codemap::Span,
    ) -> Result<String, ModelError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(i) = rest.find(|c| matches!(c, '"' | '\'' | '%')) {
            out.push_str(&rest[..i]);
            rest = &rest[i..];
            let c = rest.as_bytes()[0] as char;
            if c != '%' {
                let end = rest[1..].find(c).map_or(rest.len(), |n| n + 2);
                out.push_str(&rest[..end]);
                rest = &rest[end..];
                continue;
            }
            let name = match reference_name(&rest[1..]) {
                Some(name) => name,
                None => {
                    out.push('%');
                    rest = &rest[1..];
                    continue;
                }
            };
            rest = &rest[name.len() + 2..];
            if !src.allows_references_in_markup() {
                return Err(ModelError::ParameterEntityInMarkup {
                    span,
                    name: name.to_string(),
                });
            }
            if let Some((replacement, _, _)) = self.parameter_text(name, src, span)? {
                self.enter(name, span)?;
                self.guard
                    .account(replacement.len())
                    .map_err(|error| ModelError::Expansion { span, error })?;
                let expanded = self.expand_references(&replacement, src, span);
                self.guard.leave();
                out.push(' ');
                out.push_str(&expanded?);
                out.push(' ');
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn markup_decl(&mut self, text: &str, src: &Source, span: codemap::Span) -> Result<(), ModelError> {
        let expanded;
        let text = if has_reference_outside_literals(text) {
            expanded = self.expand_references(text, src, span)?;
            expanded.as_str()
        } else {
            text
        };
        let decl = parse_markup_decl(text).map_err(|error| ModelError::Syntax { span, error })?;
        match decl {
            MarkupDecl::Element(decl) => self.declare_element(decl, span),
            MarkupDecl::Attlist(decl) => self.declare_attribute_list(decl, span),
            MarkupDecl::Entity(decl) => {
                let parameter = decl.parameter;
                let entity = self.entity(decl, src, span)?;
                self.declare_entity(entity, parameter);
            }
            MarkupDecl::Notation(decl) => self.declare_notation(decl, span),
        }
        Ok(())
    }

    fn entity(&mut self, decl: EntityDecl, src: &Source, span: codemap::Span) -> Result<Entity, ModelError> {
        let value = match decl.def {
            EntityDef::Internal(literal) => EntityValue::Internal(self.entity_value(&literal, src, span)?),
            EntityDef::External { id, ndata } => EntityValue::External {
                id,
                base: src.base.clone(),
                ndata,
            },
        };
        Ok(Entity {
            name: decl.name,
            value,
            span: Some(span),
            externally_declared: src.external,
        })
    }

    /// Computes the replacement text of an internal entity from its literal value: character
    /// references and parameter-entity references are replaced, general entity references are
    /// left for expansion where the entity is used
    fn entity_value(&mut self, literal: &str, src: &Source, span: codemap::Span) -> Result<String, ModelError> {
        let mut out = String::with_capacity(literal.len());
        let mut rest = literal;
        while let Some(i) = rest.find(|c| matches!(c, '&' | '%')) {
            out.push_str(&rest[..i]);
            rest = &rest[i..];
            if let Some(body) = rest.strip_prefix("&#") {
                let end = body.find(';').ok_or_else(|| ModelError::InvalidEntityValue {
                    span,
                    reference: rest.to_string(),
                })?;
                let c = char_ref_value(&body[..end]).ok_or_else(|| ModelError::InvalidEntityValue {
                    span,
                    reference: body[..end].to_string(),
                })?;
                out.push(c);
                rest = &body[end + 1..];
            } else if rest.starts_with('&') {
                out.push('&');
                rest = &rest[1..];
            } else {
                let name = match reference_name(&rest[1..]) {
                    Some(name) => name,
                    None => {
                        out.push('%');
                        rest = &rest[1..];
                        continue;
                    }
                };
                rest = &rest[name.len() + 2..];
                if !src.allows_references_in_markup() {
                    return Err(ModelError::ParameterEntityInMarkup {
                        span,
                        name: name.to_string(),
                    });
                }
                if let Some((replacement, _, external)) = self.parameter_text(name, src, span)? {
                    self.enter(name, span)?;
                    self.guard
                        .account(replacement.len())
                        .map_err(|error| ModelError::Expansion { span, error })?;
                    // internal replacement text has already had its references processed
                    let expanded = if external {
                        self.entity_value(&replacement, src, span)
                    } else {
                        Ok(replacement)
                    };
                    self.guard.leave();
                    out.push_str(&expanded?);
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    pub fn declare_element(&mut self, decl: ElementDecl, span: codemap::Span) {
        if let Some(existing) = self.dtd.elements.get(&decl.name) {
            self.dtd.declaration_errors.push(DeclarationError {
                span,
                kind: DeclarationErrorKind::DuplicateElement {
                    name: decl.name,
                    original: existing.span,
                },
            });
            return;
        }
        let content = match decl.content {
            ContentSpec::Empty => ContentModel::Empty,
            ContentSpec::Any => ContentModel::Any,
            ContentSpec::Mixed(names) => {
                let mut set = HashSet::new();
                for name in names {
                    if set.contains(&name) {
                        self.dtd.declaration_errors.push(DeclarationError {
                            span,
                            kind: DeclarationErrorKind::DuplicateMixedName {
                                element: decl.name.clone(),
                                name,
                            },
                        });
                    } else {
                        set.insert(name);
                    }
                }
                ContentModel::Mixed(set)
            }
            ContentSpec::Children(particle) => {
                let (dfa, deterministic) = content::Dfa::compile(&particle);
                if !deterministic {
                    self.dtd.declaration_errors.push(DeclarationError {
                        span,
                        kind: DeclarationErrorKind::NotDeterministic(decl.name.clone()),
                    });
                }
                trace!("content model of {} has {} states", decl.name, dfa.state_count());
                ContentModel::Children(dfa)
            }
        };
        self.dtd.elements.insert(
            decl.name.clone(),
            ElementType {
                name: decl.name,
                span,
                content,
            },
        );
    }

    pub fn declare_attribute_list(&mut self, decl: AttlistDecl, span: codemap::Span) {
        for def in decl.defs {
            let existing = self.dtd.attributes(&decl.element);
            if existing.iter().any(|a| a.name == def.name) {
                trace!("ignoring redeclaration of attribute {} of {}", def.name, decl.element);
                continue;
            }
            if def.att_type == AttType::Id {
                if existing.iter().any(|a| a.att_type == AttType::Id) {
                    self.declaration_error(
                        span,
                        DeclarationErrorKind::MultipleIds {
                            element: decl.element.clone(),
                            attribute: def.name.clone(),
                        },
                    );
                }
                if def.default.value().is_some() {
                    self.declaration_error(
                        span,
                        DeclarationErrorKind::IdWithDefault {
                            element: decl.element.clone(),
                            attribute: def.name.clone(),
                        },
                    );
                }
            }
            let default = match def.default {
                DefaultDecl::Fixed(raw) => {
                    DefaultDecl::Fixed(self.default_value(&decl.element, &def.name, &def.att_type, &raw, span))
                }
                DefaultDecl::Value(raw) => {
                    DefaultDecl::Value(self.default_value(&decl.element, &def.name, &def.att_type, &raw, span))
                }
                other => other,
            };
            self.dtd
                .attlists
                .entry(decl.element.clone())
                .or_insert_with(Vec::new)
                .push(AttributeDef {
                    name: def.name,
                    att_type: def.att_type,
                    default,
                    span,
                });
        }
    }

    fn default_value(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &AttType,
        raw: &str,
        span: codemap::Span,
    ) -> String {
        let mut guard = self.guard.clone();
        let value = match attribute::normalize_value(raw, att_type.is_tokenized(), &self.dtd.entities, &mut guard) {
            Ok(value) => value,
            Err(e) => {
                self.declaration_error(
                    span,
                    DeclarationErrorKind::InvalidDefault {
                        element: element.to_string(),
                        attribute: attribute.to_string(),
                        reason: e.to_string(),
                    },
                );
                return raw.to_string();
            }
        };
        if !attribute::is_lexically_valid(att_type, &value) {
            self.declaration_error(
                span,
                DeclarationErrorKind::InvalidDefault {
                    element: element.to_string(),
                    attribute: attribute.to_string(),
                    reason: format!("{:?} is not a valid {:?} value", value, att_type),
                },
            );
        }
        value
    }

    /// Records the entity unless one of the same name is already declared
    pub fn declare_entity(&mut self, entity: Entity, parameter: bool) {
        let name = entity.name.clone();
        if !self.dtd.entities.declare(entity, parameter) {
            debug!(
                "ignoring redeclaration of {}entity {}",
                if parameter { "parameter " } else { "" },
                name
            );
        }
    }

    pub fn declare_notation(&mut self, decl: NotationDecl, span: codemap::Span) {
        if self.dtd.notations.contains_key(&decl.name) {
            self.declaration_error(span, DeclarationErrorKind::DuplicateNotation(decl.name));
            return;
        }
        self.dtd.notations.insert(
            decl.name.clone(),
            Notation {
                name: decl.name,
                id: decl.id,
                span,
            },
        );
    }

    fn declaration_error(&mut self, span: codemap::Span, kind: DeclarationErrorKind) {
        self.dtd.declaration_errors.push(DeclarationError { span, kind });
    }
}

/// The name of a reference `name;` at the start of `text` (which follows the `%` or `&`)
fn reference_name(text: &str) -> Option<&str> {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, c)) if is_name_start_char(c) => (),
        _ => return None,
    }
    for (i, c) in chars {
        if c == ';' {
            return Some(&text[..i]);
        }
        if !is_name_char(c) {
            return None;
        }
    }
    None
}

fn has_reference_outside_literals(text: &str) -> bool {
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => (),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '%' => {
                if reference_name(&text[i + 1..]).is_some() {
                    return true;
                }
            }
            None => (),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryLoader;
    use assert_matches::assert_matches;

    fn build(resolver: &Resolver, subset: &str) -> Result<Dtd, ModelError> {
        let mut builder = DtdBuilder::new("doc", None, resolver);
        builder.internal_subset(subset, "test.xml")?;
        Ok(builder.finish())
    }

    fn kinds(dtd: &Dtd) -> Vec<&DeclarationErrorKind> {
        dtd.declaration_errors().iter().map(|e| &e.kind).collect()
    }

    #[test]
    fn declarations() {
        let resolver = Resolver::default();
        let dtd = build(
            &resolver,
            r#"<!ELEMENT doc (head, body)>
               <!ATTLIST doc id ID #IMPLIED kind (a|b) "a">
               <!ENTITY e "x&#65;&other;">
               <!ENTITY % pe "<!ELEMENT head EMPTY>">
               %pe;
               <!NOTATION gif SYSTEM "image/gif">"#,
        )
        .unwrap();
        assert!(dtd.declaration_errors().is_empty());
        assert_matches!(dtd.element("head").unwrap().content, ContentModel::Empty);
        assert_matches!(dtd.element("doc").unwrap().content, ContentModel::Children(_));
        assert_eq!(dtd.attributes("doc").len(), 2);
        assert_matches!(
            &dtd.entities().general("e").unwrap().value,
            EntityValue::Internal(text) if text == "xA&other;"
        );
        assert!(dtd.notation("gif").is_some());
        assert!(dtd.has_external_parts());
    }

    #[test]
    fn first_declaration_wins() {
        let resolver = Resolver::default();
        let dtd = build(
            &resolver,
            r#"<!ELEMENT a EMPTY><!ELEMENT a ANY>
               <!ATTLIST a x CDATA "1"><!ATTLIST a x CDATA "2">
               <!ENTITY e "one"><!ENTITY e "two">"#,
        )
        .unwrap();
        assert_matches!(dtd.element("a").unwrap().content, ContentModel::Empty);
        assert_matches!(
            kinds(&dtd).as_slice(),
            [DeclarationErrorKind::DuplicateElement { name, .. }] if name == "a"
        );
        assert_eq!(dtd.attribute("a", "x").unwrap().default, DefaultDecl::Value("1".to_string()));
        assert_matches!(&dtd.entities().general("e").unwrap().value, EntityValue::Internal(t) if t == "one");
    }

    #[test]
    fn attribute_declaration_checks() {
        let resolver = Resolver::default();
        let dtd = build(
            &resolver,
            r#"<!ATTLIST a one ID #IMPLIED two ID #REQUIRED>
               <!ATTLIST b id ID "x">
               <!ATTLIST c n NMTOKEN "not a token">
               <!ATTLIST d t NMTOKENS "  x   y ">
               <!ATTLIST e img NOTATION (png) #IMPLIED>"#,
        )
        .unwrap();
        let kinds = kinds(&dtd);
        assert_matches!(kinds[0], DeclarationErrorKind::MultipleIds { attribute, .. } if attribute == "two");
        assert_matches!(kinds[1], DeclarationErrorKind::IdWithDefault { element, .. } if element == "b");
        assert_matches!(kinds[2], DeclarationErrorKind::InvalidDefault { element, .. } if element == "c");
        assert_matches!(kinds[3], DeclarationErrorKind::UndeclaredNotation { notation, .. } if notation == "png");
        assert_eq!(dtd.attribute("d", "t").unwrap().default, DefaultDecl::Value("x y".to_string()));
    }

    #[test]
    fn ambiguous_content_model() {
        let resolver = Resolver::default();
        let dtd = build(&resolver, "<!ELEMENT x ((a, b) | (a, c))>").unwrap();
        assert_eq!(
            dtd.declaration_errors()[0].kind.to_string(),
            "content model of x is not deterministic"
        );
    }

    #[test]
    fn internal_subset_restrictions() {
        let resolver = Resolver::default();
        assert_matches!(
            build(&resolver, r#"<!ENTITY % t "CDATA"><!ATTLIST a x %t; #IMPLIED>"#),
            Err(ModelError::ParameterEntityInMarkup { name, .. }) if name == "t"
        );
        assert_matches!(
            build(&resolver, "<![INCLUDE[<!ELEMENT a EMPTY>]]>"),
            Err(ModelError::ConditionalInInternalSubset(_))
        );
        assert_matches!(build(&resolver, "<!ELEMENT a (b,>"), Err(ModelError::Syntax { .. }));
        assert_matches!(
            build(&resolver, r#"<!ENTITY % a "%b;">"#),
            Err(ModelError::ParameterEntityInMarkup { .. })
        );
    }

    #[test]
    fn recursive_parameter_entity() {
        let loader = MemoryLoader::new().with(
            "file:///d/loop.ent",
            r#"<!ENTITY % self SYSTEM "loop.ent"> %self;"#,
        );
        let resolver = Resolver::new(Box::new(loader));
        let mut builder = DtdBuilder::new(
            "doc",
            Some(ExternalId {
                public_id: None,
                system_id: Some("loop.ent".to_string()),
            }),
            &resolver,
        );
        let base = Url::parse("file:///d/doc.xml").unwrap();
        assert_matches!(
            builder.load_external_subset(Some(&base)),
            Err(ModelError::Expansion {
                error: ExpansionError::Recursive(_),
                ..
            })
        );
    }

    #[test]
    fn external_subset() {
        let loader = MemoryLoader::new()
            .with(
                "file:///d/doc.dtd",
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <!ENTITY % model "(#PCDATA | b)*">
                <!ENTITY % decls SYSTEM "decls.ent">
                <!ELEMENT doc %model;>
                <![ %switch; [ <!ELEMENT ignored EMPTY> ]]>
                <![INCLUDE[ <![IGNORE[ <!ELEMENT b EMPTY> ]]> <!ELEMENT included ANY> ]]>
                %decls;"#,
            )
            .with("file:///d/decls.ent", r#"<!ENTITY ext "from &#x65;xternal">"#);
        let resolver = Resolver::new(Box::new(loader));
        let mut builder = DtdBuilder::new(
            "doc",
            Some(ExternalId {
                public_id: None,
                system_id: Some("doc.dtd".to_string()),
            }),
            &resolver,
        );
        builder
            .internal_subset(r#"<!ENTITY % switch "IGNORE">"#, "doc.xml")
            .unwrap();
        let base = Url::parse("file:///d/doc.xml").unwrap();
        builder.load_external_subset(Some(&base)).unwrap();
        let dtd = builder.finish();
        assert!(dtd.declaration_errors().is_empty());
        assert_matches!(&dtd.element("doc").unwrap().content, ContentModel::Mixed(names) if names.contains("b"));
        assert!(dtd.element("ignored").is_none());
        assert!(dtd.element("b").is_none());
        assert!(dtd.element("included").is_some());
        let ext = dtd.entities().general("ext").unwrap();
        assert!(ext.externally_declared);
        assert_matches!(&ext.value, EntityValue::Internal(t) if t == "from external");
    }

    #[test]
    fn missing_external_subset_is_a_warning() {
        let resolver = Resolver::new(Box::new(MemoryLoader::new()));
        let mut builder = DtdBuilder::new(
            "doc",
            Some(ExternalId {
                public_id: Some("-//Nobody//DTD None//EN".to_string()),
                system_id: Some("none.dtd".to_string()),
            }),
            &resolver,
        );
        builder
            .load_external_subset(Some(&Url::parse("file:///d/doc.xml").unwrap()))
            .unwrap();
        let dtd = builder.finish();
        assert_matches!(dtd.warnings(), [ModelWarning::UnresolvedSubset { .. }]);
    }
}
