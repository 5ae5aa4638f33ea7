//! A pull cursor over an XML document.
//!
//! The reader is advanced one node at a time with `read()` or `advance()`, exposing the current
//! node through accessors.  Depending on its options it expands entity references, supplies
//! attribute defaults from the DTD and validates the document as it goes; the validity verdict
//! is final once the whole document has been read.
//!
//! ```
//! use pullxml_reader::{NodeType, Reader, ReaderOptions};
//!
//! let mut reader = Reader::from_str("<greeting>hi</greeting>", ReaderOptions::default()).unwrap();
//! let mut names = vec![];
//! while reader.advance() {
//!     if reader.node_type() == NodeType::Element {
//!         names.push(reader.name().unwrap().to_string());
//!     }
//! }
//! assert_eq!(names, ["greeting"]);
//! assert!(reader.is_valid());
//! ```

mod error;
mod namespace;
mod node;
mod options;
pub mod report;

pub use crate::error::ReaderError;
pub use crate::namespace::{XMLNS_NAMESPACE, XML_NAMESPACE};
pub use crate::node::{NodeType, ReadState};
pub use crate::options::ReaderOptions;
pub use pullxml_model::attribute::Attribute;
pub use pullxml_validator::{ValidityError, Verdict};

use crate::namespace::NamespaceStack;
use crate::node::{split_qname, Node};
use pullxml_model::attribute::{normalize_value, AttributeValueError};
use pullxml_model::entity::{EntityTable, EntityValue, ExpansionGuard};
use pullxml_model::resolver::{file_url, Resolver};
use pullxml_model::{Dtd, DtdBuilder};
use pullxml_syntax::token::{DoctypeDecl, RawAttribute};
use pullxml_syntax::{is_whitespace_str, LexError, LexErrorKind, Lexer, Position, Token};
use pullxml_validator::{Location, ValidityErrorKind, Validator};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, trace, warn};
use url::Url;

/// An input being tokenized: the document itself, or the content of an entity referenced from it
struct Frame {
    lexer: Lexer<Box<dyn Read>>,
    /// `None` for the document
    entity: Option<String>,
    /// content fed to the validator but not reported
    hidden: bool,
    /// replacement text read from a resource, accounted for when the frame ends
    external: bool,
    /// number of open elements when the frame was entered
    open_at_entry: usize,
}

struct OpenElement {
    name: String,
    /// number of input frames when the start tag was read
    frames: usize,
    /// `xml:space` in scope: `Some(true)` for `preserve`, `Some(false)` for `default`
    preserve_space: Option<bool>,
}

pub struct Reader {
    options: ReaderOptions,
    resolver: Resolver,
    url: Option<Url>,
    frames: Vec<Frame>,
    lookahead: Option<Token>,
    open: Vec<OpenElement>,
    /// open elements which have been reported
    depth: usize,
    namespaces: NamespaceStack,
    /// the current node is an end tag or empty element, whose namespace scope ends with it
    pop_scope: bool,
    seen_doctype: bool,
    seen_root: bool,
    root_closed: bool,
    dtd: Option<Rc<Dtd>>,
    /// the predefined entities, for documents without a DTD
    entities: EntityTable,
    validator: Option<Validator>,
    guard: ExpansionGuard,
    encoding: Option<String>,
    node: Node,
    state: ReadState,
    finished: bool,
    error: Option<ReaderError>,
    warnings: Vec<String>,
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("state", &self.state)
            .field("node_type", &self.node.node_type)
            .field("depth", &self.depth)
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl Reader {
    pub fn from_path(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Reader, ReaderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ReaderError::Resource {
            path: path.display().to_string(),
            error: Rc::new(e),
        })?;
        Reader::from_reader(BufReader::new(file), file_url(path), options)
    }

    /// Reads a document from any byte source.  Relative system identifiers in the document are
    /// resolved against `base`, or against the current directory when there is none.
    pub fn from_reader(
        source: impl Read + 'static,
        base: Option<Url>,
        options: ReaderOptions,
    ) -> Result<Reader, ReaderError> {
        let source: Box<dyn Read> = Box::new(source);
        let lexer = Lexer::new(source)?;
        let guard = ExpansionGuard::new(options.max_entity_depth, options.max_expansion);
        Ok(Reader {
            options,
            resolver: Resolver::default(),
            url: base,
            frames: vec![Frame {
                lexer,
                entity: None,
                hidden: false,
                external: false,
                open_at_entry: 0,
            }],
            lookahead: None,
            open: vec![],
            depth: 0,
            namespaces: NamespaceStack::default(),
            pop_scope: false,
            seen_doctype: false,
            seen_root: false,
            root_closed: false,
            dtd: None,
            entities: EntityTable::new(),
            validator: None,
            guard,
            encoding: None,
            node: Node::none(),
            state: ReadState::Initial,
            finished: false,
            error: None,
            warnings: vec![],
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str, options: ReaderOptions) -> Result<Reader, ReaderError> {
        Reader::from_reader(Cursor::new(text.as_bytes().to_vec()), None, options)
    }

    /// Replaces the resolver used for the external DTD subset and external entities, for
    /// instance with one consulting a catalog
    pub fn with_resolver(mut self, resolver: Resolver) -> Reader {
        self.resolver = resolver;
        self
    }

    /// Moves to the next node.  `Ok(false)` once the document is exhausted, and after an error
    /// or `close()`.
    pub fn read(&mut self) -> Result<bool, ReaderError> {
        match self.state {
            ReadState::Error | ReadState::EndOfFile | ReadState::Closed => return Ok(false),
            ReadState::Initial => self.state = ReadState::Interactive,
            ReadState::Interactive => (),
        }
        if self.pop_scope {
            self.namespaces.pop_scope();
            self.pop_scope = false;
        }
        match self.next_node() {
            Ok(Some(node)) => {
                self.node = node;
                Ok(true)
            }
            Ok(None) => {
                self.node = Node::none();
                self.state = ReadState::EndOfFile;
                self.finished = true;
                if let Some(validator) = &mut self.validator {
                    validator.finalize();
                }
                self.release_inputs();
                Ok(false)
            }
            Err(e) => {
                debug!("stopped at {}", e);
                self.node = Node::none();
                self.state = ReadState::Error;
                self.error = Some(e.clone());
                self.release_inputs();
                Err(e)
            }
        }
    }

    /// Like `read()`, with any error left for `error()`
    pub fn advance(&mut self) -> bool {
        self.read().unwrap_or(false)
    }

    /// Stops reading, releasing the document and any entity being read.  Further calls have no
    /// effect.
    pub fn close(&mut self) {
        self.release_inputs();
        self.lookahead = None;
        self.node = Node::none();
        self.state = ReadState::Closed;
    }

    pub fn node_type(&self) -> NodeType {
        self.node.node_type
    }

    /// The qualified name of an element, the target of a processing instruction, the name of an
    /// entity reference or document type, or `#text`, `#comment` and `#cdata-section`
    pub fn name(&self) -> Option<&str> {
        match self.node.node_type {
            NodeType::None => None,
            _ => Some(&self.node.name),
        }
    }

    pub fn local_name(&self) -> Option<&str> {
        self.name().map(|_| self.node.local_name())
    }

    pub fn prefix(&self) -> Option<&str> {
        self.node.prefix()
    }

    pub fn namespace_uri(&self) -> Option<&str> {
        self.node.namespace_uri.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.node.value.as_deref()
    }

    pub fn has_value(&self) -> bool {
        self.node.node_type.has_value()
    }

    pub fn depth(&self) -> usize {
        self.node.depth
    }

    /// True for an element written as `<name/>`
    pub fn is_empty_element(&self) -> bool {
        self.node.empty
    }

    /// The attributes of the current element, in document order followed by any defaulted
    /// from the DTD
    pub fn attributes(&self) -> &[Attribute] {
        &self.node.attributes
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.node
            .attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn attribute_count(&self) -> usize {
        self.node.attributes.len()
    }

    /// The encoding named in the XML declaration
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// `Unknown` until the document has been completely read, unless an error has already been
    /// found.  A document which is not validated is `Valid` once read without fatal errors.
    pub fn verdict(&self) -> Verdict {
        if self.error.is_some() {
            return Verdict::Invalid;
        }
        match &self.validator {
            Some(validator) => validator.verdict(),
            None if self.finished => Verdict::Valid,
            None => Verdict::Unknown,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verdict() == Verdict::Valid
    }

    pub fn validity_errors(&self) -> &[ValidityError] {
        self.validator.as_ref().map_or(&[], |v| v.errors())
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.validator.as_ref()
    }

    pub fn dtd(&self) -> Option<&Rc<Dtd>> {
        self.dtd.as_ref()
    }

    /// Problems which did not stop the document being read, such as an external resource which
    /// could not be loaded
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn read_state(&self) -> ReadState {
        self.state
    }

    pub fn error(&self) -> Option<&ReaderError> {
        self.error.as_ref()
    }

    /// Where the current node starts in the document.  Nodes from the content of an entity
    /// are located at the entity reference.
    pub fn location(&self) -> Position {
        self.node.position
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    fn release_inputs(&mut self) {
        for frame in &mut self.frames {
            frame.lexer.close();
        }
        self.frames.clear();
    }

    fn position(&self) -> Position {
        self.frames
            .first()
            .map_or(self.node.position, |f| f.lexer.token_position())
    }

    fn lex_error(&self, kind: LexErrorKind) -> ReaderError {
        ReaderError::Lex(LexError {
            position: self.position(),
            kind,
        })
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn next_token(&mut self) -> Result<Token, ReaderError> {
        if let Some(token) = self.lookahead.take() {
            return Ok(token);
        }
        loop {
            let frame = match self.frames.last_mut() {
                Some(frame) => frame,
                None => return Ok(Token::Eof),
            };
            let in_entity = frame.entity.is_some();
            match frame.lexer.next_token()? {
                Token::Eof if in_entity => self.leave_entity()?,
                token => return Ok(token),
            }
        }
    }

    fn next_node(&mut self) -> Result<Option<Node>, ReaderError> {
        let mut text: Option<(String, Position)> = None;
        loop {
            let token = self.next_token()?;
            if self.frames.last().map_or(false, |f| f.hidden) {
                self.hidden_token(token)?;
                continue;
            }
            match token {
                Token::Text(s) => {
                    let position = self.position();
                    text.get_or_insert_with(|| (String::new(), position)).0.push_str(&s);
                }
                // the text declaration of an external entity
                Token::XmlDecl { .. } if self.frames.len() > 1 => {}
                Token::EntityRef(name)
                    if self.options.substitute_entities && self.is_expandable(&name) =>
                {
                    self.check_reference(&name)?;
                    self.enter_entity(&name, false)?;
                }
                token => {
                    if let Some((buf, position)) = text.take() {
                        self.lookahead = Some(token);
                        match self.text_node(buf, position)? {
                            Some(node) => return Ok(Some(node)),
                            None => continue,
                        }
                    }
                    if let Token::Eof = token {
                        self.end_of_document()?;
                        return Ok(None);
                    }
                    if let Some(node) = self.token_node(token)? {
                        return Ok(Some(node));
                    }
                }
            }
        }
    }

    fn token_node(&mut self, token: Token) -> Result<Option<Node>, ReaderError> {
        let position = self.position();
        let node = match token {
            Token::XmlDecl { encoding, .. } => {
                if self.frames.len() == 1 {
                    self.encoding = encoding;
                }
                return Ok(None);
            }
            Token::Doctype(decl) => self.doctype(decl)?,
            Token::StartTag {
                name,
                attributes,
                empty,
            } => self.start_element(name, attributes, empty)?,
            Token::EndTag { name } => self.end_element(name)?,
            Token::CData(text) => {
                if self.open.is_empty() {
                    return Err(self.lex_error(LexErrorKind::TextOutsideRoot));
                }
                if let Some(validator) = &mut self.validator {
                    validator.observe_text(&text, position);
                }
                Node::with_value(NodeType::CData, text, self.depth, position)
            }
            Token::Comment(text) => {
                self.observe_markup(position);
                Node::with_value(NodeType::Comment, text, self.depth, position)
            }
            Token::Pi { target, data } => {
                self.observe_markup(position);
                Node {
                    value: Some(data),
                    ..Node::new(NodeType::ProcessingInstruction, target, self.depth, position)
                }
            }
            Token::EntityRef(name) => self.entity_reference(name)?,
            Token::Text(_) | Token::Eof => return Ok(None),
        };
        Ok(Some(node))
    }

    /// Content of an entity which is reported as a reference but still has to be validated
    fn hidden_token(&mut self, token: Token) -> Result<(), ReaderError> {
        let position = self.position();
        match token {
            Token::StartTag {
                name,
                attributes,
                empty,
            } => {
                let attributes = self.element_attributes(&name, attributes)?;
                if let Some(validator) = &mut self.validator {
                    validator.observe_start_element(&name, &attributes, position);
                    if empty {
                        validator.observe_end_element(&name, position);
                    }
                }
                if !empty {
                    let open = self.open_element(name, &attributes);
                    self.open.push(open);
                }
            }
            Token::EndTag { name } => {
                self.close_element(&name)?;
                if let Some(validator) = &mut self.validator {
                    validator.observe_end_element(&name, position);
                }
            }
            Token::Text(text) | Token::CData(text) => {
                if let Some(validator) = &mut self.validator {
                    validator.observe_text(&text, position);
                }
            }
            Token::Comment(_) | Token::Pi { .. } => self.observe_markup(position),
            Token::EntityRef(name) => {
                self.check_reference(&name)?;
                if self.is_expandable(&name) {
                    self.enter_entity(&name, true)?;
                }
            }
            Token::Doctype(_) => return Err(self.lex_error(LexErrorKind::MisplacedDoctype)),
            Token::XmlDecl { .. } | Token::Eof => (),
        }
        Ok(())
    }

    fn observe_markup(&mut self, position: Position) {
        if let Some(validator) = &mut self.validator {
            validator.observe_markup(position);
        }
    }

    fn doctype(&mut self, decl: DoctypeDecl) -> Result<Node, ReaderError> {
        let position = self.position();
        if self.seen_doctype || self.seen_root || self.frames.len() > 1 {
            return Err(self.lex_error(LexErrorKind::MisplacedDoctype));
        }
        self.seen_doctype = true;
        let guard = ExpansionGuard::new(self.options.max_entity_depth, self.options.max_expansion);
        let mut builder = DtdBuilder::new(&decl.name, decl.external_id.clone(), &self.resolver).with_guard(guard);
        let origin = self
            .url
            .as_ref()
            .map_or_else(|| "internal subset".to_string(), Url::to_string);
        let mut result = match &decl.internal_subset {
            Some(subset) => builder.internal_subset(subset, &origin),
            None => Ok(()),
        };
        if result.is_ok() && self.options.loads_external_dtd() {
            result = builder.load_external_subset(self.url.as_ref());
        }
        let dtd = Rc::new(builder.finish());
        debug!("document type {}: {:?}", decl.name, dtd);
        for w in dtd.warnings() {
            self.warn(w.to_string());
        }
        self.dtd = Some(dtd.clone());
        result?;
        if self.options.validate {
            self.validator = Some(Validator::new(Some(dtd)));
        }
        Ok(Node::new(NodeType::DocumentType, decl.name, 0, position))
    }

    fn start_element(
        &mut self,
        name: String,
        raw: Vec<RawAttribute>,
        empty: bool,
    ) -> Result<Node, ReaderError> {
        let position = self.position();
        if self.open.is_empty() {
            if self.root_closed {
                return Err(self.lex_error(LexErrorKind::MultipleRootElements));
            }
            self.seen_root = true;
            if self.options.validate && self.validator.is_none() {
                self.validator = Some(Validator::new(self.dtd.clone()));
            }
        }
        let attributes = self.element_attributes(&name, raw)?;
        if let Some(validator) = &mut self.validator {
            validator.observe_start_element(&name, &attributes, position);
            if empty {
                validator.observe_end_element(&name, position);
            }
        }

        self.namespaces.push_scope(&attributes);
        let namespace_uri = self.namespace_of(&name);
        if namespace_uri.is_err() {
            self.warn(format!("{}: namespace prefix of {} is not declared", position, name));
        }
        for attr in &attributes {
            if self.namespace_of(&attr.name).is_err() {
                self.warn(format!(
                    "{}: namespace prefix of attribute {} is not declared",
                    position, attr.name
                ));
            }
        }

        let depth = self.depth;
        if empty {
            self.pop_scope = true;
            if self.open.is_empty() {
                self.root_closed = true;
            }
        } else {
            let open = self.open_element(name.clone(), &attributes);
            self.open.push(open);
            self.depth += 1;
        }
        Ok(Node {
            namespace_uri: namespace_uri.unwrap_or_default(),
            empty,
            attributes,
            ..Node::new(NodeType::Element, name, depth, position)
        })
    }

    fn open_element(&self, name: String, attributes: &[Attribute]) -> OpenElement {
        let preserve_space = match attributes.iter().find(|a| a.name == "xml:space") {
            Some(a) if a.value == "preserve" => Some(true),
            Some(a) if a.value == "default" => Some(false),
            _ => self.open.last().and_then(|open| open.preserve_space),
        };
        OpenElement {
            name,
            frames: self.frames.len(),
            preserve_space,
        }
    }

    fn end_element(&mut self, name: String) -> Result<Node, ReaderError> {
        let position = self.position();
        self.close_element(&name)?;
        if let Some(validator) = &mut self.validator {
            validator.observe_end_element(&name, position);
        }
        self.depth -= 1;
        self.pop_scope = true;
        if self.open.is_empty() {
            self.root_closed = true;
        }
        Ok(Node {
            namespace_uri: self.namespace_of(&name).unwrap_or_default(),
            ..Node::new(NodeType::EndElement, name, self.depth, position)
        })
    }

    /// Matches an end tag against the innermost open element
    fn close_element(&mut self, name: &str) -> Result<(), ReaderError> {
        let open = match self.open.pop() {
            Some(open) => open,
            None => return Err(self.lex_error(LexErrorKind::UnexpectedEndTag(name.to_string()))),
        };
        if open.name != name {
            return Err(self.lex_error(LexErrorKind::MismatchedEndTag {
                expected: open.name,
                found: name.to_string(),
            }));
        }
        if open.frames != self.frames.len() {
            let entity = self
                .frames
                .last()
                .and_then(|f| f.entity.clone())
                .unwrap_or_default();
            return Err(self.lex_error(LexErrorKind::UnbalancedEntity(entity)));
        }
        Ok(())
    }

    fn namespace_of(&self, qname: &str) -> Result<Option<String>, ()> {
        if qname == "xmlns" {
            return Ok(Some(XMLNS_NAMESPACE.to_string()));
        }
        let prefix = split_qname(qname).0;
        self.namespaces
            .resolve(prefix)
            .map(|uri| uri.map(str::to_string))
    }

    /// Normalises the attribute values of a start tag, adding defaults from the DTD when
    /// configured to
    fn element_attributes(&mut self, element: &str, raw: Vec<RawAttribute>) -> Result<Vec<Attribute>, ReaderError> {
        let entities = match &self.dtd {
            Some(dtd) => dtd.entities(),
            None => &self.entities,
        };
        let mut attributes = Vec::with_capacity(raw.len());
        for attr in raw {
            let tokenized = self
                .dtd
                .as_ref()
                .and_then(|dtd| dtd.attribute(element, &attr.name))
                .map_or(false, |def| def.att_type.is_tokenized());
            let value = normalize_value(&attr.value, tokenized, entities, &mut self.guard).map_err(
                |error| match error {
                    AttributeValueError::Expansion(error) => ReaderError::EntityExpansion {
                        position: attr.position,
                        error,
                    },
                    error => ReaderError::AttributeValue {
                        position: attr.position,
                        attribute: attr.name.clone(),
                        error,
                    },
                },
            )?;
            attributes.push(Attribute::new(attr.name, value));
        }
        if self.options.default_attributes {
            if let Some(dtd) = &self.dtd {
                dtd.apply_defaults(element, &mut attributes);
            }
        }
        Ok(attributes)
    }

    fn text_node(&mut self, text: String, position: Position) -> Result<Option<Node>, ReaderError> {
        let whitespace = is_whitespace_str(&text);
        let parent = match self.open.last() {
            Some(open) => open,
            None if whitespace => return Ok(None),
            None => {
                return Err(ReaderError::Lex(LexError {
                    position,
                    kind: LexErrorKind::TextOutsideRoot,
                }))
            }
        };
        let ignorable = match parent.preserve_space {
            Some(preserve) => !preserve,
            None => {
                self.validator.is_some()
                    && self
                        .dtd
                        .as_ref()
                        .map_or(false, |dtd| dtd.has_element_content(&parent.name))
            }
        };
        if let Some(validator) = &mut self.validator {
            validator.observe_text(&text, position);
        }
        let node_type = if !whitespace {
            NodeType::Text
        } else if ignorable {
            NodeType::Whitespace
        } else {
            NodeType::SignificantWhitespace
        };
        Ok(Some(Node::with_value(node_type, text, self.depth, position)))
    }

    /// A reference which is reported rather than substituted.  When validating, the entity's
    /// content is still read, in a hidden frame.
    fn entity_reference(&mut self, name: String) -> Result<Node, ReaderError> {
        let position = self.position();
        self.check_reference(&name)?;
        let node = Node::new(NodeType::EntityReference, name, self.depth, position);
        if self.validator.is_some() && self.is_expandable(&node.name) {
            self.enter_entity(&node.name, true)?;
        }
        Ok(node)
    }

    /// Well-formedness constraints on a general entity reference in content
    fn check_reference(&mut self, name: &str) -> Result<(), ReaderError> {
        if self.open.is_empty() {
            return Err(self.lex_error(LexErrorKind::TextOutsideRoot));
        }
        let entity = self.dtd.as_ref().and_then(|dtd| dtd.entities().general(name));
        match entity {
            Some(entity) if entity.is_unparsed() => {
                Err(self.lex_error(LexErrorKind::UnparsedEntityReference(name.to_string())))
            }
            Some(_) => Ok(()),
            None => {
                // the declaration may be in a part of the DTD which was not read
                let incomplete = self.dtd.as_ref().map_or(false, |dtd| dtd.has_external_parts());
                if !incomplete {
                    return Err(self.lex_error(LexErrorKind::UndeclaredEntity(name.to_string())));
                }
                let position = self.position();
                self.warn(format!("{}: entity {} is not declared", position, name));
                if let Some(validator) = &mut self.validator {
                    validator.observe_entity_reference(name, position);
                }
                Ok(())
            }
        }
    }

    fn is_expandable(&self, name: &str) -> bool {
        match self.dtd.as_ref().and_then(|dtd| dtd.entities().general(name)) {
            Some(entity) if entity.is_unparsed() => false,
            Some(entity) if entity.is_external() => self.options.loads_external_entities(),
            Some(_) => true,
            None => false,
        }
    }

    fn enter_entity(&mut self, name: &str, hidden: bool) -> Result<(), ReaderError> {
        let entity = match self.dtd.as_ref().and_then(|dtd| dtd.entities().general(name)) {
            Some(entity) => entity.clone(),
            None => return Ok(()),
        };
        let position = self.position();
        self.guard
            .enter(name)
            .map_err(|error| ReaderError::EntityExpansion { position, error })?;
        let external = entity.is_external();
        let lexer = match entity.value {
            EntityValue::Internal(text) => {
                trace!("expanding &{}; ({} bytes)", name, text.len());
                if let Err(error) = self.guard.account(text.len()) {
                    self.guard.leave();
                    return Err(ReaderError::EntityExpansion { position, error });
                }
                Lexer::from_text(text)
            }
            EntityValue::External { id, base, .. } => {
                match self
                    .resolver
                    .resolve(
                        id.public_id.as_deref(),
                        id.system_id.as_deref(),
                        base.as_ref().or(self.url.as_ref()),
                    )
                {
                    Ok(resource) => {
                        debug!("reading &{}; from {}", name, resource.url);
                        Lexer::new_entity(resource.reader)?
                    }
                    Err(e) => {
                        self.guard.leave();
                        let message = format!("{}: could not load entity &{};: {}", position, name, e);
                        if let Some(validator) = &mut self.validator {
                            validator.record(
                                ValidityErrorKind::IncompleteDtd(message.clone()),
                                Location::Document(position),
                            );
                        }
                        self.warn(message);
                        return Ok(());
                    }
                }
            }
        };
        self.frames.push(Frame {
            lexer,
            entity: Some(name.to_string()),
            hidden,
            external,
            open_at_entry: self.open.len(),
        });
        Ok(())
    }

    fn leave_entity(&mut self) -> Result<(), ReaderError> {
        if let Some(frame) = self.frames.pop() {
            self.guard.leave();
            if frame.external {
                let position = self.position();
                self.guard
                    .account(frame.lexer.token_position().offset)
                    .map_err(|error| ReaderError::EntityExpansion { position, error })?;
            }
            if self.open.len() != frame.open_at_entry {
                let name = frame.entity.unwrap_or_default();
                return Err(self.lex_error(LexErrorKind::UnbalancedEntity(name)));
            }
        }
        Ok(())
    }

    fn end_of_document(&mut self) -> Result<(), ReaderError> {
        if !self.open.is_empty() {
            return Err(self.lex_error(LexErrorKind::UnexpectedEof("element")));
        }
        if !self.seen_root {
            return Err(self.lex_error(LexErrorKind::MissingRootElement));
        }
        Ok(())
    }
}
