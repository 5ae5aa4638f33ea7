use crate::encoding::{DecodeError, Encoding};
use crate::input::Input;
use crate::token::{DoctypeDecl, RawAttribute, Token};
use crate::types::ExternalId;
use crate::{is_name_char, is_name_start_char, is_xml_char, Position};
use std::fmt;
use std::io;
use std::io::Read;

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub position: Position,
    pub kind: LexErrorKind,
}

/// A well-formedness error
#[derive(Debug, Clone, PartialEq)]
pub enum LexErrorKind {
    UnsupportedEncoding(String),
    InvalidEncoding(DecodeError),
    IllegalChar(char),
    Io(io::ErrorKind, String),
    /// input ended inside the named construct
    UnexpectedEof(&'static str),
    Expected(&'static str),
    DuplicateAttribute(String),
    LtInAttributeValue,
    CDataEndInText,
    DoubleHyphenInComment,
    ReservedPiTarget(String),
    MisplacedXmlDecl,
    InvalidCharRef(String),
    MismatchedEndTag { expected: String, found: String },
    UnexpectedEndTag(String),
    MissingRootElement,
    MultipleRootElements,
    TextOutsideRoot,
    MisplacedDoctype,
    UndeclaredEntity(String),
    UnparsedEntityReference(String),
    ExternalEntityInAttribute(String),
    /// an element or other construct begun inside an entity was not closed within it
    UnbalancedEntity(String),
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexErrorKind::UnsupportedEncoding(label) => write!(f, "unsupported encoding {:?}", label),
            LexErrorKind::InvalidEncoding(e) => write!(f, "{}", e),
            LexErrorKind::IllegalChar(c) => write!(f, "character U+{:04X} is not allowed", *c as u32),
            LexErrorKind::Io(_, msg) => write!(f, "read failed: {}", msg),
            LexErrorKind::UnexpectedEof(what) => write!(f, "input ended within {}", what),
            LexErrorKind::Expected(what) => write!(f, "expected {}", what),
            LexErrorKind::DuplicateAttribute(name) => write!(f, "attribute {} appears more than once", name),
            LexErrorKind::LtInAttributeValue => f.write_str("'<' is not allowed in attribute values"),
            LexErrorKind::CDataEndInText => f.write_str("']]>' is not allowed in character data"),
            LexErrorKind::DoubleHyphenInComment => f.write_str("'--' is not allowed within comments"),
            LexErrorKind::ReservedPiTarget(target) => {
                write!(f, "processing instruction target {} is reserved", target)
            }
            LexErrorKind::MisplacedXmlDecl => {
                f.write_str("XML declaration is only allowed at the start of the document")
            }
            LexErrorKind::InvalidCharRef(r) => write!(f, "invalid character reference &#{};", r),
            LexErrorKind::MismatchedEndTag { expected, found } => {
                write!(f, "end tag {} does not match start tag {}", found, expected)
            }
            LexErrorKind::UnexpectedEndTag(name) => write!(f, "end tag {} without start tag", name),
            LexErrorKind::MissingRootElement => f.write_str("document has no root element"),
            LexErrorKind::MultipleRootElements => f.write_str("extra content at the end of the document"),
            LexErrorKind::TextOutsideRoot => f.write_str("character data is not allowed outside the root element"),
            LexErrorKind::MisplacedDoctype => f.write_str("DOCTYPE declaration must precede the root element"),
            LexErrorKind::UndeclaredEntity(name) => write!(f, "entity {} is not declared", name),
            LexErrorKind::UnparsedEntityReference(name) => {
                write!(f, "reference to unparsed entity {}", name)
            }
            LexErrorKind::ExternalEntityInAttribute(name) => {
                write!(f, "attribute value references external entity {}", name)
            }
            LexErrorKind::UnbalancedEntity(name) => {
                write!(f, "replacement text of entity {} is not balanced", name)
            }
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.kind)
    }
}

impl std::error::Error for LexError {}

/// The replacement character of one of the five predefined entities
pub fn predefined_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Decodes the body of a character reference, the text between `&#` and `;`
pub fn char_ref_value(body: &str) -> Option<char> {
    let code = match body.strip_prefix('x') {
        Some(hex) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
            u32::from_str_radix(hex, 16).ok()?
        }
        Some(_) => return None,
        None if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) => body.parse().ok()?,
        None => return None,
    };
    std::char::from_u32(code).filter(|&c| is_xml_char(c))
}

enum Reference {
    Char(char),
    Entity(String),
}

/// Tokenizer for a document or an external parsed entity.
///
/// Tokens are produced one at a time from a `Read` source, which is decoded incrementally; no
/// more input is held in memory than the lookahead needed by the current token.
pub struct Lexer<R> {
    input: Input<R>,
    at_start: bool,
    /// text declarations (rather than XML declarations) are expected
    entity: bool,
    pending_ref: Option<(String, Position)>,
    token_position: Position,
}

impl<R: Read> Lexer<R> {
    /// Lexer for a document entity
    pub fn new(source: R) -> Result<Lexer<R>, LexError> {
        Ok(Lexer::with_input(Input::new(source)?, false, true))
    }

    /// Lexer for an external parsed entity, which may begin with a text declaration
    pub fn new_entity(source: R) -> Result<Lexer<R>, LexError> {
        Ok(Lexer::with_input(Input::new(source)?, true, true))
    }

    /// Lexer over the replacement text of an internal entity
    pub fn from_text(text: String) -> Lexer<R> {
        Lexer::with_input(Input::from_text(text), true, false)
    }

    fn with_input(input: Input<R>, entity: bool, at_start: bool) -> Lexer<R> {
        Lexer {
            input,
            at_start,
            entity,
            pending_ref: None,
            token_position: Position::default(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.input.encoding()
    }

    pub fn declared_encoding(&self) -> Option<&str> {
        self.input.declared_encoding()
    }

    /// The position of the next unread character
    pub fn position(&self) -> Position {
        self.input.position()
    }

    /// The position at which the most recently returned token started
    pub fn token_position(&self) -> Position {
        self.token_position
    }

    /// Releases the underlying source; subsequent calls to `next_token()` return `Token::Eof`
    pub fn close(&mut self) {
        self.pending_ref = None;
        self.input.close();
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some((name, position)) = self.pending_ref.take() {
            self.token_position = position;
            return Ok(Token::EntityRef(name));
        }
        let at_start = std::mem::replace(&mut self.at_start, false);
        self.token_position = self.input.position();
        match self.input.peek()? {
            None => Ok(Token::Eof),
            Some('<') => self.markup(at_start),
            Some(_) => self.text(),
        }
    }

    fn error(&self, kind: LexErrorKind) -> LexError {
        LexError {
            position: self.input.position(),
            kind,
        }
    }

    fn expect(&mut self, s: &'static str) -> Result<(), LexError> {
        if self.input.eat(s)? {
            Ok(())
        } else if self.input.peek()?.is_none() {
            Err(self.error(LexErrorKind::UnexpectedEof(s)))
        } else {
            Err(self.error(LexErrorKind::Expected(s)))
        }
    }

    fn markup(&mut self, at_start: bool) -> Result<Token, LexError> {
        if self.input.eat("<?")? {
            self.pi(at_start)
        } else if self.input.eat("</")? {
            self.end_tag()
        } else if self.input.eat("<!--")? {
            self.comment()
        } else if self.input.eat("<![CDATA[")? {
            let mut data = String::new();
            if !self.input.take_until("]]>", &mut data)? {
                return Err(self.error(LexErrorKind::UnexpectedEof("CDATA section")));
            }
            Ok(Token::CData(data))
        } else if self.input.eat("<!DOCTYPE")? {
            self.doctype()
        } else if self.input.starts_with("<!")? {
            Err(self.error(LexErrorKind::Expected(
                "comment, CDATA section or DOCTYPE declaration",
            )))
        } else {
            self.input.consume("<")?;
            self.start_tag()
        }
    }

    // [5] Name ::= NameStartChar (NameChar)*
    fn name(&mut self) -> Result<String, LexError> {
        match self.input.peek()? {
            Some(c) if is_name_start_char(c) => (),
            None => return Err(self.error(LexErrorKind::UnexpectedEof("name"))),
            Some(_) => return Err(self.error(LexErrorKind::Expected("name"))),
        }
        let mut name = String::new();
        while let Some(c) = self.input.peek()? {
            if !is_name_char(c) {
                break;
            }
            self.input.next_char()?;
            name.push(c);
        }
        Ok(name)
    }

    fn quoted(&mut self) -> Result<String, LexError> {
        let quote = match self.input.peek()? {
            Some(q @ '"') | Some(q @ '\'') => q,
            _ => return Err(self.error(LexErrorKind::Expected("quoted literal"))),
        };
        self.input.next_char()?;
        let mut value = String::new();
        let delim = if quote == '"' { "\"" } else { "'" };
        if !self.input.take_until(delim, &mut value)? {
            return Err(self.error(LexErrorKind::UnexpectedEof("literal")));
        }
        Ok(value)
    }

    fn text(&mut self) -> Result<Token, LexError> {
        let mut text = String::new();
        loop {
            match self.input.peek()? {
                None | Some('<') => break,
                Some('&') => {
                    let position = self.input.position();
                    match self.reference()? {
                        Reference::Char(c) => text.push(c),
                        Reference::Entity(name) => match predefined_entity(&name) {
                            Some(c) => text.push(c),
                            None if text.is_empty() => {
                                self.token_position = position;
                                return Ok(Token::EntityRef(name));
                            }
                            None => {
                                self.pending_ref = Some((name, position));
                                break;
                            }
                        },
                    }
                }
                Some(']') if self.input.starts_with("]]>")? => {
                    return Err(self.error(LexErrorKind::CDataEndInText))
                }
                Some(_) => {
                    if let Some(c) = self.input.next_char()? {
                        text.push(c);
                    }
                }
            }
        }
        Ok(Token::Text(text))
    }

    // [66] CharRef ::= '&#' [0-9]+ ';' | '&#x' [0-9a-fA-F]+ ';'
    // [68] EntityRef ::= '&' Name ';'
    fn reference(&mut self) -> Result<Reference, LexError> {
        self.input.consume("&")?;
        if self.input.eat("#")? {
            let position = self.input.position();
            let mut body = String::new();
            if !self.input.take_until(";", &mut body)? {
                return Err(self.error(LexErrorKind::UnexpectedEof("character reference")));
            }
            char_ref_value(&body)
                .map(Reference::Char)
                .ok_or(LexError {
                    position,
                    kind: LexErrorKind::InvalidCharRef(body),
                })
        } else {
            let name = self.name()?;
            self.expect(";")?;
            Ok(Reference::Entity(name))
        }
    }

    fn start_tag(&mut self) -> Result<Token, LexError> {
        let name = self.name()?;
        let mut attributes: Vec<RawAttribute> = vec![];
        loop {
            let spaced = self.input.skip_whitespace()?;
            if self.input.eat("/>")? {
                return Ok(Token::StartTag {
                    name,
                    attributes,
                    empty: true,
                });
            }
            if self.input.eat(">")? {
                return Ok(Token::StartTag {
                    name,
                    attributes,
                    empty: false,
                });
            }
            if self.input.peek()?.is_none() {
                return Err(self.error(LexErrorKind::UnexpectedEof("start tag")));
            }
            if !spaced {
                return Err(self.error(LexErrorKind::Expected("whitespace before attribute")));
            }
            let position = self.input.position();
            let attr_name = self.name()?;
            self.input.skip_whitespace()?;
            self.expect("=")?;
            self.input.skip_whitespace()?;
            let value = self.attribute_value()?;
            if attributes.iter().any(|a| a.name == attr_name) {
                return Err(LexError {
                    position,
                    kind: LexErrorKind::DuplicateAttribute(attr_name),
                });
            }
            attributes.push(RawAttribute {
                name: attr_name,
                value,
                position,
            });
        }
    }

    // [10] AttValue ::= '"' ([^<&"] | Reference)* '"' |  "'" ([^<&'] | Reference)* "'"
    fn attribute_value(&mut self) -> Result<String, LexError> {
        let quote = match self.input.peek()? {
            Some(q @ '"') | Some(q @ '\'') => q,
            _ => return Err(self.error(LexErrorKind::Expected("quoted attribute value"))),
        };
        self.input.next_char()?;
        let mut value = String::new();
        loop {
            match self.input.peek()? {
                None => return Err(self.error(LexErrorKind::UnexpectedEof("attribute value"))),
                Some(c) if c == quote => {
                    self.input.next_char()?;
                    return Ok(value);
                }
                Some('<') => return Err(self.error(LexErrorKind::LtInAttributeValue)),
                Some('&') => {
                    // checked for well-formedness here, but left for the reader to expand
                    match self.reference()? {
                        Reference::Char(c) => value.push_str(&format!("&#{};", c as u32)),
                        Reference::Entity(name) => {
                            value.push('&');
                            value.push_str(&name);
                            value.push(';');
                        }
                    }
                }
                Some(_) => {
                    if let Some(c) = self.input.next_char()? {
                        value.push(c);
                    }
                }
            }
        }
    }

    fn end_tag(&mut self) -> Result<Token, LexError> {
        let name = self.name()?;
        self.input.skip_whitespace()?;
        self.expect(">")?;
        Ok(Token::EndTag { name })
    }

    // [15] Comment ::= '<!--' ((Char - '-') | ('-' (Char - '-')))* '-->'
    fn comment(&mut self) -> Result<Token, LexError> {
        let mut text = String::new();
        loop {
            if self.input.eat("--")? {
                if self.input.eat(">")? {
                    return Ok(Token::Comment(text));
                }
                return Err(self.error(LexErrorKind::DoubleHyphenInComment));
            }
            match self.input.next_char()? {
                Some(c) => text.push(c),
                None => return Err(self.error(LexErrorKind::UnexpectedEof("comment"))),
            }
        }
    }

    // [16] PI ::= '<?' PITarget (S (Char* - (Char* '?>' Char*)))? '?>'
    fn pi(&mut self, at_start: bool) -> Result<Token, LexError> {
        let position = self.input.position();
        let target = self.name()?;
        if target == "xml" {
            if at_start {
                return self.xml_decl();
            }
            return Err(LexError {
                position,
                kind: LexErrorKind::MisplacedXmlDecl,
            });
        }
        if target.eq_ignore_ascii_case("xml") {
            return Err(LexError {
                position,
                kind: LexErrorKind::ReservedPiTarget(target),
            });
        }
        let mut data = String::new();
        if !self.input.eat("?>")? {
            if !self.input.skip_whitespace()? {
                return Err(self.error(LexErrorKind::Expected("whitespace after processing instruction target")));
            }
            if !self.input.take_until("?>", &mut data)? {
                return Err(self.error(LexErrorKind::UnexpectedEof("processing instruction")));
            }
        }
        Ok(Token::Pi { target, data })
    }

    // [23] XMLDecl ::= '<?xml' VersionInfo EncodingDecl? SDDecl? S? '?>'
    // [77] TextDecl ::= '<?xml' VersionInfo? EncodingDecl S? '?>'
    fn xml_decl(&mut self) -> Result<Token, LexError> {
        let mut version = None;
        let mut encoding = None;
        let mut standalone = None;
        loop {
            let spaced = self.input.skip_whitespace()?;
            if self.input.eat("?>")? {
                break;
            }
            if !spaced {
                return Err(self.error(LexErrorKind::Expected("whitespace in XML declaration")));
            }
            let position = self.input.position();
            let name = self.name()?;
            self.input.skip_whitespace()?;
            self.expect("=")?;
            self.input.skip_whitespace()?;
            let value = self.quoted()?;
            let bad = |kind| LexError { position, kind };
            match name.as_str() {
                "version" if version.is_none() && encoding.is_none() && standalone.is_none() => {
                    if !is_version_num(&value) {
                        return Err(bad(LexErrorKind::Expected("version number 1.x")));
                    }
                    version = Some(value);
                }
                "encoding" if encoding.is_none() && standalone.is_none() => {
                    if !is_encoding_name(&value) {
                        return Err(bad(LexErrorKind::Expected("encoding name")));
                    }
                    encoding = Some(value);
                }
                "standalone" if standalone.is_none() && !self.entity => {
                    standalone = Some(match value.as_str() {
                        "yes" => true,
                        "no" => false,
                        _ => return Err(bad(LexErrorKind::Expected("'yes' or 'no'"))),
                    });
                }
                _ => {
                    return Err(bad(LexErrorKind::Expected(
                        "version, encoding or standalone pseudo-attribute",
                    )))
                }
            }
        }
        if version.is_none() && !self.entity {
            return Err(self.error(LexErrorKind::Expected("version in XML declaration")));
        }
        if encoding.is_none() && self.entity {
            return Err(self.error(LexErrorKind::Expected("encoding in text declaration")));
        }
        if let Some(label) = &encoding {
            self.input.note_declared_encoding(label.clone());
        }
        Ok(Token::XmlDecl {
            version,
            encoding,
            standalone,
        })
    }

    // [28] doctypedecl ::= '<!DOCTYPE' S Name (S ExternalID)? S? ('[' intSubset ']' S?)? '>'
    fn doctype(&mut self) -> Result<Token, LexError> {
        if !self.input.skip_whitespace()? {
            return Err(self.error(LexErrorKind::Expected("whitespace after DOCTYPE")));
        }
        let name = self.name()?;
        let spaced = self.input.skip_whitespace()?;
        let external_id = if spaced
            && (self.input.starts_with("SYSTEM")? || self.input.starts_with("PUBLIC")?)
        {
            let id = self.external_id()?;
            self.input.skip_whitespace()?;
            Some(id)
        } else {
            None
        };
        let mut internal_subset = None;
        if self.input.eat("[")? {
            internal_subset = Some(self.internal_subset()?);
            self.input.skip_whitespace()?;
        }
        self.expect(">")?;
        Ok(Token::Doctype(DoctypeDecl {
            name,
            external_id,
            internal_subset,
        }))
    }

    fn external_id(&mut self) -> Result<ExternalId, LexError> {
        let public_id = if self.input.eat("PUBLIC")? {
            if !self.input.skip_whitespace()? {
                return Err(self.error(LexErrorKind::Expected("whitespace after PUBLIC")));
            }
            let position = self.input.position();
            let id = self.quoted()?;
            if !id.chars().all(is_pubid_char) {
                return Err(LexError {
                    position,
                    kind: LexErrorKind::Expected("public identifier characters"),
                });
            }
            Some(id)
        } else {
            self.expect("SYSTEM")?;
            None
        };
        if !self.input.skip_whitespace()? {
            return Err(self.error(LexErrorKind::Expected("whitespace before system literal")));
        }
        let system_id = Some(self.quoted()?);
        Ok(ExternalId {
            public_id,
            system_id,
        })
    }

    /// Captures the internal subset up to the closing `]`, skipping over comments, processing
    /// instructions and quoted literals which might contain that character
    fn internal_subset(&mut self) -> Result<String, LexError> {
        let mut text = String::new();
        loop {
            if self.skip_delimited("<!--", "-->", &mut text)?
                || self.skip_delimited("<?", "?>", &mut text)?
            {
                continue;
            }
            match self.input.next_char()? {
                None => return Err(self.error(LexErrorKind::UnexpectedEof("internal subset"))),
                Some(']') => return Ok(text),
                Some('<') => {
                    text.push('<');
                    self.raw_declaration(&mut text)?;
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn skip_delimited(&mut self, open: &str, close: &str, text: &mut String) -> Result<bool, LexError> {
        if !self.input.eat(open)? {
            return Ok(false);
        }
        text.push_str(open);
        if !self.input.take_until(close, text)? {
            return Err(self.error(LexErrorKind::UnexpectedEof("internal subset")));
        }
        text.push_str(close);
        Ok(true)
    }

    fn raw_declaration(&mut self, text: &mut String) -> Result<(), LexError> {
        loop {
            match self.input.next_char()? {
                None => return Err(self.error(LexErrorKind::UnexpectedEof("markup declaration"))),
                Some('>') => {
                    text.push('>');
                    return Ok(());
                }
                Some(q @ '"') | Some(q @ '\'') => {
                    text.push(q);
                    let delim = if q == '"' { "\"" } else { "'" };
                    if !self.input.take_until(delim, text)? {
                        return Err(self.error(LexErrorKind::UnexpectedEof("literal")));
                    }
                    text.push(q);
                }
                Some(c) => text.push(c),
            }
        }
    }
}

/// Reads the whole of an external entity (such as an external DTD subset) into a string,
/// decoding it and removing any leading text declaration
pub fn read_entity_text<R: Read>(source: R) -> Result<String, LexError> {
    let mut lexer = Lexer::new_entity(source)?;
    let mut text = String::new();
    if lexer.input.eat("<?")? {
        let target = lexer.name()?;
        if target == "xml" {
            lexer.xml_decl()?;
        } else {
            text.push_str("<?");
            text.push_str(&target);
        }
    }
    while let Some(c) = lexer.input.next_char()? {
        text.push(c);
    }
    Ok(text)
}

// [26] VersionNum ::= '1.' [0-9]+
fn is_version_num(v: &str) -> bool {
    match v.strip_prefix("1.") {
        Some(minor) => !minor.is_empty() && minor.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

// [81] EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*
fn is_encoding_name(v: &str) -> bool {
    let mut chars = v.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        _ => false,
    }
}

// [13] PubidChar ::= #x20 | #xD | #xA | [a-zA-Z0-9] | [-'()+,./:=?;!*#@$_%]
pub fn is_pubid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || " \r\n-'()+,./:=?;!*#@$_%".contains(c)
}
