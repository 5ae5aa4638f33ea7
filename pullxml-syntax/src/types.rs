use std::ops::Range;

/// Byte range within the text a declaration was parsed from
pub type Span = Range<usize>;

// [75] ExternalID ::= 'SYSTEM' S SystemLiteral | 'PUBLIC' S PubidLiteral S SystemLiteral
// [83] PublicID ::= 'PUBLIC' S PubidLiteral
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExternalId {
    pub public_id: Option<String>,
    /// may only be absent in a notation declaration
    pub system_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    Once,
    /// `?`
    Optional,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Particle {
    Name(String),
    /// `(a, b, c)`
    Seq(Vec<ContentParticle>),
    /// `(a | b | c)`
    Choice(Vec<ContentParticle>),
}

// [48] cp ::= (Name | choice | seq) ('?' | '*' | '+')?
#[derive(Debug, Clone, PartialEq)]
pub struct ContentParticle {
    pub particle: Particle,
    pub occurrence: Occurrence,
}

// [46] contentspec ::= 'EMPTY' | 'ANY' | Mixed | children
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSpec {
    Empty,
    Any,
    /// `(#PCDATA | a | b)*`, holding the names of the permitted child elements
    Mixed(Vec<String>),
    Children(ContentParticle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementDecl {
    pub span: Span,
    pub name: String,
    pub content: ContentSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttType {
    CData,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    Notation(Vec<String>),
    Enumeration(Vec<String>),
}

impl AttType {
    /// True for every type other than CDATA, whose values are subject to additional
    /// whitespace normalisation
    pub fn is_tokenized(&self) -> bool {
        !matches!(self, AttType::CData)
    }
}

// [60] DefaultDecl ::= '#REQUIRED' | '#IMPLIED' | (('#FIXED' S)? AttValue)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultDecl {
    Required,
    Implied,
    /// the raw attribute value literal, with references not yet expanded
    Fixed(String),
    Value(String),
}

impl DefaultDecl {
    pub fn value(&self) -> Option<&str> {
        match self {
            DefaultDecl::Fixed(v) | DefaultDecl::Value(v) => Some(v),
            DefaultDecl::Required | DefaultDecl::Implied => None,
        }
    }
}

// [53] AttDef ::= S Name S AttType S DefaultDecl
#[derive(Debug, Clone, PartialEq)]
pub struct AttDef {
    pub name: String,
    pub att_type: AttType,
    pub default: DefaultDecl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttlistDecl {
    pub span: Span,
    pub element: String,
    pub defs: Vec<AttDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityDef {
    /// the literal entity value, before character and parameter-entity references are expanded
    Internal(String),
    External {
        id: ExternalId,
        /// the notation of an unparsed entity
        ndata: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityDecl {
    pub span: Span,
    pub name: String,
    /// `<!ENTITY % name ...>`
    pub parameter: bool,
    pub def: EntityDef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotationDecl {
    pub span: Span,
    pub name: String,
    pub id: ExternalId,
}

// [29] markupdecl ::= elementdecl | AttlistDecl | EntityDecl | NotationDecl | PI | Comment
#[derive(Debug, Clone, PartialEq)]
pub enum MarkupDecl {
    Element(ElementDecl),
    Attlist(AttlistDecl),
    Entity(EntityDecl),
    Notation(NotationDecl),
}

/// One top-level item of an internal or external DTD subset
#[derive(Debug, Clone, PartialEq)]
pub enum DeclItem {
    Whitespace,
    Comment,
    Pi {
        target: String,
        data: String,
    },
    /// `%name;` between declarations
    PeReference { span: Span, name: String },
    /// the unparsed text of a markup declaration, which may still contain parameter-entity
    /// references
    Markup { span: Span, text: String },
    /// `<![ keyword [ body ]]>`, where the keyword may be a parameter-entity reference
    Conditional {
        span: Span,
        keyword: String,
        body: String,
    },
}
