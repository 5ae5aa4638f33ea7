use crate::types::ExternalId;
use crate::Position;

/// An attribute as written in a start tag.  The value is the literal text between the quotes
/// (after line-ending normalisation) with references not yet expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttribute {
    pub name: String,
    pub value: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoctypeDecl {
    pub name: String,
    pub external_id: Option<ExternalId>,
    /// text between `[` and `]`, comments and processing instructions included
    pub internal_subset: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `<?xml ...?>`; in an external parsed entity this is the text declaration, where the
    /// version may be absent
    XmlDecl {
        version: Option<String>,
        encoding: Option<String>,
        standalone: Option<bool>,
    },
    Doctype(DoctypeDecl),
    StartTag {
        name: String,
        attributes: Vec<RawAttribute>,
        empty: bool,
    },
    EndTag {
        name: String,
    },
    /// character data, with character references and the predefined entities already decoded
    Text(String),
    CData(String),
    /// a reference to any entity other than the five predefined ones
    EntityRef(String),
    Comment(String),
    Pi {
        target: String,
        data: String,
    },
    Eof,
}
