use pullxml_model::attribute::AttributeValueError;
use pullxml_model::entity::ExpansionError;
use pullxml_model::ModelError;
use pullxml_syntax::{LexError, Position};
use std::fmt;
use std::io;
use std::rc::Rc;

/// A fatal error, after which the reader produces no further nodes
#[derive(Debug, Clone)]
pub enum ReaderError {
    /// the document could not be opened
    Resource { path: String, error: Rc<io::Error> },
    Lex(LexError),
    Dtd(Rc<ModelError>),
    EntityExpansion {
        position: Position,
        error: ExpansionError,
    },
    AttributeValue {
        position: Position,
        attribute: String,
        error: AttributeValueError,
    },
}

impl ReaderError {
    pub fn position(&self) -> Option<Position> {
        match self {
            ReaderError::Resource { .. } | ReaderError::Dtd(_) => None,
            ReaderError::Lex(e) => Some(e.position),
            ReaderError::EntityExpansion { position, .. }
            | ReaderError::AttributeValue { position, .. } => Some(*position),
        }
    }

    /// Renders the error as a diagnostic.  DTD errors carry spans in the DTD's own codemap
    /// (see `Reader::dtd()`); the others are labelled against `file`, the document source.
    pub fn diagnostic(&self, file: Option<&codemap::File>) -> codemap_diagnostic::Diagnostic {
        if let ReaderError::Dtd(e) = self {
            return e.diagnostic();
        }
        let spans = match (file, self.position()) {
            (Some(file), Some(pos)) => {
                let start = pos.offset.min(file.source().len()) as u64;
                vec![codemap_diagnostic::SpanLabel {
                    span: file.span.subspan(start, start),
                    label: None,
                    style: codemap_diagnostic::SpanStyle::Primary,
                }]
            }
            _ => vec![],
        };
        codemap_diagnostic::Diagnostic {
            level: codemap_diagnostic::Level::Error,
            message: match self {
                ReaderError::Lex(e) => e.kind.to_string(),
                _ => self.to_string(),
            },
            code: None,
            spans,
        }
    }
}

impl From<LexError> for ReaderError {
    fn from(e: LexError) -> Self {
        ReaderError::Lex(e)
    }
}

impl From<ModelError> for ReaderError {
    fn from(e: ModelError) -> Self {
        ReaderError::Dtd(Rc::new(e))
    }
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::Resource { path, error } => write!(f, "Unable to open {}: {}", path, error),
            ReaderError::Lex(e) => write!(f, "{}", e),
            ReaderError::Dtd(e) => write!(f, "{}", e),
            ReaderError::EntityExpansion { position, error } => write!(f, "{}: {}", position, error),
            ReaderError::AttributeValue {
                position,
                attribute,
                error,
            } => write!(f, "{}: attribute {}: {}", position, attribute, error),
        }
    }
}

impl std::error::Error for ReaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReaderError::Resource { error, .. } => Some(error.as_ref()),
            ReaderError::Lex(e) => Some(e),
            ReaderError::Dtd(e) => Some(e.as_ref()),
            ReaderError::EntityExpansion { error, .. } => Some(error),
            ReaderError::AttributeValue { error, .. } => Some(error),
        }
    }
}
