//! Lexical layer: decoding of the input bytes, tokenization of the document instance, and the
//! grammar of DTD markup declarations.

pub mod dtd;
pub mod encoding;
mod input;
pub mod lexer;
pub mod token;
pub mod types;

pub use crate::lexer::{
    char_ref_value, is_pubid_char, predefined_entity, read_entity_text, LexError, LexErrorKind, Lexer,
};
pub use crate::token::Token;

/// A location within the decoded text of a document or entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    /// byte offset into the decoded (UTF-8) text
    pub offset: usize,
}

impl Default for Position {
    fn default() -> Self {
        Position {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// [2] Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
pub fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

// [3] S ::= (#x20 | #x9 | #xD | #xA)+
pub fn is_whitespace(c: char) -> bool {
    matches!(c, '\x20' | '\x09' | '\x0d' | '\x0a')
}

pub fn is_whitespace_str(s: &str) -> bool {
    s.chars().all(is_whitespace)
}

// [4] NameStartChar
pub fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

// [4a] NameChar
pub fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9'
            | '\u{B7}'
            | '\u{0300}'..='\u{036F}'
            | '\u{203F}'..='\u{2040}')
}

/// `[5] Name`
pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start_char(c) => chars.all(is_name_char),
        _ => false,
    }
}

/// `[7] Nmtoken`
pub fn is_nmtoken(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_name_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert!(is_name("foo"));
        assert!(is_name("x:foo-bar.1"));
        assert!(!is_name("1foo"));
        assert!(!is_name(""));
        assert!(is_nmtoken("1foo"));
        assert!(!is_nmtoken("a b"));
    }

    #[test]
    fn chars() {
        assert!(is_xml_char('\t'));
        assert!(!is_xml_char('\u{0}'));
        assert!(!is_xml_char('\u{FFFE}'));
        assert!(is_whitespace_str(" \t\r\n"));
        assert!(!is_whitespace_str(" x "));
    }
}
