use pullxml_model::attribute::Attribute;
use pullxml_syntax::Position;

/// The kind of node the reader is positioned on.  The numeric codes are those of the
/// DOM/XmlTextReader node type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    None,
    Element,
    Text,
    CData,
    EntityReference,
    ProcessingInstruction,
    Comment,
    DocumentType,
    /// white space in element content, which the DTD makes insignificant
    Whitespace,
    SignificantWhitespace,
    EndElement,
}

impl NodeType {
    pub fn code(self) -> u8 {
        match self {
            NodeType::None => 0,
            NodeType::Element => 1,
            NodeType::Text => 3,
            NodeType::CData => 4,
            NodeType::EntityReference => 5,
            NodeType::ProcessingInstruction => 7,
            NodeType::Comment => 8,
            NodeType::DocumentType => 10,
            NodeType::Whitespace => 13,
            NodeType::SignificantWhitespace => 14,
            NodeType::EndElement => 15,
        }
    }

    pub fn has_value(self) -> bool {
        matches!(
            self,
            NodeType::Text
                | NodeType::CData
                | NodeType::ProcessingInstruction
                | NodeType::Comment
                | NodeType::Whitespace
                | NodeType::SignificantWhitespace
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Initial,
    Interactive,
    Error,
    EndOfFile,
    Closed,
}

/// The node the reader is currently positioned on
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub node_type: NodeType,
    /// qualified name, or `#text` and friends for nodes which have none
    pub name: String,
    pub namespace_uri: Option<String>,
    pub value: Option<String>,
    pub depth: usize,
    pub empty: bool,
    pub attributes: Vec<Attribute>,
    pub position: Position,
}

impl Node {
    pub fn none() -> Node {
        Node::new(NodeType::None, String::new(), 0, Position::default())
    }

    pub fn new(node_type: NodeType, name: String, depth: usize, position: Position) -> Node {
        Node {
            node_type,
            name,
            namespace_uri: None,
            value: None,
            depth,
            empty: false,
            attributes: vec![],
            position,
        }
    }

    pub fn with_value(node_type: NodeType, value: String, depth: usize, position: Position) -> Node {
        let name = match node_type {
            NodeType::CData => "#cdata-section",
            NodeType::Comment => "#comment",
            _ => "#text",
        };
        Node {
            value: Some(value),
            ..Node::new(node_type, name.to_string(), depth, position)
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }
}

/// Splits `prefix:local`; names beginning with `#` are never prefixed
pub(crate) fn split_qname(name: &str) -> (Option<&str>, &str) {
    if name.starts_with('#') {
        return (None, name);
    }
    match name.split_once(':') {
        Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => (Some(prefix), local),
        _ => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names() {
        assert_eq!(split_qname("a:b"), (Some("a"), "b"));
        assert_eq!(split_qname("b"), (None, "b"));
        assert_eq!(split_qname(":b"), (None, ":b"));
        assert_eq!(split_qname("#text"), (None, "#text"));
    }

    #[test]
    fn codes() {
        assert_eq!(NodeType::EndElement.code(), 15);
        assert_eq!(NodeType::SignificantWhitespace.code(), 14);
        assert!(NodeType::Comment.has_value());
        assert!(!NodeType::Element.has_value());
        assert!(!NodeType::EntityReference.has_value());
    }
}
