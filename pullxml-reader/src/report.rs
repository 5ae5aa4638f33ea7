//! One line per node, in the form `depth type name isEmpty hasValue [value]`

use crate::Reader;
use std::fmt;

/// Values longer than this are cut short and marked with `...`
pub const VALUE_LIMIT: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport<'a> {
    pub depth: usize,
    pub node_type: u8,
    pub name: Option<&'a str>,
    pub is_empty: bool,
    pub has_value: bool,
    pub value: Option<&'a str>,
}

impl<'a> NodeReport<'a> {
    pub fn from_reader(reader: &'a Reader) -> NodeReport<'a> {
        NodeReport {
            depth: reader.depth(),
            node_type: reader.node_type().code(),
            name: reader.name(),
            is_empty: reader.is_empty_element(),
            has_value: reader.has_value(),
            value: reader.value(),
        }
    }
}

impl fmt::Display for NodeReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.depth,
            self.node_type,
            self.name.unwrap_or("--"),
            self.is_empty as u8,
            self.has_value as u8
        )?;
        if let Some(value) = self.value {
            match value.char_indices().nth(VALUE_LIMIT) {
                Some((cut, _)) => write!(f, " {}...", &value[..cut])?,
                None => write!(f, " {}", value)?,
            }
        }
        Ok(())
    }
}

pub fn format_node(reader: &Reader) -> String {
    NodeReport::from_reader(reader).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(value: Option<&str>) -> String {
        NodeReport {
            depth: 1,
            node_type: 3,
            name: Some("#text"),
            is_empty: false,
            has_value: value.is_some(),
            value,
        }
        .to_string()
    }

    #[test]
    fn values() {
        assert_eq!(report(None), "1 3 #text 0 0");
        assert_eq!(report(Some("hello")), "1 3 #text 0 1 hello");
        let exact = "a".repeat(VALUE_LIMIT);
        assert_eq!(report(Some(&exact)), format!("1 3 #text 0 1 {}", exact));
        let long = "é".repeat(VALUE_LIMIT + 1);
        assert_eq!(
            report(Some(&long)),
            format!("1 3 #text 0 1 {}...", "é".repeat(VALUE_LIMIT))
        );
    }

    #[test]
    fn unnamed() {
        let r = NodeReport {
            depth: 0,
            node_type: 0,
            name: None,
            is_empty: false,
            has_value: false,
            value: None,
        };
        assert_eq!(r.to_string(), "0 0 -- 0 0");
    }
}
