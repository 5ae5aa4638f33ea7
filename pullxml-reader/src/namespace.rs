use pullxml_model::attribute::Attribute;

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// In-scope namespace bindings, one scope per open element
#[derive(Debug, Default)]
pub(crate) struct NamespaceStack {
    /// `(prefix, uri)`, with the empty prefix standing for the default namespace and an empty
    /// uri undeclaring it
    bindings: Vec<(String, String)>,
    scopes: Vec<usize>,
}

impl NamespaceStack {
    pub fn push_scope(&mut self, attributes: &[Attribute]) {
        self.scopes.push(self.bindings.len());
        for attr in attributes.iter().filter(|a| a.is_namespace_declaration()) {
            let prefix = attr.name.strip_prefix("xmlns:").unwrap_or("");
            self.bindings.push((prefix.to_string(), attr.value.clone()));
        }
    }

    pub fn pop_scope(&mut self) {
        if let Some(mark) = self.scopes.pop() {
            self.bindings.truncate(mark);
        }
    }

    /// The namespace bound to `prefix` (`None` for the default namespace).  `Err` for an
    /// undeclared prefix.
    pub fn resolve(&self, prefix: Option<&str>) -> Result<Option<&str>, ()> {
        match prefix {
            Some("xml") => return Ok(Some(XML_NAMESPACE)),
            Some("xmlns") => return Ok(Some(XMLNS_NAMESPACE)),
            _ => (),
        }
        let wanted = prefix.unwrap_or("");
        match self.bindings.iter().rev().find(|(p, _)| p == wanted) {
            Some((_, uri)) if uri.is_empty() => {
                if prefix.is_some() {
                    Err(())
                } else {
                    Ok(None)
                }
            }
            Some((_, uri)) => Ok(Some(uri)),
            None if prefix.is_some() => Err(()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn scopes() {
        let mut ns = NamespaceStack::default();
        assert_eq!(ns.resolve(Some("xml")), Ok(Some(XML_NAMESPACE)));
        assert_eq!(ns.resolve(None), Ok(None));
        ns.push_scope(&[Attribute::new("xmlns", "urn:a"), Attribute::new("xmlns:p", "urn:p")]);
        assert_eq!(ns.resolve(None), Ok(Some("urn:a")));
        assert_eq!(ns.resolve(Some("p")), Ok(Some("urn:p")));
        ns.push_scope(&[Attribute::new("xmlns", ""), Attribute::new("id", "x")]);
        assert_eq!(ns.resolve(None), Ok(None));
        assert_eq!(ns.resolve(Some("p")), Ok(Some("urn:p")));
        ns.pop_scope();
        assert_eq!(ns.resolve(None), Ok(Some("urn:a")));
        ns.pop_scope();
        assert_matches!(ns.resolve(Some("p")), Err(()));
    }
}
