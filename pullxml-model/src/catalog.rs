//! OASIS XML catalogs, as far as needed to map the identifiers of external DTDs and entities
//! to local copies
//!
//! Supported entries are `public`, `system`, `rewriteSystem`, `systemSuffix`, `uri` and
//! `nextCatalog`, within `group` elements or at the top level, honouring `xml:base` and
//! `prefer`.

use crate::resolver::{ResolutionError, ResourceLoader};
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

const CATALOG_NS: &str = "urn:oasis:names:tc:entity:xmlns:xml:catalog";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Catalog settings, fixed for the lifetime of the readers using them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogConfig {
    /// catalog file paths or URLs, consulted in order
    pub catalog_files: Vec<String>,
    /// log every lookup, including those which find nothing
    pub debug: bool,
}

#[derive(Debug)]
pub enum CatalogError {
    Load(ResolutionError),
    Read(Url, std::io::Error),
    Xml(Url, roxmltree::Error),
    /// the document element is not `catalog` in the OASIS catalog namespace
    NotACatalog(Url),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Load(e) => write!(f, "{}", e),
            CatalogError::Read(url, e) => write!(f, "failed to read catalog {}: {}", url, e),
            CatalogError::Xml(url, e) => write!(f, "catalog {} is not well-formed: {}", url, e),
            CatalogError::NotACatalog(url) => write!(f, "{} is not an XML catalog", url),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Public {
        public_id: String,
        uri: Url,
        prefer_public: bool,
    },
    System {
        system_id: String,
        uri: Url,
    },
    RewriteSystem {
        prefix: String,
        rewrite: Url,
    },
    SystemSuffix {
        suffix: String,
        uri: Url,
    },
    Uri {
        name: String,
        uri: Url,
    },
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<Entry>,
    debug: bool,
}

impl Catalog {
    /// Loads the configured catalog files and any catalogs they chain to with `nextCatalog`.
    /// Catalogs which cannot be loaded are skipped with a warning.
    pub fn load(config: &CatalogConfig, loader: &dyn ResourceLoader) -> Catalog {
        let mut catalog = Catalog {
            entries: vec![],
            debug: config.debug,
        };
        let mut seen = HashSet::new();
        let mut pending: Vec<Url> = config
            .catalog_files
            .iter()
            .filter_map(|f| match catalog_url(f) {
                Some(url) => Some(url),
                None => {
                    warn!("ignoring catalog {:?}: not a path or URL", f);
                    None
                }
            })
            .collect();
        pending.reverse();
        while let Some(url) = pending.pop() {
            if !seen.insert(url.clone()) {
                continue;
            }
            match Catalog::read(&url, loader) {
                Ok(text) => match catalog.add_entries(&text, &url) {
                    Ok(next) => {
                        debug!("loaded catalog {}", url);
                        pending.extend(next.into_iter().rev());
                    }
                    Err(e) => warn!("{}", e),
                },
                Err(e) => warn!("{}", e),
            }
        }
        catalog
    }

    /// Parses a single catalog document, ignoring any `nextCatalog` entries
    pub fn parse(text: &str, base: &Url) -> Result<Catalog, CatalogError> {
        let mut catalog = Catalog::default();
        catalog.add_entries(text, base)?;
        Ok(catalog)
    }

    fn read(url: &Url, loader: &dyn ResourceLoader) -> Result<String, CatalogError> {
        let mut reader = loader.open(url).map_err(CatalogError::Load)?;
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| CatalogError::Read(url.clone(), e))?;
        Ok(text)
    }

    /// Adds the entries of the given catalog document, returning the locations of the catalogs
    /// named by `nextCatalog`
    fn add_entries(&mut self, text: &str, url: &Url) -> Result<Vec<Url>, CatalogError> {
        let opts = ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = Document::parse_with_options(text, opts)
            .map_err(|e| CatalogError::Xml(url.clone(), e))?;
        let root = doc.root_element();
        if root.tag_name().name() != "catalog" || root.tag_name().namespace() != Some(CATALOG_NS)
        {
            return Err(CatalogError::NotACatalog(url.clone()));
        }
        let mut next = vec![];
        self.add_children(root, url, true, &mut next);
        Ok(next)
    }

    fn add_children(&mut self, parent: Node, base: &Url, prefer_public: bool, next: &mut Vec<Url>) {
        let base = with_xml_base(parent, base);
        let prefer_public = match parent.attribute("prefer") {
            Some("system") => false,
            Some("public") => true,
            _ => prefer_public,
        };
        for node in parent
            .children()
            .filter(|n| n.is_element() && n.tag_name().namespace() == Some(CATALOG_NS))
        {
            let node_base = with_xml_base(node, &base);
            let uri = |attr: &str| {
                node.attribute(attr)
                    .and_then(|v| node_base.join(v).ok())
            };
            let entry = match node.tag_name().name() {
                "group" => {
                    self.add_children(node, &base, prefer_public, next);
                    None
                }
                "public" => match (node.attribute("publicId"), uri("uri")) {
                    (Some(id), Some(uri)) => Some(Entry::Public {
                        public_id: normalize_public_id(id),
                        uri,
                        prefer_public,
                    }),
                    _ => None,
                },
                "system" => match (node.attribute("systemId"), uri("uri")) {
                    (Some(id), Some(uri)) => Some(Entry::System {
                        system_id: id.to_string(),
                        uri,
                    }),
                    _ => None,
                },
                "rewriteSystem" => {
                    match (node.attribute("systemIdStartString"), uri("rewritePrefix")) {
                        (Some(prefix), Some(rewrite)) => Some(Entry::RewriteSystem {
                            prefix: prefix.to_string(),
                            rewrite,
                        }),
                        _ => None,
                    }
                }
                "systemSuffix" => match (node.attribute("systemIdSuffix"), uri("uri")) {
                    (Some(suffix), Some(uri)) => Some(Entry::SystemSuffix {
                        suffix: suffix.to_string(),
                        uri,
                    }),
                    _ => None,
                },
                "uri" => match (node.attribute("name"), uri("uri")) {
                    (Some(name), Some(uri)) => Some(Entry::Uri {
                        name: name.to_string(),
                        uri,
                    }),
                    _ => None,
                },
                "nextCatalog" => {
                    if let Some(url) = uri("catalog") {
                        next.push(url);
                    }
                    None
                }
                other => {
                    debug!("ignoring unsupported catalog entry {}", other);
                    None
                }
            };
            if let Some(entry) = entry {
                self.entries.push(entry);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a public identifier.  When the reference also has a system identifier, entries
    /// from a part of the catalog with `prefer="system"` are not used.
    pub fn resolve_public(&self, public_id: &str, has_system_id: bool) -> Option<Url> {
        let public_id = normalize_public_id(public_id);
        let found = self.entries.iter().find_map(|e| match e {
            Entry::Public {
                public_id: id,
                uri,
                prefer_public,
            } if *id == public_id && (*prefer_public || !has_system_id) => Some(uri.clone()),
            _ => None,
        });
        self.trace("public", &public_id, &found);
        found
    }

    /// Looks up a system identifier: an exact `system` match is preferred, then the longest
    /// matching `rewriteSystem` prefix, then the longest matching `systemSuffix`, then a `uri`
    /// entry
    pub fn resolve_system(&self, system_id: &str) -> Option<Url> {
        let exact = self.entries.iter().find_map(|e| match e {
            Entry::System { system_id: id, uri } if id == system_id => Some(uri.clone()),
            _ => None,
        });
        let found = exact
            .or_else(|| {
                self.entries
                    .iter()
                    .filter_map(|e| match e {
                        Entry::RewriteSystem { prefix, rewrite } if system_id.starts_with(prefix.as_str()) => {
                            Some((prefix.len(), rewrite))
                        }
                        _ => None,
                    })
                    .max_by_key(|(len, _)| *len)
                    .and_then(|(len, rewrite)| rewrite.join(&system_id[len..]).ok())
            })
            .or_else(|| {
                self.entries
                    .iter()
                    .filter_map(|e| match e {
                        Entry::SystemSuffix { suffix, uri } if system_id.ends_with(suffix.as_str()) => {
                            Some((suffix.len(), uri))
                        }
                        _ => None,
                    })
                    .max_by_key(|(len, _)| *len)
                    .map(|(_, uri)| uri.clone())
            })
            .or_else(|| self.resolve_uri(system_id));
        self.trace("system", system_id, &found);
        found
    }

    pub fn resolve_uri(&self, name: &str) -> Option<Url> {
        self.entries.iter().find_map(|e| match e {
            Entry::Uri { name: n, uri } if n == name => Some(uri.clone()),
            _ => None,
        })
    }

    fn trace(&self, kind: &str, id: &str, found: &Option<Url>) {
        match found {
            Some(url) => debug!("catalog: {} {:?} -> {}", kind, id, url),
            None if self.debug => debug!("catalog: no entry for {} {:?}", kind, id),
            None => (),
        }
    }
}

fn with_xml_base(node: Node, base: &Url) -> Url {
    node.attribute((XML_NS, "base"))
        .and_then(|b| base.join(b).ok())
        .unwrap_or_else(|| base.clone())
}

/// Public identifiers compare after white space is collapsed
pub fn normalize_public_id(id: &str) -> String {
    id.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A catalog named on the command line or in the environment, which may be a URL or a path
fn catalog_url(name: &str) -> Option<Url> {
    match Url::parse(name) {
        Ok(url) if url.scheme().len() > 1 => Some(url),
        _ => crate::resolver::file_url(Path::new(name)),
    }
}
