//! Location of external entities and DTD subsets from their public and system identifiers

use crate::catalog::Catalog;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::{Cursor, Read};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, trace};
use url::Url;

#[derive(Debug)]
pub enum ResolutionError {
    /// neither identifier could be mapped to a resource
    NoSystemId(Option<String>),
    NotFound(String),
    /// the identifier refers to a resource which would need to be fetched over the network
    Unsupported(Url),
    InvalidUri(String),
    Io(Url, io::Error),
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::NoSystemId(Some(public_id)) => {
                write!(f, "could not resolve public identifier {:?}", public_id)
            }
            ResolutionError::NoSystemId(None) => f.write_str("no identifier to resolve"),
            ResolutionError::NotFound(id) => write!(f, "resource {} not found", id),
            ResolutionError::Unsupported(url) => {
                write!(f, "fetching {} resources is not supported: {}", url.scheme(), url)
            }
            ResolutionError::InvalidUri(id) => write!(f, "invalid system identifier {:?}", id),
            ResolutionError::Io(url, e) => write!(f, "failed to load {}: {}", url, e),
        }
    }
}

impl std::error::Error for ResolutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolutionError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

/// An opened external resource
pub struct Resource {
    /// where the resource was found, used as the base for identifiers appearing within it
    pub url: Url,
    pub reader: Box<dyn Read>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource").field("url", &self.url.as_str()).finish()
    }
}

pub trait ResourceLoader {
    fn open(&self, url: &Url) -> Result<Box<dyn Read>, ResolutionError>;
}

/// Loads `file:` URLs from the filesystem
pub struct FsLoader;
impl ResourceLoader for FsLoader {
    fn open(&self, url: &Url) -> Result<Box<dyn Read>, ResolutionError> {
        if url.scheme() != "file" {
            return Err(ResolutionError::Unsupported(url.clone()));
        }
        let path = url
            .to_file_path()
            .map_err(|_| ResolutionError::InvalidUri(url.to_string()))?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ResolutionError::NotFound(path.display().to_string()),
            _ => ResolutionError::Io(url.clone(), e),
        })?;
        Ok(Box::new(io::BufReader::new(file)))
    }
}

/// Serves resources held in memory, keyed by URL
#[derive(Default, Clone)]
pub struct MemoryLoader {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> MemoryLoader {
        MemoryLoader::default()
    }

    pub fn insert(&mut self, url: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(url.to_string(), content.into());
    }

    pub fn with(mut self, url: &str, content: impl Into<Vec<u8>>) -> MemoryLoader {
        self.insert(url, content);
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn open(&self, url: &Url) -> Result<Box<dyn Read>, ResolutionError> {
        match self.files.get(url.as_str()) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(ResolutionError::NotFound(url.to_string())),
        }
    }
}

/// Maps public and system identifiers to resources.
///
/// Identifiers are tried against, in order, the table of in-memory overrides, the catalog (by
/// public identifier and then by system identifier), and finally the system identifier itself
/// taken as a URL or file path relative to the referencing entity.
pub struct Resolver {
    overrides: HashMap<String, Vec<u8>>,
    catalog: Option<Rc<Catalog>>,
    loader: Box<dyn ResourceLoader>,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new(Box::new(FsLoader))
    }
}

impl Resolver {
    pub fn new(loader: Box<dyn ResourceLoader>) -> Resolver {
        Resolver {
            overrides: HashMap::new(),
            catalog: None,
            loader,
        }
    }

    pub fn with_catalog(mut self, catalog: Rc<Catalog>) -> Resolver {
        self.catalog = Some(catalog);
        self
    }

    /// Supplies the content for the given public or system identifier, taking precedence over
    /// any other means of resolution
    pub fn add_override(&mut self, id: &str, content: impl Into<Vec<u8>>) {
        self.overrides.insert(id.to_string(), content.into());
    }

    pub fn resolve(
        &self,
        public_id: Option<&str>,
        system_id: Option<&str>,
        base: Option<&Url>,
    ) -> Result<Resource, ResolutionError> {
        let location = system_id.and_then(|id| locate(id, base).ok());

        for id in system_id.iter().chain(public_id.iter()) {
            if let Some(content) = self.overrides.get(*id) {
                trace!("{} resolved from override table", id);
                let url = match &location {
                    Some(url) => url.clone(),
                    None => locate(id, base)?,
                };
                return Ok(Resource {
                    url,
                    reader: Box::new(Cursor::new(content.clone())),
                });
            }
        }

        if let Some(catalog) = &self.catalog {
            let found = public_id
                .and_then(|p| catalog.resolve_public(p, system_id.is_some()))
                .or_else(|| system_id.and_then(|s| catalog.resolve_system(s)))
                .or_else(|| location.as_ref().and_then(|l| catalog.resolve_system(l.as_str())));
            if let Some(url) = found {
                debug!(
                    "catalog resolved {:?} {:?} to {}",
                    public_id.unwrap_or(""),
                    system_id.unwrap_or(""),
                    url
                );
                let reader = self.loader.open(&url)?;
                return Ok(Resource { url, reader });
            }
        }

        match location {
            Some(url) => {
                trace!("loading {}", url);
                let reader = self.loader.open(&url)?;
                Ok(Resource { url, reader })
            }
            None => match system_id {
                Some(id) => Err(ResolutionError::InvalidUri(id.to_string())),
                None => Err(ResolutionError::NoSystemId(public_id.map(str::to_string))),
            },
        }
    }
}

/// The absolute URL of a system identifier, which may be relative to `base`.  Identifiers which
/// are not valid URI references are taken to be file paths.
pub fn locate(system_id: &str, base: Option<&Url>) -> Result<Url, ResolutionError> {
    if rfc2396::validate(system_id) {
        if let Ok(url) = Url::parse(system_id) {
            // a single letter is a Windows drive, not a scheme
            if url.scheme().len() > 1 {
                return Ok(url);
            }
        }
        let base = match base {
            Some(b) => b.clone(),
            None => current_dir_url()?,
        };
        return base
            .join(system_id)
            .map_err(|_| ResolutionError::InvalidUri(system_id.to_string()));
    }
    trace!("{:?} is not a URI reference, treating it as a file path", system_id);
    let path = Path::new(system_id);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let dir = match base.and_then(|b| b.to_file_path().ok()) {
            Some(file) => file.parent().map(Path::to_path_buf).unwrap_or_default(),
            None => std::env::current_dir()
                .map_err(|_| ResolutionError::InvalidUri(system_id.to_string()))?,
        };
        dir.join(path)
    };
    Url::from_file_path(&path).map_err(|_| ResolutionError::InvalidUri(system_id.to_string()))
}

fn current_dir_url() -> Result<Url, ResolutionError> {
    std::env::current_dir()
        .ok()
        .and_then(|dir| Url::from_directory_path(dir).ok())
        .ok_or_else(|| ResolutionError::InvalidUri(".".to_string()))
}

/// The URL of a document given as a filesystem path
pub fn file_url(path: &Path) -> Option<Url> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Url::from_file_path(path).ok()
}
