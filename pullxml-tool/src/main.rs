//! `reader2`: reads a document with entity substitution, attribute defaulting and validation
//! enabled, reporting whether it is valid and which encoding it declares.

use pullxml_model::catalog::{Catalog, CatalogConfig};
use pullxml_model::resolver::{FsLoader, Resolver};
use pullxml_reader::{report, Reader, ReaderError, ReaderOptions};
use pullxml_validator::ValidityErrorKind;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::rc::Rc;
use structopt::StructOpt;
use tracing::debug;

const USAGE: &str = "<document> [-catalog=<catalog>] [-debug] [-dump]";

#[derive(Debug, StructOpt)]
#[structopt(name = "reader2")]
struct Cli {
    /// Catalog file(s) used to resolve public and system identifiers, separated by spaces;
    /// defaults to $XML_CATALOG_FILES
    #[structopt(long)]
    catalog: Option<String>,
    /// Print the settings in effect and trace catalog resolution
    #[structopt(long)]
    debug: bool,
    /// Print a line for every node read
    #[structopt(long)]
    dump: bool,
    document: Option<PathBuf>,
}

/// The options are written with a single dash, as in `-catalog=file`
fn normalize_args(args: impl Iterator<Item = String>) -> Vec<String> {
    args.enumerate()
        .map(|(i, arg)| {
            let single_dash = arg == "-debug" || arg == "-dump" || arg.starts_with("-catalog=");
            if i > 0 && single_dash {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}

fn main() {
    let cli = Cli::from_iter(normalize_args(std::env::args()));

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let document = match &cli.document {
        Some(document) => document,
        None => {
            eprintln!("no documment provided");
            let program = std::env::args().next().unwrap_or_else(|| "reader2".to_string());
            println!("usage: {} {}", program, USAGE);
            exit(1);
        }
    };

    if cli.debug {
        println!("document: [{}]", document.display());
        if let Some(catalog) = &cli.catalog {
            println!("catalog: [{}]", catalog);
        }
    }
    let catalog_files = cli
        .catalog
        .clone()
        .or_else(|| std::env::var("XML_CATALOG_FILES").ok());
    if cli.debug {
        let debug_catalog = if cli.catalog.is_some() {
            Some("YES".to_string())
        } else {
            std::env::var("XML_DEBUG_CATALOG").ok()
        };
        println!("[XML_DEBUG_CATALOG={}]", debug_catalog.as_deref().unwrap_or("(null)"));
        println!("[XML_CATALOG_FILES={}]", catalog_files.as_deref().unwrap_or("(null)"));
    }

    let config = CatalogConfig {
        catalog_files: catalog_files
            .iter()
            .flat_map(|files| files.split_whitespace())
            .map(str::to_string)
            .collect(),
        debug: cli.debug,
    };
    stream_file(document, &config, cli.dump);
}

fn stream_file(path: &Path, config: &CatalogConfig, dump: bool) {
    let name = path.display().to_string();
    let reader = match Reader::from_path(path, ReaderOptions::reference()) {
        Ok(reader) => reader,
        Err(e) => {
            debug!("{}", e);
            eprintln!("Unable to open {}", name);
            return;
        }
    };
    let mut reader = if config.catalog_files.is_empty() {
        reader
    } else {
        let catalog = Catalog::load(config, &FsLoader);
        reader.with_resolver(Resolver::default().with_catalog(Rc::new(catalog)))
    };

    while reader.advance() {
        if dump {
            println!("{}", report::format_node(&reader));
        }
    }
    dump_diagnostics(&name, path, &reader);
    if !reader.is_valid() {
        eprintln!("Document {} does not validate", name);
    }
    println!("[ENCODING={}]", reader.encoding().unwrap_or("(null)"));
    let failed = reader.error().is_some();
    reader.close();
    if failed {
        eprintln!("{} : failed to parse", name);
    }
}

/// Prints the fatal error, if any, and the validity errors against the document source
fn dump_diagnostics(name: &str, path: &Path, reader: &Reader) {
    if reader.error().is_none() && reader.validity_errors().is_empty() {
        return;
    }
    let source = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("cannot re-read {}: {}", name, e);
            return;
        }
    };
    if let Some(err) = reader.error() {
        match (err, reader.dtd()) {
            (ReaderError::Dtd(_), Some(dtd)) => dtd.dump_diagnostic(err.diagnostic(None)),
            _ => {
                let mut map = codemap::CodeMap::new();
                let file = map.add_file(name.to_string(), source.clone());
                let mut emitter =
                    codemap_diagnostic::Emitter::stderr(codemap_diagnostic::ColorConfig::Auto, Some(&map));
                emitter.emit(&[err.diagnostic(Some(&file))]);
            }
        }
    }
    if let Some(validator) = reader.validator() {
        validator.dump_declaration_diagnostics();
        for err in validator.errors() {
            if let ValidityErrorKind::Declaration(_) = err.kind {
                continue;
            }
            let (map, diagnostics) = validator.diagnostic(name.to_string(), source.clone(), err);
            let mut emitter =
                codemap_diagnostic::Emitter::stderr(codemap_diagnostic::ColorConfig::Auto, Some(&map));
            emitter.emit(&diagnostics);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        normalize_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn single_dash_flags() {
        assert_eq!(
            args(&["reader2", "-catalog=cat.xml", "-debug", "doc.xml", "-dump"]),
            vec!["reader2", "--catalog=cat.xml", "--debug", "doc.xml", "--dump"]
        );
        assert_eq!(args(&["reader2", "--debug", "-x"]), vec!["reader2", "--debug", "-x"]);
    }

    #[test]
    fn parse_cli() {
        let cli = Cli::from_iter(args(&["reader2", "-catalog=c.xml", "doc.xml"]));
        assert_eq!(cli.catalog.as_deref(), Some("c.xml"));
        assert_eq!(cli.document, Some(PathBuf::from("doc.xml")));
        assert!(!cli.debug);
        let cli = Cli::from_iter(args(&["reader2"]));
        assert!(cli.document.is_none());
    }
}
