use pullxml_model::attribute::{collapse, Attribute};
use pullxml_model::resolver::Resolver;
use pullxml_model::{Dtd, DtdBuilder};
use pullxml_syntax::Position;
use pullxml_validator::{Validator, Verdict};
use roxmltree::{Node, NodeType};
use std::convert::TryFrom;
use std::rc::Rc;

#[test]
fn suite() {
    let src = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/suite.xml");
    let s = std::fs::read_to_string(src).expect("read suite.xml");
    let mut map = codemap::CodeMap::new();
    let file = map.add_file(src.to_string(), s.clone());
    let mut emitter =
        codemap_diagnostic::Emitter::stderr(codemap_diagnostic::ColorConfig::Auto, Some(&map));
    let doc = roxmltree::Document::parse(&s).unwrap();
    assert_eq!(doc.root_element().tag_name().name(), "testSuite");
    let mut stats = Stats::default();
    process_suite(&mut emitter, &file, &mut stats, doc.root_element());
    eprintln!("{} passed, {} failed", stats.passed, stats.failed);
    assert_eq!(stats.failed, 0);
    assert!(stats.passed > 0);
}

#[derive(Default)]
struct Stats {
    passed: u64,
    failed: u64,
}

fn process_suite(
    emitter: &mut codemap_diagnostic::Emitter,
    file: &codemap::File,
    stats: &mut Stats,
    suite: Node,
) {
    for child in suite.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "testSuite" => process_suite(emitter, file, stats, child),
            "testCase" => process_case(emitter, file, stats, child),
            "documentation" => {
                if let Some(text) = child.text() {
                    eprintln!("== {} ==", text);
                }
            }
            other => panic!("unexpected child of <testSuite>: <{}>", other),
        }
    }
}

enum Fixture {
    Incorrect(String),
    Correct {
        dtd: String,
        root: Option<String>,
        valid: Vec<String>,
        invalid: Vec<String>,
    },
}

struct TestCase {
    section: Option<String>,
    fixture: Fixture,
}

impl<'a, 'input> TryFrom<Node<'a, 'input>> for TestCase {
    type Error = String;

    fn try_from(node: Node<'a, 'input>) -> Result<Self, Self::Error> {
        let mut section = None;
        let mut incorrect = None;
        let mut dtd = None;
        let mut root = None;
        let mut valid = vec![];
        let mut invalid = vec![];
        for child in node.children().filter(Node::is_element) {
            let text = child.text().unwrap_or("").to_string();
            match child.tag_name().name() {
                "section" => section = Some(text),
                "documentation" => (),
                "incorrect" => incorrect = Some(text),
                "dtd" => {
                    root = child.attribute("root").map(str::to_string);
                    dtd = Some(text);
                }
                "valid" => valid.push(text),
                "invalid" => invalid.push(text),
                other => return Err(format!("unexpected child of <testCase>: <{}>", other)),
            }
        }
        let fixture = match (incorrect, dtd) {
            (Some(text), None) => Fixture::Incorrect(text),
            (None, Some(dtd)) => Fixture::Correct {
                dtd,
                root,
                valid,
                invalid,
            },
            _ => return Err("expected exactly one of <incorrect> or <dtd>".to_string()),
        };
        Ok(TestCase { section, fixture })
    }
}

fn process_case(
    emitter: &mut codemap_diagnostic::Emitter,
    file: &codemap::File,
    stats: &mut Stats,
    case: Node,
) {
    let test_case = TestCase::try_from(case).unwrap();
    if let Some(section) = &test_case.section {
        eprintln!("  section {}", section);
    }
    if run_test(&test_case) {
        stats.passed += 1;
    } else {
        stats.failed += 1;
        diagnostic(emitter, file, case.range());
    }
}

fn diagnostic(
    emitter: &mut codemap_diagnostic::Emitter,
    file: &codemap::File,
    span: std::ops::Range<usize>,
) {
    let label = codemap_diagnostic::SpanLabel {
        span: file.span.subspan(span.start as _, span.end as _),
        style: codemap_diagnostic::SpanStyle::Primary,
        label: None,
    };
    let d = codemap_diagnostic::Diagnostic {
        level: codemap_diagnostic::Level::Error,
        message: "Test failed".to_string(),
        code: None,
        spans: vec![label],
    };
    emitter.emit(&[d]);
}

fn build(name: &str, subset: &str) -> Option<Rc<Dtd>> {
    let resolver = Resolver::default();
    let mut builder = DtdBuilder::new(name, None, &resolver);
    match builder.internal_subset(subset, "suite.xml") {
        Ok(()) => Some(Rc::new(builder.finish())),
        Err(e) => {
            eprintln!("  DTD rejected: {}", e);
            None
        }
    }
}

fn run_test(test_case: &TestCase) -> bool {
    match &test_case.fixture {
        Fixture::Incorrect(subset) => match build("doc", subset) {
            None => true,
            Some(dtd) => {
                if Validator::new(Some(dtd)).verdict() == Verdict::Invalid {
                    true
                } else {
                    eprintln!("  {}", subset);
                    eprintln!("  ❌ Incorrect DTD should have been reported");
                    false
                }
            }
        },
        Fixture::Correct {
            dtd,
            root,
            valid,
            invalid,
        } => {
            let mut pass = true;
            for doc in valid {
                let verdict = validate(dtd, root.as_deref(), doc);
                if verdict != Verdict::Valid {
                    eprintln!("  {}", doc);
                    eprintln!("  ❌ Valid input rejected");
                    pass = false;
                }
            }
            for doc in invalid {
                let verdict = validate(dtd, root.as_deref(), doc);
                if verdict != Verdict::Invalid {
                    eprintln!("  {}", doc);
                    eprintln!("  ❌ Invalid input accepted");
                    pass = false;
                }
            }
            pass
        }
    }
}

/// Feeds the document to a validator in the way the reader would, with attribute defaults
/// applied and tokenized values collapsed
fn validate(subset: &str, root: Option<&str>, text: &str) -> Verdict {
    let doc = roxmltree::Document::parse(text).expect("test document is well-formed");
    let name = root.unwrap_or_else(|| doc.root_element().tag_name().name());
    let dtd = match build(name, subset) {
        Some(dtd) => dtd,
        None => return Verdict::Invalid,
    };
    let mut validator = Validator::new(Some(dtd.clone()));
    walk(&mut validator, &dtd, &doc, doc.root_element());
    let verdict = validator.finalize();
    for error in validator.errors() {
        eprintln!("    {}", error);
    }
    verdict
}

fn position(doc: &roxmltree::Document, node: Node) -> Position {
    let offset = node.range().start;
    let pos = doc.text_pos_at(offset);
    Position {
        line: pos.row,
        column: pos.col,
        offset,
    }
}

fn walk(validator: &mut Validator, dtd: &Dtd, doc: &roxmltree::Document, node: Node) {
    let at = position(doc, node);
    match node.node_type() {
        NodeType::Element => {
            let name = node.tag_name().name();
            let mut attributes: Vec<Attribute> = node
                .attributes()
                .map(|a| {
                    let tokenized = dtd
                        .attribute(name, a.name())
                        .map_or(false, |def| def.att_type.is_tokenized());
                    let value = if tokenized {
                        collapse(a.value())
                    } else {
                        a.value().to_string()
                    };
                    Attribute::new(a.name(), value)
                })
                .collect();
            dtd.apply_defaults(name, &mut attributes);
            validator.observe_start_element(name, &attributes, at);
            for child in node.children() {
                walk(validator, dtd, doc, child);
            }
            validator.observe_end_element(name, at);
        }
        NodeType::Text => validator.observe_text(node.text().unwrap_or(""), at),
        NodeType::Comment | NodeType::PI => validator.observe_markup(at),
        NodeType::Root => (),
    }
}
