//! Grammar of DTD subsets and markup declarations
//!
//! Per https://www.w3.org/TR/REC-xml/#sec-prolog-dtd, working over already-decoded text.
//! Parsing happens in two steps: `parse_subset()` splits a subset into top-level items, leaving
//! each markup declaration as unparsed text, and `parse_markup_decl()` interprets one such
//! declaration once any parameter-entity references within it have been replaced.

use crate::lexer::is_pubid_char;
use crate::types::*;
use crate::{is_name_char, is_name_start_char, is_whitespace};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, one_of, satisfy},
    combinator::{all_consuming, map, opt, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult, InputTake,
};
use nom_locate::{position, LocatedSpan};
use std::fmt;

pub type Located<'a> = LocatedSpan<&'a str>;

#[derive(Debug, Clone, PartialEq)]
pub struct DtdSyntaxError {
    /// byte offset of the failure within the parsed text
    pub offset: usize,
    pub context: &'static str,
}

impl fmt::Display for DtdSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} at offset {}", self.context, self.offset)
    }
}

impl std::error::Error for DtdSyntaxError {}

fn syntax_error(e: nom::Err<Error<Located>>, text: &str, context: &'static str) -> DtdSyntaxError {
    let offset = match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.input.location_offset(),
        nom::Err::Incomplete(_) => text.len(),
    };
    DtdSyntaxError { offset, context }
}

/// Splits the text of a DTD subset into its top-level items
pub fn parse_subset(text: &str) -> Result<Vec<DeclItem>, DtdSyntaxError> {
    let mut input = Located::new(text);
    let mut items = vec![];
    while !input.fragment().is_empty() {
        let (rest, item) = decl_item(input).map_err(|e| syntax_error(e, text, "markup declaration"))?;
        items.push(item);
        input = rest;
    }
    Ok(items)
}

/// Interprets the text of a single markup declaration
pub fn parse_markup_decl(text: &str) -> Result<MarkupDecl, DtdSyntaxError> {
    let mut parse = all_consuming(alt((
        map(element_decl, MarkupDecl::Element),
        map(attlist_decl, MarkupDecl::Attlist),
        map(entity_decl, MarkupDecl::Entity),
        map(notation_decl, MarkupDecl::Notation),
    )));
    parse(Located::new(text))
        .map(|(_, decl)| decl)
        .map_err(|e| syntax_error(e, text, context_of(text)))
}

fn context_of(text: &str) -> &'static str {
    if text.starts_with("<!ELEMENT") {
        "element declaration"
    } else if text.starts_with("<!ATTLIST") {
        "attribute-list declaration"
    } else if text.starts_with("<!ENTITY") {
        "entity declaration"
    } else if text.starts_with("<!NOTATION") {
        "notation declaration"
    } else {
        "markup declaration"
    }
}

fn span(start: Located, end: Located) -> Span {
    start.location_offset()..end.location_offset()
}

// [28a] DeclSep ::= PEReference | S
// [28b] intSubset ::= (markupdecl | DeclSep)*
// [31] extSubsetDecl ::= ( markupdecl | conditionalSect | DeclSep)*
fn decl_item(input: Located) -> IResult<Located, DeclItem> {
    alt((
        value(DeclItem::Whitespace, s1),
        value(DeclItem::Comment, comment),
        pi,
        pe_reference,
        conditional_section,
        raw_markup_decl,
    ))(input)
}

// [3] S ::= (#x20 | #x9 | #xD | #xA)+
fn s1(input: Located) -> IResult<Located, Located> {
    take_while1(is_whitespace)(input)
}

fn s0(input: Located) -> IResult<Located, Located> {
    take_while(is_whitespace)(input)
}

// [5] Name ::= NameStartChar (NameChar)*
fn name(input: Located) -> IResult<Located, String> {
    map(
        recognize(pair(satisfy(is_name_start_char), take_while(is_name_char))),
        |s: Located| s.fragment().to_string(),
    )(input)
}

// [7] Nmtoken ::= (NameChar)+
fn nmtoken(input: Located) -> IResult<Located, String> {
    map(take_while1(is_name_char), |s: Located| s.fragment().to_string())(input)
}

// [15] Comment ::= '<!--' ((Char - '-') | ('-' (Char - '-')))* '-->'
fn comment(input: Located) -> IResult<Located, Located> {
    recognize(tuple((tag("<!--"), take_until("--"), tag("-->"))))(input)
}

// [16] PI ::= '<?' PITarget (S (Char* - (Char* '?>' Char*)))? '?>'
fn pi(input: Located) -> IResult<Located, DeclItem> {
    let parse = tuple((
        tag("<?"),
        name,
        opt(preceded(s1, take_until("?>"))),
        tag("?>"),
    ));
    map(parse, |(_, target, data, _)| DeclItem::Pi {
        target,
        data: data.map(|d| d.fragment().to_string()).unwrap_or_default(),
    })(input)
}

// [69] PEReference ::= '%' Name ';'
fn pe_reference(input: Located) -> IResult<Located, DeclItem> {
    let parse = tuple((position, delimited(char('%'), name, char(';')), position));
    map(parse, |(start, name, end)| DeclItem::PeReference {
        span: span(start, end),
        name,
    })(input)
}

// [61] conditionalSect ::= includeSect | ignoreSect
// [62] includeSect ::= '<![' S? 'INCLUDE' S? '[' extSubsetDecl ']]>'
// [63] ignoreSect ::= '<![' S? 'IGNORE' S? '[' ignoreSectContents* ']]>'
fn conditional_section(input: Located) -> IResult<Located, DeclItem> {
    let keyword = alt((
        tag("INCLUDE"),
        tag("IGNORE"),
        recognize(delimited(char('%'), name, char(';'))),
    ));
    let parse = tuple((
        position,
        tag("<!["),
        s0,
        keyword,
        s0,
        char('['),
        conditional_body,
        tag("]]>"),
        position,
    ));
    map(parse, |(start, _, _, keyword, _, _, body, _, end)| {
        DeclItem::Conditional {
            span: span(start, end),
            keyword: keyword.fragment().to_string(),
            body: body.fragment().to_string(),
        }
    })(input)
}

/// Recognizes the content of a conditional section up to its matching `]]>`, which is not
/// consumed.  Nested sections are counted; literals inside declarations and comments are
/// skipped over.
fn conditional_body(input: Located) -> IResult<Located, Located> {
    let text = *input.fragment();
    let mut depth = 0;
    let mut in_decl = false;
    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with("<![") {
            depth += 1;
            i += 3;
        } else if rest.starts_with("]]>") {
            if depth == 0 {
                let (remaining, body) = input.take_split(i);
                return Ok((remaining, body));
            }
            depth -= 1;
            i += 3;
        } else if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(n) => i += n + 3,
                None => break,
            }
        } else if rest.starts_with("<!") {
            in_decl = true;
            i += 2;
        } else if in_decl && (rest.starts_with('"') || rest.starts_with('\'')) {
            let quote = &rest[..1];
            match rest[1..].find(quote) {
                Some(n) => i += n + 2,
                None => break,
            }
        } else {
            if rest.starts_with('>') {
                in_decl = false;
            }
            i += rest.chars().next().map_or(1, |c| c.len_utf8());
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::TakeUntil)))
}

/// The extent of an element, attribute-list, entity or notation declaration, without
/// interpreting its content
fn raw_markup_decl(input: Located) -> IResult<Located, DeclItem> {
    let parse = tuple((
        position,
        recognize(tuple((
            tag("<!"),
            alt((tag("ELEMENT"), tag("ATTLIST"), tag("ENTITY"), tag("NOTATION"))),
            many0(alt((recognize(literal), take_while1(|c: char| !matches!(c, '"' | '\'' | '>'))))),
            char('>'),
        ))),
        position,
    ));
    map(parse, |(start, text, end)| DeclItem::Markup {
        span: span(start, end),
        text: text.fragment().to_string(),
    })(input)
}

// [9] EntityValue, [10] AttValue, [11] SystemLiteral and [12] PubidLiteral share the quoting
// rules; restrictions on their content are applied by the callers
fn literal(input: Located) -> IResult<Located, String> {
    map(
        alt((
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
            delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        )),
        |s: Located| s.fragment().to_string(),
    )(input)
}

fn pubid_literal(input: Located) -> IResult<Located, String> {
    verify(literal, |s: &str| s.chars().all(is_pubid_char))(input)
}

// [75] ExternalID ::= 'SYSTEM' S SystemLiteral | 'PUBLIC' S PubidLiteral S SystemLiteral
fn external_id(input: Located) -> IResult<Located, ExternalId> {
    alt((
        map(preceded(pair(tag("SYSTEM"), s1), literal), |system_id| ExternalId {
            public_id: None,
            system_id: Some(system_id),
        }),
        map(
            tuple((tag("PUBLIC"), s1, pubid_literal, s1, literal)),
            |(_, _, public_id, _, system_id)| ExternalId {
                public_id: Some(public_id),
                system_id: Some(system_id),
            },
        ),
    ))(input)
}

// [45] elementdecl ::= '<!ELEMENT' S Name S contentspec S? '>'
fn element_decl(input: Located) -> IResult<Located, ElementDecl> {
    let parse = tuple((
        position,
        tag("<!ELEMENT"),
        s1,
        name,
        s1,
        content_spec,
        s0,
        char('>'),
        position,
    ));
    map(parse, |(start, _, _, name, _, content, _, _, end)| ElementDecl {
        span: span(start, end),
        name,
        content,
    })(input)
}

// [46] contentspec ::= 'EMPTY' | 'ANY' | Mixed | children
fn content_spec(input: Located) -> IResult<Located, ContentSpec> {
    alt((
        value(ContentSpec::Empty, tag("EMPTY")),
        value(ContentSpec::Any, tag("ANY")),
        mixed,
        map(group, ContentSpec::Children),
    ))(input)
}

// [51] Mixed ::= '(' S? '#PCDATA' (S? '|' S? Name)* S? ')*' | '(' S? '#PCDATA' S? ')'
fn mixed(input: Located) -> IResult<Located, ContentSpec> {
    let (input, _) = tuple((char('('), s0, tag("#PCDATA")))(input)?;
    let (input, names) = many0(preceded(tuple((s0, char('|'), s0)), name))(input)?;
    let (input, _) = s0(input)?;
    let (input, _) = if names.is_empty() {
        alt((tag(")*"), tag(")")))(input)?
    } else {
        tag(")*")(input)?
    };
    Ok((input, ContentSpec::Mixed(names)))
}

// [47] children ::= (choice | seq) ('?' | '*' | '+')?
// [49] choice ::= '(' S? cp ( S? '|' S? cp )+ S? ')'
// [50] seq ::= '(' S? cp ( S? ',' S? cp )* S? ')'
fn group(input: Located) -> IResult<Located, ContentParticle> {
    let start = input;
    let (input, _) = pair(char('('), s0)(input)?;
    let (input, first) = cp(input)?;
    let (input, rest) = many0(tuple((s0, one_of(",|"), s0, cp)))(input)?;
    let (input, _) = pair(s0, char(')'))(input)?;
    let (input, occurrence) = occurrence(input)?;

    let choice = rest.first().map_or(false, |(_, sep, _, _)| *sep == '|');
    if rest.iter().any(|(_, sep, _, _)| (*sep == '|') != choice) {
        // a group may not mix ',' and '|'
        return Err(nom::Err::Failure(Error::new(start, ErrorKind::Verify)));
    }
    let mut items = vec![first];
    items.extend(rest.into_iter().map(|(_, _, _, cp)| cp));
    let particle = if choice {
        Particle::Choice(items)
    } else {
        Particle::Seq(items)
    };
    Ok((input, ContentParticle { particle, occurrence }))
}

// [48] cp ::= (Name | choice | seq) ('?' | '*' | '+')?
fn cp(input: Located) -> IResult<Located, ContentParticle> {
    alt((
        map(pair(name, occurrence), |(name, occurrence)| ContentParticle {
            particle: Particle::Name(name),
            occurrence,
        }),
        group,
    ))(input)
}

fn occurrence(input: Located) -> IResult<Located, Occurrence> {
    map(opt(one_of("?*+")), |c| match c {
        Some('?') => Occurrence::Optional,
        Some('*') => Occurrence::ZeroOrMore,
        Some('+') => Occurrence::OneOrMore,
        _ => Occurrence::Once,
    })(input)
}

// [52] AttlistDecl ::= '<!ATTLIST' S Name AttDef* S? '>'
fn attlist_decl(input: Located) -> IResult<Located, AttlistDecl> {
    let parse = tuple((
        position,
        tag("<!ATTLIST"),
        s1,
        name,
        many0(att_def),
        s0,
        char('>'),
        position,
    ));
    map(parse, |(start, _, _, element, defs, _, _, end)| AttlistDecl {
        span: span(start, end),
        element,
        defs,
    })(input)
}

// [53] AttDef ::= S Name S AttType S DefaultDecl
fn att_def(input: Located) -> IResult<Located, AttDef> {
    let parse = tuple((s1, name, s1, att_type, s1, default_decl));
    map(parse, |(_, name, _, att_type, _, default)| AttDef {
        name,
        att_type,
        default,
    })(input)
}

// [54] AttType ::= StringType | TokenizedType | EnumeratedType
fn att_type(input: Located) -> IResult<Located, AttType> {
    alt((
        value(AttType::CData, tag("CDATA")),
        value(AttType::IdRefs, tag("IDREFS")),
        value(AttType::IdRef, tag("IDREF")),
        value(AttType::Id, tag("ID")),
        value(AttType::Entities, tag("ENTITIES")),
        value(AttType::Entity, tag("ENTITY")),
        value(AttType::NmTokens, tag("NMTOKENS")),
        value(AttType::NmToken, tag("NMTOKEN")),
        // [58] NotationType ::= 'NOTATION' S '(' S? Name (S? '|' S? Name)* S? ')'
        map(
            preceded(pair(tag("NOTATION"), s1), enumeration(name)),
            AttType::Notation,
        ),
        // [59] Enumeration ::= '(' S? Nmtoken (S? '|' S? Nmtoken)* S? ')'
        map(enumeration(nmtoken), AttType::Enumeration),
    ))(input)
}

fn enumeration<'a, F>(item: F) -> impl FnMut(Located<'a>) -> IResult<Located<'a>, Vec<String>>
where
    F: FnMut(Located<'a>) -> IResult<Located<'a>, String>,
{
    delimited(
        pair(char('('), s0),
        separated_list1(tuple((s0, char('|'), s0)), item),
        pair(s0, char(')')),
    )
}

// [60] DefaultDecl ::= '#REQUIRED' | '#IMPLIED' | (('#FIXED' S)? AttValue)
fn default_decl(input: Located) -> IResult<Located, DefaultDecl> {
    alt((
        value(DefaultDecl::Required, tag("#REQUIRED")),
        value(DefaultDecl::Implied, tag("#IMPLIED")),
        map(preceded(pair(tag("#FIXED"), s1), att_value), DefaultDecl::Fixed),
        map(att_value, DefaultDecl::Value),
    ))(input)
}

fn att_value(input: Located) -> IResult<Located, String> {
    verify(literal, |s: &str| !s.contains('<'))(input)
}

// [71] GEDecl ::= '<!ENTITY' S Name S EntityDef S? '>'
// [72] PEDecl ::= '<!ENTITY' S '%' S Name S PEDef S? '>'
fn entity_decl(input: Located) -> IResult<Located, EntityDecl> {
    let (input, (start, _, _)) = tuple((position, tag("<!ENTITY"), s1))(input)?;
    let (input, parameter) = map(opt(pair(char('%'), s1)), |p| p.is_some())(input)?;
    let (input, (entity_name, _)) = pair(name, s1)(input)?;
    let at_def = input;
    // [73] EntityDef ::= EntityValue | (ExternalID NDataDecl?)
    // [74] PEDef ::= EntityValue | ExternalID
    let (input, def) = alt((
        map(literal, EntityDef::Internal),
        map(
            pair(external_id, opt(preceded(tuple((s1, tag("NDATA"), s1)), name))),
            |(id, ndata)| EntityDef::External { id, ndata },
        ),
    ))(input)?;
    if parameter && matches!(def, EntityDef::External { ndata: Some(_), .. }) {
        return Err(nom::Err::Failure(Error::new(at_def, ErrorKind::Verify)));
    }
    let (input, (_, _, end)) = tuple((s0, char('>'), position))(input)?;
    Ok((
        input,
        EntityDecl {
            span: span(start, end),
            name: entity_name,
            parameter,
            def,
        },
    ))
}

// [82] NotationDecl ::= '<!NOTATION' S Name S (ExternalID | PublicID) S? '>'
fn notation_decl(input: Located) -> IResult<Located, NotationDecl> {
    let public_only = map(preceded(pair(tag("PUBLIC"), s1), pubid_literal), |public_id| {
        ExternalId {
            public_id: Some(public_id),
            system_id: None,
        }
    });
    let parse = tuple((
        position,
        tag("<!NOTATION"),
        s1,
        name,
        s1,
        alt((external_id, public_only)),
        s0,
        char('>'),
        position,
    ));
    map(parse, |(start, _, _, name, _, id, _, _, end)| NotationDecl {
        span: span(start, end),
        name,
        id,
    })(input)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use std::fmt;

    fn ck<T, F>(mut f: F, input: &str, expected: T)
    where
        F: FnMut(Located) -> IResult<Located, T>,
        T: PartialEq + fmt::Debug,
    {
        let (remaining, result) =
            f(Located::new(input)).unwrap_or_else(|_| panic!("failed to parse {:#?}", input));
        assert_eq!(result, expected);
        assert_eq!(*remaining.fragment(), "");
    }

    fn name_cp(name: &str, occurrence: Occurrence) -> ContentParticle {
        ContentParticle {
            particle: Particle::Name(name.to_string()),
            occurrence,
        }
    }

    #[test]
    fn subset_items() {
        let items = parse_subset(
            "<!-- c --> %ext; <?pi data?>\n<!ELEMENT a (#PCDATA)><!ENTITY e '>'>",
        )
        .unwrap();
        assert_eq!(items[0], DeclItem::Comment);
        assert_eq!(items[1], DeclItem::Whitespace);
        assert_eq!(
            items[2],
            DeclItem::PeReference {
                span: 11..16,
                name: "ext".to_string()
            }
        );
        assert_matches!(&items[4], DeclItem::Pi { target, data } if target == "pi" && data == "data");
        assert_matches!(&items[6], DeclItem::Markup { text, .. } if text == "<!ELEMENT a (#PCDATA)>");
        assert_matches!(&items[7], DeclItem::Markup { text, .. } if text == "<!ENTITY e '>'>");
    }

    #[test]
    fn subset_error_offset() {
        let err = parse_subset("<!ELEMENT a ANY> junk").unwrap_err();
        assert_eq!(err.offset, 17);
    }

    #[test]
    fn nested_conditional() {
        let items = parse_subset(
            "<![ %draft; [ <![IGNORE[ <!ELEMENT x ']]>'> ]]> <!ELEMENT a ANY> ]]>",
        )
        .unwrap();
        assert_matches!(&items[0], DeclItem::Conditional { keyword, body, .. } => {
            assert_eq!(keyword, "%draft;");
            assert_eq!(body, " <![IGNORE[ <!ELEMENT x ']]>'> ]]> <!ELEMENT a ANY> ");
        });
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn element_content() {
        ck(
            content_spec,
            "(a, (b | c)*, d?)+",
            ContentSpec::Children(ContentParticle {
                particle: Particle::Seq(vec![
                    name_cp("a", Occurrence::Once),
                    ContentParticle {
                        particle: Particle::Choice(vec![
                            name_cp("b", Occurrence::Once),
                            name_cp("c", Occurrence::Once),
                        ]),
                        occurrence: Occurrence::ZeroOrMore,
                    },
                    name_cp("d", Occurrence::Optional),
                ]),
                occurrence: Occurrence::OneOrMore,
            }),
        );
    }

    #[test]
    fn mixed_content() {
        ck(content_spec, "(#PCDATA)", ContentSpec::Mixed(vec![]));
        ck(
            content_spec,
            "( #PCDATA | em | b )*",
            ContentSpec::Mixed(vec!["em".to_string(), "b".to_string()]),
        );
        assert!(parse_markup_decl("<!ELEMENT p (#PCDATA|em)>").is_err());
    }

    #[test]
    fn mixed_separators_rejected() {
        assert!(parse_markup_decl("<!ELEMENT p (a, b | c)>").is_err());
    }

    #[test]
    fn element() {
        assert_eq!(
            parse_markup_decl("<!ELEMENT br EMPTY >").unwrap(),
            MarkupDecl::Element(ElementDecl {
                span: 0..20,
                name: "br".to_string(),
                content: ContentSpec::Empty,
            })
        );
    }

    #[test]
    fn attlist() {
        let decl = parse_markup_decl(
            "<!ATTLIST img\n  id ID #IMPLIED\n  kind (a|b) 'a'\n  ver CDATA #FIXED \"1\"\n  fmt NOTATION (gif) #REQUIRED\n  refs IDREFS #IMPLIED>",
        )
        .unwrap();
        assert_matches!(decl, MarkupDecl::Attlist(AttlistDecl { element, defs, .. }) => {
            assert_eq!(element, "img");
            assert_eq!(defs.len(), 5);
            assert_eq!(defs[0].att_type, AttType::Id);
            assert_eq!(defs[1].att_type, AttType::Enumeration(vec!["a".to_string(), "b".to_string()]));
            assert_eq!(defs[1].default, DefaultDecl::Value("a".to_string()));
            assert_eq!(defs[2].default, DefaultDecl::Fixed("1".to_string()));
            assert_eq!(defs[3].att_type, AttType::Notation(vec!["gif".to_string()]));
            assert_eq!(defs[4].att_type, AttType::IdRefs);
        });
    }

    #[test]
    fn entities() {
        assert_matches!(
            parse_markup_decl("<!ENTITY % p SYSTEM \"p.ent\">"),
            Ok(MarkupDecl::Entity(EntityDecl { parameter: true, def: EntityDef::External { ndata: None, .. }, .. }))
        );
        assert_matches!(
            parse_markup_decl("<!ENTITY logo PUBLIC '-//X//logo' 'logo.gif' NDATA gif>"),
            Ok(MarkupDecl::Entity(EntityDecl { parameter: false, def: EntityDef::External { id, ndata: Some(n) }, .. })) => {
                assert_eq!(n, "gif");
                assert_eq!(id.public_id.as_deref(), Some("-//X//logo"));
            }
        );
        assert_matches!(
            parse_markup_decl("<!ENTITY e \"a &amp; %p; &#60;\">"),
            Ok(MarkupDecl::Entity(EntityDecl { def: EntityDef::Internal(v), .. })) if v == "a &amp; %p; &#60;"
        );
        assert!(parse_markup_decl("<!ENTITY % p SYSTEM 'p' NDATA gif>").is_err());
    }

    #[test]
    fn notations() {
        assert_matches!(
            parse_markup_decl("<!NOTATION gif PUBLIC 'gif viewer'>"),
            Ok(MarkupDecl::Notation(NotationDecl { id: ExternalId { public_id: Some(_), system_id: None }, .. }))
        );
        assert_matches!(
            parse_markup_decl("<!NOTATION gif SYSTEM 'viewer.exe'>"),
            Ok(MarkupDecl::Notation(NotationDecl { id: ExternalId { public_id: None, system_id: Some(_) }, .. }))
        );
    }

    #[test]
    fn bad_pubid() {
        assert!(parse_markup_decl("<!NOTATION gif PUBLIC 'a{b}'>").is_err());
    }
}
