//! Parser for the Cypher subset the mapper emits.

use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while, take_while1};
use nom::character::complete::{anychar, char, digit1, multispace0, satisfy};
use nom::combinator::{cut, map, map_opt, not, opt, recognize, value};
use nom::error::{Error, ErrorKind};
use nom::multi::{fold_many0, many0, separated_list0, separated_list1};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated};
use nom::{IResult, Parser};
use serde_json::{Number, Value};

use crate::entity::Direction;
use crate::error::{DriverError, DriverResult};

type PResult<'a, O> = IResult<&'a str, O>;

/// A literal or a `$parameter` reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Param(String),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub variable: Option<String>,
    pub rel_type: String,
    /// Direction seen from the node on the left of the pattern.
    pub direction: Direction,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub start: NodePattern,
    pub hop: Option<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    Property {
        variable: String,
        key: String,
        value: Expr,
    },
    Label {
        variable: String,
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnItem {
    Variable(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(Vec<PathPattern>),
    Create(PathPattern),
    Merge {
        pattern: PathPattern,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },
    Set(Vec<SetItem>),
    Delete {
        detach: bool,
        variables: Vec<String>,
    },
    Return(Vec<ReturnItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

fn syntax(message: impl Into<String>) -> DriverError {
    DriverError::Syntax(message.into())
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn sym<'a>(c: char) -> impl Parser<&'a str, Output = char, Error = Error<&'a str>> {
    ws(char(c))
}

/// Case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = Error<&'a str>> {
    ws(terminated(tag_no_case(word), not(satisfy(is_ident_char))))
}

/// Plain or backtick-quoted name.
fn identifier(input: &str) -> PResult<'_, String> {
    map(
        alt((
            delimited(char('`'), take_while1(|c: char| c != '`'), char('`')),
            recognize(pair(
                satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
                take_while(is_ident_char),
            )),
        )),
        str::to_string,
    )
    .parse(input)
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        other => other,
    }
}

fn quoted<'a>(quote: char) -> impl Parser<&'a str, Output = String, Error = Error<&'a str>> {
    delimited(
        char(quote),
        fold_many0(
            alt((
                map(preceded(char('\\'), anychar), unescape),
                satisfy(move |c: char| c != quote && c != '\\'),
            )),
            String::new,
            |mut text: String, c: char| {
                text.push(c);
                text
            },
        ),
        cut(char(quote)),
    )
}

fn number(input: &str) -> PResult<'_, Number> {
    map_opt(
        recognize((opt(char('-')), digit1, opt(pair(char('.'), digit1)))),
        |literal: &str| {
            if literal.contains('.') {
                literal.parse::<f64>().ok().and_then(Number::from_f64)
            } else {
                literal.parse::<i64>().ok().map(Number::from)
            }
        },
    )
    .parse(input)
}

fn expr(input: &str) -> PResult<'_, Expr> {
    alt((
        map(preceded(char('$'), cut(identifier)), Expr::Param),
        map(alt((quoted('\''), quoted('"'))), |text: String| {
            Expr::Literal(Value::String(text))
        }),
        map(number, |n| Expr::Literal(Value::Number(n))),
        value(Expr::Literal(Value::Bool(true)), keyword("true")),
        value(Expr::Literal(Value::Bool(false)), keyword("false")),
        value(Expr::Literal(Value::Null), keyword("null")),
    ))
    .parse(input)
}

fn property_map(input: &str) -> PResult<'_, Vec<(String, Expr)>> {
    delimited(
        sym('{'),
        separated_list0(
            sym(','),
            separated_pair(identifier, sym(':'), ws(expr)),
        ),
        sym('}'),
    )
    .parse(input)
}

fn node_pattern(input: &str) -> PResult<'_, NodePattern> {
    let (input, _) = sym('(').parse(input)?;
    let (input, variable) = opt(identifier).parse(input)?;
    let (input, labels) = many0(preceded(sym(':'), identifier)).parse(input)?;
    let (input, properties) = opt(property_map).parse(input)?;
    let (input, _) = sym(')').parse(input)?;

    Ok((
        input,
        NodePattern {
            variable,
            labels,
            properties: properties.unwrap_or_default(),
        },
    ))
}

fn rel_pattern(input: &str) -> PResult<'_, RelPattern> {
    let (input, points_left) = opt(sym('<')).parse(input)?;
    let (input, _) = (sym('-'), sym('[')).parse(input)?;
    let (input, variable) = opt(identifier).parse(input)?;
    let (input, rel_type) = preceded(sym(':'), identifier).parse(input)?;
    let (input, properties) = opt(property_map).parse(input)?;
    let (input, _) = (sym(']'), sym('-')).parse(input)?;
    let (input, points_right) = opt(sym('>')).parse(input)?;

    let direction = match (points_left.is_some(), points_right.is_some()) {
        (true, false) => Direction::Incoming,
        (false, true) => Direction::Outgoing,
        _ => return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify))),
    };

    Ok((
        input,
        RelPattern {
            variable,
            rel_type,
            direction,
            properties: properties.unwrap_or_default(),
        },
    ))
}

fn path(input: &str) -> PResult<'_, PathPattern> {
    map(
        pair(node_pattern, opt(pair(rel_pattern, node_pattern))),
        |(start, hop)| PathPattern { start, hop },
    )
    .parse(input)
}

fn set_item(input: &str) -> PResult<'_, SetItem> {
    let (input, variable) = ws(identifier).parse(input)?;
    let result = alt((
        map(
            separated_pair(preceded(char('.'), identifier), sym('='), expr),
            |(key, assigned)| SetItem::Property {
                variable: variable.clone(),
                key,
                value: assigned,
            },
        ),
        map(preceded(sym(':'), identifier), |label| SetItem::Label {
            variable: variable.clone(),
            label,
        }),
    ))
    .parse(input);
    result
}

fn set_items(input: &str) -> PResult<'_, Vec<SetItem>> {
    cut(separated_list1(sym(','), set_item)).parse(input)
}

fn match_clause(input: &str) -> PResult<'_, Clause> {
    map(
        preceded(keyword("MATCH"), cut(separated_list1(sym(','), path))),
        Clause::Match,
    )
    .parse(input)
}

fn create_clause(input: &str) -> PResult<'_, Clause> {
    map(preceded(keyword("CREATE"), cut(path)), Clause::Create).parse(input)
}

fn merge_clause(input: &str) -> PResult<'_, Clause> {
    let (input, pattern) = preceded(keyword("MERGE"), cut(path)).parse(input)?;
    let (input, actions) = many0(preceded(
        keyword("ON"),
        cut(pair(
            alt((value(true, keyword("CREATE")), value(false, keyword("MATCH")))),
            preceded(keyword("SET"), set_items),
        )),
    ))
    .parse(input)?;

    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    for (creating, items) in actions {
        if creating {
            on_create.extend(items);
        } else {
            on_match.extend(items);
        }
    }

    Ok((
        input,
        Clause::Merge {
            pattern,
            on_create,
            on_match,
        },
    ))
}

fn set_clause(input: &str) -> PResult<'_, Clause> {
    map(preceded(keyword("SET"), set_items), Clause::Set).parse(input)
}

fn delete_clause(input: &str) -> PResult<'_, Clause> {
    map(
        pair(
            opt(keyword("DETACH")),
            preceded(
                keyword("DELETE"),
                cut(separated_list1(sym(','), ws(identifier))),
            ),
        ),
        |(detach, variables)| Clause::Delete {
            detach: detach.is_some(),
            variables,
        },
    )
    .parse(input)
}

fn return_item(input: &str) -> PResult<'_, ReturnItem> {
    alt((
        map(ws(expr), ReturnItem::Expr),
        map(ws(identifier), ReturnItem::Variable),
    ))
    .parse(input)
}

fn return_clause(input: &str) -> PResult<'_, Clause> {
    map(
        preceded(keyword("RETURN"), cut(separated_list1(sym(','), return_item))),
        Clause::Return,
    )
    .parse(input)
}

fn clause(input: &str) -> PResult<'_, Clause> {
    alt((
        match_clause,
        create_clause,
        merge_clause,
        set_clause,
        delete_clause,
        return_clause,
    ))
    .parse(input)
}

/// Parses one statement.
pub fn parse(text: &str) -> DriverResult<Query> {
    let (rest, clauses) = preceded(multispace0, many0(clause))
        .parse(text)
        .map_err(|e| syntax(format!("invalid statement: {}", e)))?;

    if !rest.is_empty() {
        let offset = text.len() - rest.len();
        let snippet: String = rest.chars().take(24).collect();
        return Err(syntax(format!(
            "unexpected input at offset {}: {:?}",
            offset, snippet
        )));
    }
    if clauses.is_empty() {
        return Err(syntax("empty statement"));
    }

    Ok(Query { clauses })
}
