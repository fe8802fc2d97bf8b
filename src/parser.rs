//! Pipeline parser using nom.
//!
//! Parses the command-line pipeline syntax into an operator tree.
//!
//! # Syntax Overview
//!
//! ```text
//! Owners | order FirstName desc, Id | skip 5 | where Id % 2 = 0
//! ──┬───   ──────────┬────────────   ───┬──   ────────┬───────
//!   │                │                  │             │
//!   │                │                  │             └── Filter
//!   │                │                  └── Skip
//!   │                └── Sort (later keys break ties)
//!   └── Source relation
//! ```
//!
//! Stages: `where <expr>`, `select <expr> [as name], ...`,
//! `order [by] <expr> [asc|desc], ...`, `skip <n>`, `take <n>`,
//! `oftype <Type>`.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{cut, map, map_res, not, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::{col, BinaryOp, Expr, OperatorNode, ProjectColumn, SortDirection, SortKey, Value};
use crate::error::{LiftError, LiftResult};

/// One `| stage` of a pipeline.
#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Where(Expr),
    Select(Vec<ProjectColumn>),
    Order(Vec<SortKey>),
    Skip(u64),
    Take(u64),
    OfType(String),
}

impl Stage {
    fn apply(self, node: OperatorNode) -> OperatorNode {
        match self {
            Stage::Where(predicate) => node.filter(predicate),
            Stage::Select(columns) => node.project(columns),
            Stage::Order(keys) => node.sort(keys),
            Stage::Skip(n) => node.skip(n),
            Stage::Take(n) => node.take(n),
            Stage::OfType(subtype) => node.of_type(subtype),
        }
    }
}

/// Parse a complete pipeline string.
pub fn parse(input: &str) -> LiftResult<OperatorNode> {
    let input = input.trim_end();

    match parse_pipeline(input) {
        Ok(("", node)) => Ok(node),
        Ok((remaining, _)) => Err(LiftError::parse(
            input.len() - remaining.len(),
            format!("Unexpected trailing content: '{}'", remaining),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(LiftError::parse(
            input.len() - e.input.len(),
            format!("Unexpected input: '{}'", e.input),
        )),
        Err(nom::Err::Incomplete(_)) => Err(LiftError::parse(input.len(), "Unexpected end of input")),
    }
}

/// Parse a standalone expression, e.g. a predicate given on the command line.
pub fn parse_expression(input: &str) -> LiftResult<Expr> {
    let input = input.trim_end();
    match delimited(multispace0, parse_expr, multispace0)(input) {
        Ok(("", expr)) => Ok(expr),
        Ok((remaining, _)) => Err(LiftError::parse(
            input.len() - remaining.len(),
            format!("Unexpected trailing content: '{}'", remaining),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(LiftError::parse(
            input.len() - e.input.len(),
            format!("Unexpected input: '{}'", e.input),
        )),
        Err(nom::Err::Incomplete(_)) => Err(LiftError::parse(input.len(), "Unexpected end of input")),
    }
}

fn parse_pipeline(input: &str) -> IResult<&str, OperatorNode> {
    let (input, _) = multispace0(input)?;
    let (input, relation) = parse_identifier(input)?;
    let (input, stages) = many0(preceded(
        tuple((multispace0, char('|'), multispace0)),
        cut(parse_stage),
    ))(input)?;
    let (input, _) = multispace0(input)?;

    let node = stages
        .into_iter()
        .fold(OperatorNode::source(relation), |node, stage| stage.apply(node));
    Ok((input, node))
}

fn parse_stage(input: &str) -> IResult<&str, Stage> {
    alt((
        map(preceded(pair(keyword("where"), multispace0), parse_expr), Stage::Where),
        map(preceded(pair(keyword("select"), multispace0), parse_select_list), Stage::Select),
        map(
            preceded(
                tuple((keyword("order"), multispace0, opt(pair(keyword("by"), multispace0)))),
                separated_list1(list_separator, parse_sort_key),
            ),
            Stage::Order,
        ),
        map(preceded(pair(keyword("skip"), multispace0), parse_count), Stage::Skip),
        map(preceded(pair(keyword("take"), multispace0), parse_count), Stage::Take),
        map(preceded(pair(keyword("oftype"), multispace0), parse_identifier), |t| {
            Stage::OfType(t.to_string())
        }),
    ))(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Parse an identifier (relation, column or type name).
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_char)))(input)
}

/// A case-insensitive keyword not followed by more identifier characters.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(take_while1(is_ident_char)))
}

fn list_separator(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0)(input)
}

fn parse_count(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>())(input)
}

/// Parse `expr [as name], ...`. Unnamed computed columns become `C1`, `C2`, ...
fn parse_select_list(input: &str) -> IResult<&str, Vec<ProjectColumn>> {
    let item = pair(
        parse_expr,
        opt(preceded(tuple((multispace0, keyword("as"), multispace0)), parse_identifier)),
    );
    let (input, items) = separated_list1(list_separator, item)(input)?;

    let mut unnamed = 0;
    let columns = items
        .into_iter()
        .map(|(expr, alias)| {
            let name = match (alias, expr.as_column()) {
                (Some(alias), _) => alias.to_string(),
                (None, Some(column)) => column.to_string(),
                (None, None) => {
                    unnamed += 1;
                    format!("C{}", unnamed)
                }
            };
            ProjectColumn::new(name, expr)
        })
        .collect();
    Ok((input, columns))
}

fn parse_sort_key(input: &str) -> IResult<&str, SortKey> {
    let (input, expr) = parse_expr(input)?;
    let (input, direction) = opt(preceded(
        multispace0,
        alt((
            value(SortDirection::Desc, keyword("desc")),
            value(SortDirection::Asc, keyword("asc")),
        )),
    ))(input)?;
    Ok((
        input,
        SortKey {
            expr,
            direction: direction.unwrap_or(SortDirection::Asc),
        },
    ))
}

/// Parse an expression (lowest precedence: `or`).
fn parse_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, keyword("or"), multispace0),
        parse_and,
    ))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::or)))
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_not(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, keyword("and"), multispace0),
        parse_not,
    ))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::and)))
}

fn parse_not(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(pair(keyword("not"), multispace0), parse_not), |e| {
            Expr::Not(Box::new(e))
        }),
        parse_comparison,
    ))(input)
}

/// Parse `additive [op additive]` or `additive is [not] null`.
fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_additive(input)?;

    if let Ok((rest, negated)) = parse_null_test(input) {
        let expr = if negated {
            left.is_not_null()
        } else {
            left.is_null()
        };
        return Ok((rest, expr));
    }

    let (input, tail) = opt(pair(
        delimited(multispace0, parse_comparison_op, multispace0),
        parse_additive,
    ))(input)?;

    Ok((
        input,
        match tail {
            Some((op, right)) => Expr::binary(op, left, right),
            None => left,
        },
    ))
}

/// ` is [not] null`; returns whether the test is negated.
fn parse_null_test(input: &str) -> IResult<&str, bool> {
    let (input, _) = multispace0(input)?;
    let (input, _) = keyword("is")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, negated) = opt(terminated(keyword("not"), multispace1))(input)?;
    let (input, _) = keyword("null")(input)?;
    Ok((input, negated.is_some()))
}

fn parse_comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Lte, tag("<=")),
        value(BinaryOp::Ne, tag("<>")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Gte, tag(">=")),
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Lt, char('<')),
        value(BinaryOp::Gt, char('>')),
        value(BinaryOp::Eq, char('=')),
    ))(input)
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_multiplicative(input)?;
    let (input, rest) = many0(pair(
        delimited(
            multispace0,
            alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-')))),
            multispace0,
        ),
        parse_multiplicative,
    ))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |left, (op, right)| Expr::binary(op, left, right)),
    ))
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_primary(input)?;
    let (input, rest) = many0(pair(
        delimited(
            multispace0,
            alt((
                value(BinaryOp::Mul, char('*')),
                value(BinaryOp::Div, char('/')),
                value(BinaryOp::Mod, char('%')),
            )),
            multispace0,
        ),
        parse_primary,
    ))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |left, (op, right)| Expr::binary(op, left, right)),
    ))
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(
            pair(char('('), multispace0),
            parse_expr,
            pair(multispace0, char(')')),
        ),
        map(parse_literal, Expr::Literal),
        map(parse_identifier, col),
    ))(input)
}

fn parse_literal(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Null, keyword("null")),
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
        parse_integer,
        parse_quoted_string,
    ))(input)
}

fn parse_integer(input: &str) -> IResult<&str, Value> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>().map(Value::Int)
    })(input)
}

/// Parse a quoted string; `''` is an escaped quote.
fn parse_quoted_string(input: &str) -> IResult<&str, Value> {
    let (input, _) = char('\'')(input)?;
    let (input, parts) = many0(alt((take_while1(|c: char| c != '\''), value("'", tag("''")))))(input)?;
    let (input, _) = char('\'')(input)?;

    Ok((input, Value::String(parts.concat())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::lit;
    use pretty_assertions::assert_eq;

    fn keys() -> Vec<SortKey> {
        vec![SortKey::desc(col("FirstName")), SortKey::asc(col("Id"))]
    }

    #[test]
    fn test_source_only() {
        assert_eq!(parse("Owners").unwrap(), OperatorNode::source("Owners"));
        assert_eq!(parse("  Owners  ").unwrap(), OperatorNode::source("Owners"));
    }

    #[test]
    fn test_skip_then_filter() {
        let tree = parse("Owners | order FirstName desc, Id | skip 5 | where Id % 2 = 0").unwrap();
        let expected = OperatorNode::source("Owners")
            .sort(keys())
            .skip(5)
            .filter(col("Id").modulo(lit(2)).equals(lit(0)));
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_order_by_and_take() {
        let tree = parse("Configs | order by Arch desc, Id asc | take 10 | oftype ArubaMachineConfig").unwrap();
        let expected = OperatorNode::source("Configs")
            .sort(vec![SortKey::desc(col("Arch")), SortKey::asc(col("Id"))])
            .take(10)
            .of_type("ArubaMachineConfig");
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_select_names() {
        let tree = parse("Owners | select FirstName, Id, Id * 5 as Foo, Id + 1").unwrap();
        let OperatorNode::Project { columns, .. } = tree else {
            panic!("expected projection");
        };
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["FirstName", "Id", "Foo", "C1"]);
        assert_eq!(columns[2].expr, col("Id").mul(lit(5)));
    }

    #[test]
    fn test_precedence() {
        let e = parse_expression("a = 1 or b = 2 and not c = 3").unwrap();
        let expected = col("a").equals(lit(1)).or(col("b")
            .equals(lit(2))
            .and(Expr::Not(Box::new(col("c").equals(lit(3))))));
        assert_eq!(e, expected);

        let e = parse_expression("(a + 1) * 2 >= b - 3").unwrap();
        let expected = Expr::binary(
            BinaryOp::Gte,
            col("a").add(lit(1)).mul(lit(2)),
            Expr::binary(BinaryOp::Sub, col("b"), lit(3)),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_null_tests_and_literals() {
        assert_eq!(parse_expression("Alias is null").unwrap(), col("Alias").is_null());
        assert_eq!(
            parse_expression("Alias IS NOT NULL").unwrap(),
            col("Alias").is_not_null()
        );
        assert_eq!(
            parse_expression("Name <> 'O''Neil'").unwrap(),
            col("Name").not_equals(lit("O'Neil"))
        );
        assert_eq!(parse_expression("Flag = true").unwrap(), col("Flag").equals(lit(true)));
        assert_eq!(parse_expression("x != -4").unwrap(), col("x").not_equals(lit(-4)));
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(parse_expression("nullable").unwrap(), col("nullable"));
        assert_eq!(parse_expression("order_id = 1").unwrap(), col("order_id").equals(lit(1)));
    }

    #[test]
    fn test_bad_stage_position() {
        let err = parse("Owners | bogus").unwrap_err();
        match err {
            LiftError::Parse { position, .. } => assert_eq!(position, 9),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_content() {
        let err = parse("Owners garbage").unwrap_err();
        assert!(matches!(err, LiftError::Parse { position: 7, .. }));
    }
}
