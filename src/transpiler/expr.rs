//! Expression rendering.
//!
//! Column references are qualified with the alias of the statement's FROM
//! item: `[Extent1].[Id]`.

use crate::ast::{BinaryOp, Expr, SortKey, Value};

/// `[name]`, with `]` doubled.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a possibly schema-qualified table name: `dbo.Owners` -> `[dbo].[Owners]`.
pub fn quote_table(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Int(n) => n.to_string(),
        Value::String(s) => format!("N'{}'", s.replace('\'', "''")),
    }
}

/// Render `expr` with columns resolved against `alias`.
pub fn render(expr: &Expr, alias: &str) -> String {
    match expr {
        Expr::Column(name) => format!("{}.{}", quote_ident(alias), quote_ident(name)),
        Expr::Literal(v) => render_value(v),
        Expr::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            ..
        } => {
            let mut terms = Vec::new();
            flatten(expr, *op, &mut terms);
            let parts: Vec<String> = terms.iter().map(|t| operand(t, alias)).collect();
            parts.join(&format!(" {} ", op.symbol()))
        }
        Expr::Binary { op, left, right } => {
            format!("{} {} {}", operand(left, alias), op.symbol(), operand(right, alias))
        }
        Expr::Not(e) => format!("NOT {}", operand(e, alias)),
        Expr::IsNull(e) => format!("{} IS NULL", null_test_operand(e, alias)),
        Expr::IsNotNull(e) => format!("{} IS NOT NULL", null_test_operand(e, alias)),
        Expr::InList { expr, values } if values.len() == 1 => {
            format!("{} = {}", operand(expr, alias), render_value(&values[0]))
        }
        Expr::InList { expr, values } => {
            let values: Vec<String> = values.iter().map(render_value).collect();
            format!("{} IN ({})", operand(expr, alias), values.join(","))
        }
        Expr::Case { when, then } => format!(
            "CASE WHEN ({}) THEN {} END",
            render(when, alias),
            operand(then, alias)
        ),
    }
}

pub fn render_keys(keys: &[SortKey], alias: &str) -> String {
    keys.iter()
        .map(|k| format!("{} {}", render(&k.expr, alias), k.direction))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Collect the operands of a chain of the same associative connective.
fn flatten<'a>(expr: &'a Expr, op: BinaryOp, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary { op: inner, left, right } if *inner == op => {
            flatten(left, op, out);
            flatten(right, op, out);
        }
        other => out.push(other),
    }
}

fn is_atom(expr: &Expr) -> bool {
    matches!(expr, Expr::Column(_) | Expr::Literal(_))
}

fn operand(expr: &Expr, alias: &str) -> String {
    if is_atom(expr) || matches!(expr, Expr::Case { .. }) {
        render(expr, alias)
    } else {
        format!("({})", render(expr, alias))
    }
}

/// Arithmetic binds tighter than IS [NOT] NULL, so it stays bare.
fn null_test_operand(expr: &Expr, alias: &str) -> String {
    match expr {
        Expr::Binary { op, .. } if op.is_arithmetic() => render(expr, alias),
        _ => operand(expr, alias),
    }
}
