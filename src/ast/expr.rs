//! Scalar expressions used by predicates, projections and sort keys.
//!
//! Expressions are handles: the compiler never interprets them beyond
//! structural equality, column substitution and rendering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    /// The SQL spelling of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }
}

/// A scalar expression over the columns of a node's input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to an input column by name.
    Column(String),
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    /// `expr IN (v1, v2, ...)`
    InList { expr: Box<Expr>, values: Vec<Value> },
    /// `CASE WHEN when THEN then END` (no ELSE: yields null).
    Case { when: Box<Expr>, then: Box<Expr> },
}

/// Column reference shorthand.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Literal shorthand.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, self, other)
    }

    pub fn not_equals(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Ne, self, other)
    }

    pub fn less_than(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, self, other)
    }

    pub fn greater_than(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    pub fn add(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, other)
    }

    pub fn mul(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, self, other)
    }

    pub fn modulo(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Mod, self, other)
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    pub fn in_list(self, values: Vec<Value>) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            values,
        }
    }

    pub fn case_when(when: Expr, then: Expr) -> Expr {
        Expr::Case {
            when: Box::new(when),
            then: Box::new(then),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    /// The column name if this is a bare column reference.
    pub fn as_column(&self) -> Option<&str> {
        match self {
            Expr::Column(name) => Some(name),
            _ => None,
        }
    }

    /// Replace every column reference with the expression `f` returns for it.
    pub fn substitute(&self, f: &impl Fn(&str) -> Expr) -> Expr {
        match self {
            Expr::Column(name) => f(name),
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::Binary { op, left, right } => {
                Expr::binary(*op, left.substitute(f), right.substitute(f))
            }
            Expr::Not(e) => Expr::Not(Box::new(e.substitute(f))),
            Expr::IsNull(e) => Expr::IsNull(Box::new(e.substitute(f))),
            Expr::IsNotNull(e) => Expr::IsNotNull(Box::new(e.substitute(f))),
            Expr::InList { expr, values } => Expr::InList {
                expr: Box::new(expr.substitute(f)),
                values: values.clone(),
            },
            Expr::Case { when, then } => Expr::case_when(when.substitute(f), then.substitute(f)),
        }
    }

    /// Names of all columns this expression reads, in first-use order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => e.collect_columns(out),
            Expr::InList { expr, .. } => expr.collect_columns(out),
            Expr::Case { when, then } => {
                when.collect_columns(out);
                then.collect_columns(out);
            }
        }
    }

    fn is_atom(&self) -> bool {
        matches!(self, Expr::Column(_) | Expr::Literal(_))
    }
}

/// Pipeline-syntax rendering, used by `explain` output.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn operand(e: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if e.is_atom() {
                write!(f, "{}", e)
            } else {
                write!(f, "({})", e)
            }
        }

        match self {
            Expr::Column(name) => write!(f, "{}", name),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Binary { op, left, right } => {
                operand(left, f)?;
                write!(f, " {} ", op.symbol().to_lowercase())?;
                operand(right, f)
            }
            Expr::Not(e) => {
                write!(f, "not ")?;
                operand(e, f)
            }
            Expr::IsNull(e) => {
                operand(e, f)?;
                write!(f, " is null")
            }
            Expr::IsNotNull(e) => {
                operand(e, f)?;
                write!(f, " is not null")
            }
            Expr::InList { expr, values } => {
                operand(expr, f)?;
                let vals: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, " in ({})", vals.join(", "))
            }
            Expr::Case { when, then } => write!(f, "case when {} then {} end", when, then),
        }
    }
}
