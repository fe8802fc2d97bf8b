//! Shared fixtures: the Aruba model, its rows, and a small in-memory
//! evaluator used to check that rewritten trees return the same rows as
//! the trees they came from.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use liftql::prelude::*;

pub const DEMO_CONFIG: &str = include_str!("../../demos/liftql.toml");

pub fn metadata() -> Metadata {
    MetadataBuilder::new()
        .entity_set(EntitySet::new("Owners", "dbo.ArubaOwners", "ArubaOwner"))
        .entity_set(EntitySet::new("Configs", "dbo.ArubaConfigs", "ArubaConfig").discriminator("Discriminator"))
        .entity_type(EntityTypeDef::new("ArubaOwner").properties(["Id", "FirstName", "LastName", "Alias"]))
        .entity_type(
            EntityTypeDef::new("ArubaConfig")
                .properties(["Id", "OS", "Lang", "Arch"])
                .condition(ConditionPropertyMapping::column_equals("Discriminator", "ArubaConfig").unwrap()),
        )
        .entity_type(
            EntityTypeDef::new("ArubaMachineConfig")
                .base("ArubaConfig")
                .properties(["Host", "Address", "Location"])
                .condition(ConditionPropertyMapping::column_equals("Discriminator", "ArubaMachineConfig").unwrap()),
        )
        .freeze()
        .unwrap()
}

pub fn compiler(options: CompilerOptions) -> Compiler {
    Compiler::new(Arc::new(metadata()), options)
}

pub type Row = BTreeMap<String, Value>;

fn row(pairs: Vec<(&str, Value)>) -> Row {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn opt(s: Option<&str>) -> Value {
    s.map(Value::from).unwrap_or(Value::Null)
}

pub fn owner_rows() -> Vec<Row> {
    let first = ["Ann", "Bob", "Cid", "Ann", "Dee", "Bob", "Eve", "Cid", "Ann", "Fay", "Bob", "Gus"];
    let alias = [
        Some("a"),
        None,
        Some("Bob"),
        Some("z"),
        None,
        Some("Bob"),
        Some("e"),
        None,
        Some("Bob"),
        Some("f"),
        Some("b"),
        None,
    ];
    (0..12)
        .map(|i| {
            row(vec![
                ("Id", Value::Int(i as i64 + 1)),
                ("FirstName", Value::from(first[i])),
                ("LastName", Value::from(format!("Last{}", 12 - i))),
                ("Alias", opt(alias[i])),
            ])
        })
        .collect()
}

pub fn config_rows() -> Vec<Row> {
    let arch = ["x86", "arm", "x64", "arm", "x86", "x64", "arm", "x86", "x64", "x86", "arm", "x64"];
    (0..12)
        .map(|i| {
            let id = i as i64 + 1;
            let machine = i % 3 != 0;
            let host = |s: String| if machine { Value::from(s) } else { Value::Null };
            row(vec![
                ("Id", Value::Int(id)),
                ("OS", Value::from(if i % 2 == 0 { "Linux" } else { "Windows" })),
                ("Lang", Value::from(if i % 4 == 0 { "en" } else { "fr" })),
                ("Arch", Value::from(arch[i])),
                ("Host", host(format!("host{}", id))),
                ("Address", host(format!("10.0.0.{}", id))),
                ("Location", host(format!("rack{}", id % 4))),
                (
                    "Discriminator",
                    Value::from(if machine { "ArubaMachineConfig" } else { "ArubaConfig" }),
                ),
            ])
        })
        .collect()
}

/// How comparisons treat nulls while evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    /// `null = null` is true, null against a value is false.
    Clr,
    /// Three-valued: any comparison with null is unknown.
    Sql,
}

/// Rows plus the output columns that produced them.
#[derive(Debug, Clone)]
pub struct Relation {
    pub columns: Vec<(String, bool)>,
    pub rows: Vec<Row>,
}

impl Relation {
    /// Visible columns of each row, in column order.
    pub fn visible(&self) -> Vec<Vec<(String, Value)>> {
        self.rows
            .iter()
            .map(|r| {
                self.columns
                    .iter()
                    .filter(|(_, hidden)| !hidden)
                    .map(|(name, _)| (name.clone(), r.get(name).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.rows
            .iter()
            .map(|r| match r.get("Id") {
                Some(Value::Int(n)) => *n,
                other => panic!("row without integer Id: {:?}", other),
            })
            .collect()
    }
}

pub fn evaluate(node: &OperatorNode, md: &Metadata, logic: Logic) -> Relation {
    match node {
        OperatorNode::Source { relation } => {
            let set = md.relation(relation).unwrap();
            let rows = match relation.as_str() {
                "Owners" => owner_rows(),
                "Configs" => config_rows(),
                other => panic!("no rows for {}", other),
            };
            Relation {
                columns: md.relation_columns(set).into_iter().map(|c| (c, false)).collect(),
                rows,
            }
        }
        OperatorNode::Filter { predicate, input } => {
            let mut rel = evaluate(input, md, logic);
            rel.rows.retain(|r| eval(predicate, r, logic) == Value::Bool(true));
            rel
        }
        OperatorNode::Project { columns, input } => {
            let rel = evaluate(input, md, logic);
            let rows = rel
                .rows
                .iter()
                .map(|r| {
                    columns
                        .iter()
                        .map(|c| (c.name.clone(), eval(&c.expr, r, logic)))
                        .collect()
                })
                .collect();
            Relation {
                columns: columns.iter().map(|c| (c.name.clone(), c.hidden)).collect(),
                rows,
            }
        }
        OperatorNode::Sort { keys, input } => {
            let mut rel = evaluate(input, md, logic);
            rel.rows.sort_by(|a, b| {
                for key in keys {
                    let ord = compare(&eval(&key.expr, a, logic), &eval(&key.expr, b, logic));
                    let ord = match key.direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            rel
        }
        OperatorNode::Skip { count, input } => {
            let mut rel = evaluate(input, md, logic);
            let n = (*count as usize).min(rel.rows.len());
            rel.rows.drain(..n);
            rel
        }
        OperatorNode::Take { count, input } => {
            let mut rel = evaluate(input, md, logic);
            rel.rows.truncate(*count as usize);
            rel
        }
        OperatorNode::TypeFilter { subtype, input } => {
            let rel = evaluate(input, md, logic);
            let rows = rel
                .rows
                .into_iter()
                .filter(|r| {
                    let ty = match r.get("Discriminator") {
                        Some(Value::String(s)) => s.as_str(),
                        other => panic!("row without discriminator: {:?}", other),
                    };
                    md.is_subtype_of(ty, subtype)
                })
                .collect();
            Relation {
                columns: md.type_columns(subtype).into_iter().map(|c| (c, false)).collect(),
                rows,
            }
        }
    }
}

fn truth(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Null => None,
        other => panic!("not a truth value: {:?}", other),
    }
}

fn from_truth(t: Option<bool>) -> Value {
    t.map(Value::Bool).unwrap_or(Value::Null)
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => panic!("cannot compare {:?} with {:?}", x, y),
    }
}

pub fn eval(expr: &Expr, r: &Row, logic: Logic) -> Value {
    match expr {
        Expr::Column(name) => r
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("no column {} in {:?}", name, r)),
        Expr::Literal(v) => v.clone(),
        Expr::Binary { op, left, right } => {
            let l = eval(left, r, logic);
            let rv = eval(right, r, logic);
            match op {
                BinaryOp::And => from_truth(match (truth(&l), truth(&rv)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }),
                BinaryOp::Or => from_truth(match (truth(&l), truth(&rv)) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }),
                op if op.is_arithmetic() => match (l, rv) {
                    (Value::Int(x), Value::Int(y)) => match op {
                        BinaryOp::Add => Value::Int(x + y),
                        BinaryOp::Sub => Value::Int(x - y),
                        BinaryOp::Mul => Value::Int(x * y),
                        BinaryOp::Div if y != 0 => Value::Int(x / y),
                        BinaryOp::Mod if y != 0 => Value::Int(x % y),
                        _ => Value::Null,
                    },
                    _ => Value::Null,
                },
                op => comparison(*op, &l, &rv, logic),
            }
        }
        Expr::Not(e) => from_truth(truth(&eval(e, r, logic)).map(|b| !b)),
        Expr::IsNull(e) => Value::Bool(eval(e, r, logic).is_null()),
        Expr::IsNotNull(e) => Value::Bool(!eval(e, r, logic).is_null()),
        Expr::InList { expr, values } => match eval(expr, r, logic) {
            Value::Null => Value::Null,
            v => Value::Bool(values.contains(&v)),
        },
        Expr::Case { when, then } => match eval(when, r, logic) {
            Value::Bool(true) => eval(then, r, logic),
            _ => Value::Null,
        },
    }
}

fn comparison(op: BinaryOp, l: &Value, r: &Value, logic: Logic) -> Value {
    if l.is_null() || r.is_null() {
        return match (logic, op) {
            (Logic::Sql, _) => Value::Null,
            (Logic::Clr, BinaryOp::Eq) => Value::Bool(l.is_null() && r.is_null()),
            (Logic::Clr, BinaryOp::Ne) => Value::Bool(l.is_null() != r.is_null()),
            (Logic::Clr, _) => Value::Bool(false),
        };
    }
    let ord = compare(l, r);
    Value::Bool(match op {
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::Ne => ord != Ordering::Equal,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Lte => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::Gte => ord != Ordering::Less,
        other => panic!("not a comparison: {:?}", other),
    })
}

/// Evaluate `tree` as written (host-language null rules) and after the
/// compiler's rewrites (database null rules), and return both results.
pub fn both(compiler: &Compiler, tree: &OperatorNode) -> (Relation, Relation) {
    let md = compiler.metadata();
    let expected = evaluate(tree, md, Logic::Clr);
    let rewritten = compiler.rewrite(tree.clone()).unwrap();
    let actual = evaluate(&rewritten, md, Logic::Sql);
    (expected, actual)
}
