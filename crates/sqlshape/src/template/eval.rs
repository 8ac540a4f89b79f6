//! Tree-walking evaluator for parsed templates.

use super::Context;
use super::parser::{BinOp, Expr, Node};
use crate::error::{ShapeError, ShapeResult};
use crate::value::{Record, Value, as_number, is_truthy, number, to_text};
use regex::Regex;
use std::cmp::Ordering;

pub(crate) struct Evaluator<'a> {
    strict: bool,
    private: Option<&'a Regex>,
    ctx: &'a mut dyn Context,
    locals: Vec<(String, Value)>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(strict: bool, private: Option<&'a Regex>, ctx: &'a mut dyn Context) -> Self {
        Self {
            strict,
            private,
            ctx,
            locals: Vec::new(),
        }
    }

    fn is_private(&self, name: &str) -> bool {
        self.private.is_some_and(|re| re.is_match(name))
    }

    pub(crate) fn run(&mut self, nodes: &[Node], out: &mut String) -> ShapeResult<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output { expr, line } => {
                    let value = self.eval(expr, *line)?;
                    out.push_str(&to_text(&value));
                }
                Node::If {
                    branches,
                    otherwise,
                    line,
                } => {
                    let mut taken = false;
                    for (cond, body) in branches {
                        if is_truthy(&self.eval(cond, *line)?) {
                            self.run(body, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.run(otherwise, out)?;
                    }
                }
                Node::Foreach {
                    var,
                    list,
                    body,
                    line,
                } => {
                    let items = match self.eval(list, *line)? {
                        Value::Null => Vec::new(),
                        Value::Array(items) => items,
                        Value::Object(map) => map
                            .into_iter()
                            .map(|(key, value)| {
                                let mut pair = Record::new();
                                pair.insert("key".to_string(), Value::String(key));
                                pair.insert("value".to_string(), value);
                                Value::Object(pair)
                            })
                            .collect(),
                        scalar => vec![scalar],
                    };
                    let depth = self.locals.len();
                    for item in items {
                        self.locals.truncate(depth);
                        self.locals.push((var.clone(), item));
                        self.run(body, out)?;
                    }
                    self.locals.truncate(depth);
                }
                Node::Set { name, value, line } => {
                    let value = self.eval(value, *line)?;
                    match self.locals.iter_mut().rev().find(|(n, _)| n == name) {
                        Some(slot) => slot.1 = value,
                        None => self.locals.push((name.clone(), value)),
                    }
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str, line: usize) -> ShapeResult<Value> {
        if self.is_private(name) {
            if self.strict {
                return Err(ShapeError::render(format!(
                    "line {line}: variable '{name}' is private"
                )));
            }
            return Ok(Value::Null);
        }
        if let Some((_, value)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        match self.ctx.lookup(name) {
            Some(value) => Ok(value),
            None if self.strict => Err(ShapeError::render(format!(
                "line {line}: undefined variable '{name}'"
            ))),
            None => Ok(Value::Null),
        }
    }

    fn eval(&mut self, expr: &Expr, line: usize) -> ShapeResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name, line),
            Expr::Field(base, field) => {
                let base = self.eval(base, line)?;
                Ok(match base {
                    Value::Object(mut map) => map.remove(field).unwrap_or(Value::Null),
                    Value::Array(mut items) => match field.parse::<usize>() {
                        Ok(idx) if idx < items.len() => items.swap_remove(idx),
                        _ => Value::Null,
                    },
                    _ => Value::Null,
                })
            }
            Expr::Call { name, args } => {
                if self.is_private(name) {
                    return Err(ShapeError::render(format!(
                        "line {line}: function '{name}' is private"
                    )));
                }
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, line))
                    .collect::<ShapeResult<Vec<_>>>()?;
                match self.ctx.call(name, args) {
                    Some(result) => result,
                    None => Err(ShapeError::render(format!(
                        "line {line}: unknown function '{name}'"
                    ))),
                }
            }
            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item, line))
                    .collect::<ShapeResult<Vec<_>>>()?,
            )),
            Expr::Hash(pairs) => {
                let mut map = Record::new();
                for (key, value) in pairs {
                    let value = self.eval(value, line)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&self.eval(inner, line)?))),
            Expr::Neg(inner) => {
                let value = self.eval(inner, line)?;
                let n = numeric(&value, "-", line)?;
                Ok(number(-n))
            }
            Expr::And(lhs, rhs) => {
                if !is_truthy(&self.eval(lhs, line)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&self.eval(rhs, line)?)))
            }
            Expr::Or(lhs, rhs) => {
                if is_truthy(&self.eval(lhs, line)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&self.eval(rhs, line)?)))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, line)?;
                let rhs = self.eval(rhs, line)?;
                binary(*op, &lhs, &rhs, line)
            }
        }
    }
}

fn numeric(value: &Value, op: &str, line: usize) -> ShapeResult<f64> {
    as_number(value).ok_or_else(|| {
        ShapeError::render(format!(
            "line {line}: operator '{op}' needs a number, got '{}'",
            to_text(value)
        ))
    })
}

/// Compare numerically when at least one side is a number and both parse as numbers,
/// textually otherwise.
fn compare(lhs: &Value, rhs: &Value) -> Ordering {
    let either_number = lhs.is_number() || rhs.is_number();
    match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) if either_number => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => to_text(lhs).cmp(&to_text(rhs)),
    }
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value, line: usize) -> ShapeResult<Value> {
    let arith = |sym: &str, f: fn(f64, f64) -> f64| -> ShapeResult<Value> {
        let a = numeric(lhs, sym, line)?;
        let b = numeric(rhs, sym, line)?;
        Ok(number(f(a, b)))
    };

    match op {
        BinOp::Eq => Ok(Value::Bool(compare(lhs, rhs) == Ordering::Equal)),
        BinOp::Ne => Ok(Value::Bool(compare(lhs, rhs) != Ordering::Equal)),
        BinOp::Lt => Ok(Value::Bool(compare(lhs, rhs) == Ordering::Less)),
        BinOp::Le => Ok(Value::Bool(compare(lhs, rhs) != Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(compare(lhs, rhs) == Ordering::Greater)),
        BinOp::Ge => Ok(Value::Bool(compare(lhs, rhs) != Ordering::Less)),
        BinOp::Concat => Ok(Value::String(to_text(lhs) + &to_text(rhs))),
        BinOp::Add => arith("+", |a, b| a + b),
        BinOp::Sub => arith("-", |a, b| a - b),
        BinOp::Mul => arith("*", |a, b| a * b),
        BinOp::Div | BinOp::Rem => {
            let sym = if op == BinOp::Div { "/" } else { "%" };
            let a = numeric(lhs, sym, line)?;
            let b = numeric(rhs, sym, line)?;
            if b == 0.0 {
                return Err(ShapeError::render(format!("line {line}: division by zero")));
            }
            Ok(number(if op == BinOp::Div { a / b } else { a % b }))
        }
    }
}
