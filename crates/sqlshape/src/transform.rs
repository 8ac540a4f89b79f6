//! Value transformation chains.
//!
//! A chain is an ordered list of steps. Each step applies one transform function to
//! the whole row, to one field, or to every field of a named group (`key`, `non_key`,
//! or any group registered with [`TransformChain::define_group`]).

use crate::error::{ShapeError, ShapeResult};
use crate::value::{Record, Value, as_number, is_truthy, number, to_text};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A transform: receives the current value and the step's extra arguments.
pub type TransformFn = Arc<dyn Fn(Value, &[Value]) -> ShapeResult<Value> + Send + Sync>;

/// What a step applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// The whole record, passed as an object. A falsy or empty result drops the row.
    Row,
    /// A single field.
    Field(String),
    /// Every field in a registered group.
    Group(String),
}

/// A transform referenced by registry name or supplied directly.
#[derive(Clone)]
pub enum StepSource {
    Named(String),
    Callable { label: String, func: TransformFn },
}

impl StepSource {
    /// Wrap a closure as an anonymous step.
    pub fn callable<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value, &[Value]) -> ShapeResult<Value> + Send + Sync + 'static,
    {
        StepSource::Callable {
            label: label.into(),
            func: Arc::new(func),
        }
    }
}

impl From<&str> for StepSource {
    fn from(name: &str) -> Self {
        StepSource::Named(name.to_string())
    }
}

impl From<String> for StepSource {
    fn from(name: String) -> Self {
        StepSource::Named(name)
    }
}

#[derive(Clone)]
struct Step {
    label: String,
    func: TransformFn,
    selector: Selector,
    args: Vec<Value>,
}

/// An ordered transformation chain with its registry of named transforms.
#[derive(Clone)]
pub struct TransformChain {
    registry: HashMap<String, TransformFn>,
    groups: HashMap<String, Vec<String>>,
    steps: Vec<Step>,
}

impl fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<_> = self
            .steps
            .iter()
            .map(|s| (s.label.as_str(), &s.selector))
            .collect();
        f.debug_struct("TransformChain")
            .field("steps", &steps)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl Default for TransformChain {
    fn default() -> Self {
        Self::new()
    }
}

fn map_text(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

impl TransformChain {
    /// An empty chain with the built-in transforms registered:
    /// `trim`, `lower`, `upper`, `null_if_empty`, `to_string`, `to_number`, `default`.
    pub fn new() -> Self {
        let mut chain = Self {
            registry: HashMap::new(),
            groups: HashMap::new(),
            steps: Vec::new(),
        };
        chain
            .register("trim", |v, _| Ok(map_text(v, |s| s.trim().to_string())))
            .register("lower", |v, _| Ok(map_text(v, str::to_lowercase)))
            .register("upper", |v, _| Ok(map_text(v, str::to_uppercase)))
            .register("null_if_empty", |v, _| {
                Ok(match v {
                    Value::String(s) if s.is_empty() => Value::Null,
                    other => other,
                })
            })
            .register("to_string", |v, _| {
                Ok(match v {
                    Value::Null => Value::Null,
                    other => Value::String(to_text(&other)),
                })
            })
            .register("to_number", |v, _| match v {
                Value::Null => Ok(Value::Null),
                other => as_number(&other).map(number).ok_or_else(|| {
                    ShapeError::transform(format!("to_number: '{}' is not numeric", to_text(&other)))
                }),
            })
            .register("default", |v, args| {
                Ok(match v {
                    Value::Null => args.first().cloned().unwrap_or(Value::Null),
                    other => other,
                })
            });
        chain
    }

    /// Register (or replace) a named transform.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(Value, &[Value]) -> ShapeResult<Value> + Send + Sync + 'static,
    {
        self.registry.insert(name.into(), Arc::new(func));
        self
    }

    /// Register (or replace) a named field group.
    pub fn define_group<I, S>(&mut self, name: impl Into<String>, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .insert(name.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Fields of a registered group.
    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// Append a step.
    ///
    /// Named transforms must already be registered. Groups are resolved when the chain
    /// runs, so `key` / `non_key` may be registered after steps referencing them.
    pub fn append(
        &mut self,
        source: impl Into<StepSource>,
        selector: Selector,
        args: Vec<Value>,
    ) -> ShapeResult<&mut Self> {
        let (label, func) = match source.into() {
            StepSource::Named(name) => {
                let Some(func) = self.registry.get(&name) else {
                    return Err(ShapeError::configuration(format!(
                        "unknown transform '{name}'"
                    )));
                };
                (name, Arc::clone(func))
            }
            StepSource::Callable { label, func } => (label, func),
        };
        self.steps.push(Step {
            label,
            func,
            selector,
            args,
        });
        Ok(self)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn group_fields(&self, name: &str) -> ShapeResult<&[String]> {
        self.group(name).ok_or_else(|| {
            ShapeError::configuration(format!("transform group '{name}' is not registered"))
        })
    }

    /// Run every step against a record.
    ///
    /// Returns `None` when a row-level step rejects the record.
    pub fn call(&self, mut record: Record) -> ShapeResult<Option<Record>> {
        for step in &self.steps {
            match &step.selector {
                Selector::Row => {
                    match (step.func)(Value::Object(record), &step.args)? {
                        Value::Object(next) if next.is_empty() => return Ok(None),
                        Value::Object(next) => record = next,
                        other if !is_truthy(&other) => return Ok(None),
                        other => {
                            return Err(ShapeError::transform(format!(
                                "row step '{}' returned a non-record value: {other}",
                                step.label
                            )));
                        }
                    }
                }
                Selector::Field(field) => apply_field(step, &mut record, field)?,
                Selector::Group(group) => {
                    for field in self.group_fields(group)? {
                        apply_field(step, &mut record, field)?;
                    }
                }
            }
        }
        Ok(Some(record))
    }

    /// Run the field-scoped steps that cover `field` against a single value.
    pub fn call_field(&self, field: &str, mut value: Value) -> ShapeResult<Value> {
        for step in &self.steps {
            let applies = match &step.selector {
                Selector::Row => false,
                Selector::Field(f) => f == field,
                Selector::Group(group) => self.group_fields(group)?.iter().any(|f| f == field),
            };
            if applies {
                value = (step.func)(value, &step.args)?;
            }
        }
        Ok(value)
    }
}

fn apply_field(step: &Step, record: &mut Record, field: &str) -> ShapeResult<()> {
    if let Some(slot) = record.get_mut(field) {
        let current = std::mem::take(slot);
        *slot = (step.func)(current, &step.args)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn field_steps_run_in_order() {
        let mut chain = TransformChain::new();
        chain
            .append("trim", Selector::Field("name".into()), vec![])
            .unwrap()
            .append("upper", Selector::Field("name".into()), vec![])
            .unwrap();

        let out = chain.call(rec(json!({"name": "  ann ", "id": 1}))).unwrap().unwrap();
        assert_eq!(out["name"], json!("ANN"));
        assert_eq!(out["id"], json!(1));
    }

    #[test]
    fn group_steps_cover_registered_fields() {
        let mut chain = TransformChain::new();
        chain
            .append("null_if_empty", Selector::Group("non_key".into()), vec![])
            .unwrap();
        chain.define_group("non_key", ["a", "b"]);

        let out = chain.call(rec(json!({"id": "", "a": "", "b": "x"}))).unwrap().unwrap();
        assert_eq!(out, rec(json!({"id": "", "a": null, "b": "x"})));
    }

    #[test]
    fn unregistered_group_is_configuration_error() {
        let mut chain = TransformChain::new();
        chain.append("trim", Selector::Group("key".into()), vec![]).unwrap();
        let err = chain.call(rec(json!({"id": 1}))).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn unknown_transform_is_configuration_error() {
        let mut chain = TransformChain::new();
        assert!(chain.append("nope", Selector::Row, vec![]).unwrap_err().is_configuration());
    }

    #[test]
    fn row_step_can_drop_rows() {
        let mut chain = TransformChain::new();
        chain
            .append(
                StepSource::callable("only_active", |row, _| {
                    Ok(if row["active"] == json!(true) { row } else { Value::Null })
                }),
                Selector::Row,
                vec![],
            )
            .unwrap();

        assert!(chain.call(rec(json!({"active": false}))).unwrap().is_none());
        assert!(chain.call(rec(json!({"active": true}))).unwrap().is_some());
    }

    #[test]
    fn row_step_returning_scalar_is_error() {
        let mut chain = TransformChain::new();
        chain
            .append(StepSource::callable("bad", |_, _| Ok(json!(5))), Selector::Row, vec![])
            .unwrap();
        assert!(chain.call(rec(json!({"a": 1}))).is_err());
    }

    #[test]
    fn default_uses_step_arguments() {
        let mut chain = TransformChain::new();
        chain
            .append("default", Selector::Field("x".into()), vec![json!("n/a")])
            .unwrap();
        assert_eq!(chain.call_field("x", Value::Null).unwrap(), json!("n/a"));
        assert_eq!(chain.call_field("y", Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn to_number_rejects_text() {
        let mut chain = TransformChain::new();
        chain.append("to_number", Selector::Field("n".into()), vec![]).unwrap();
        assert_eq!(chain.call_field("n", json!(" 42 ")).unwrap(), json!(42));
        assert!(chain.call_field("n", json!("abc")).is_err());
    }
}
