//! Configuration state reachable from templates.

use super::TemplateFn;
use crate::database::{BoundParam, Placeholder};
use crate::error::{ShapeError, ShapeResult};
use crate::template::Context;
use crate::transform::{Selector, StepSource, TransformChain};
use crate::value::{Record, Value, flatten_names};
use std::collections::HashMap;

/// Mutable query configuration shared by the Rust API and template directives.
#[derive(Debug, Clone)]
pub(super) struct Directives {
    pub(super) key_columns: Vec<String>,
    pub(super) drop_columns: Vec<String>,
    pub(super) order: Option<Vec<String>>,
    pub(super) prefer: Vec<String>,
    pub(super) chain: Option<TransformChain>,
    pub(super) params: Vec<BoundParam>,
    pub(super) counter: u64,
}

impl Directives {
    pub(super) fn bind_auto(&mut self, value: Value, attrs: Option<Value>) -> Placeholder {
        self.counter += 1;
        self.bind_at(Placeholder::Index(self.counter), value, attrs)
    }

    pub(super) fn bind_at(
        &mut self,
        placeholder: Placeholder,
        value: Value,
        attrs: Option<Value>,
    ) -> Placeholder {
        self.params.push(BoundParam {
            placeholder: placeholder.clone(),
            value,
            attrs,
        });
        placeholder
    }

    pub(super) fn transform(
        &mut self,
        source: StepSource,
        selector: Selector,
        args: Vec<Value>,
    ) -> ShapeResult<()> {
        let Some(chain) = self.chain.as_mut() else {
            return Err(ShapeError::configuration(
                "transform() requires a transformation chain; none was configured",
            ));
        };
        chain.append(source, selector, args)?;
        Ok(())
    }
}

/// What a template sees while a [`super::QueryTemplate`] renders.
pub(super) struct DirectiveContext<'a> {
    pub(super) directives: &'a mut Directives,
    pub(super) vars: &'a Record,
    pub(super) extra: &'a Record,
    pub(super) functions: &'a HashMap<String, TemplateFn>,
}

/// Function names that always resolve to directives.
const DIRECTIVES: [&str; 6] = [
    "bind",
    "key_columns",
    "drop_columns",
    "order",
    "prefer",
    "transform",
];

fn names(list: &[String]) -> Value {
    Value::Array(list.iter().cloned().map(Value::String).collect())
}

/// Parse the selector part of a `transform(...)` directive.
///
/// `transform(name)` targets the row, `transform(name, 'field', args...)` one field,
/// and `transform(name, {field => .., group => .., args => [..]})` is the long form.
fn step_target(mut args: Vec<Value>) -> ShapeResult<(Selector, Vec<Value>)> {
    if args.is_empty() {
        return Ok((Selector::Row, Vec::new()));
    }
    match args.remove(0) {
        Value::String(field) => Ok((Selector::Field(field), args)),
        Value::Object(options) => {
            let selector = match (options.get("field"), options.get("group")) {
                (Some(_), Some(_)) => {
                    return Err(ShapeError::render(
                        "transform() takes either 'field' or 'group', not both",
                    ));
                }
                (Some(field), None) => Selector::Field(crate::value::to_text(field)),
                (None, Some(group)) => Selector::Group(crate::value::to_text(group)),
                (None, None) => Selector::Row,
            };
            let step_args = match options.get("args") {
                Some(Value::Array(list)) => list.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(single) => vec![single.clone()],
            };
            Ok((selector, step_args))
        }
        other => Err(ShapeError::render(format!(
            "transform() target must be a field name or an options hash, got {other}"
        ))),
    }
}

impl DirectiveContext<'_> {
    fn bind(&mut self, args: Vec<Value>) -> ShapeResult<Value> {
        let mut args = args.into_iter();
        let placeholder = match (args.next(), args.next(), args.next(), args.next()) {
            (Some(value), None, None, None) => self.directives.bind_auto(value, None),
            (Some(value), Some(attrs), None, None) => self.directives.bind_auto(value, Some(attrs)),
            (Some(placeholder), Some(value), Some(attrs), None) => self.directives.bind_at(
                Placeholder::from_value(&placeholder),
                value,
                Some(attrs),
            ),
            _ => return Err(ShapeError::render("bind() takes 1 to 3 arguments")),
        };
        Ok(Value::String(placeholder.sql_text()))
    }

    fn transform(&mut self, args: Vec<Value>) -> ShapeResult<Value> {
        let mut args = args.into_iter();
        let name = match args.next() {
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(ShapeError::render(format!(
                    "transform() name must be a string, got {other}"
                )));
            }
            None => return Err(ShapeError::render("transform() requires a transform name")),
        };
        let (selector, step_args) = step_target(args.collect())?;
        self.directives
            .transform(StepSource::Named(name), selector, step_args)?;
        Ok(Value::Null)
    }

    fn directive(&mut self, name: &str, args: Vec<Value>) -> Option<ShapeResult<Value>> {
        match name {
            "bind" => return Some(self.bind(args)),
            "transform" => return Some(self.transform(args)),
            _ => {}
        }
        let d = &mut *self.directives;
        let result = match name {
            "key_columns" if args.is_empty() => Ok(names(&d.key_columns)),
            "key_columns" => {
                d.key_columns = flatten_names(&args);
                Ok(Value::Null)
            }
            "drop_columns" if args.is_empty() => Ok(names(&d.drop_columns)),
            "drop_columns" => {
                d.drop_columns = flatten_names(&args);
                Ok(Value::Null)
            }
            // The SQL is still being produced, so only an explicit order is known here.
            "order" if args.is_empty() => Ok(names(d.order.as_deref().unwrap_or_default())),
            "order" => {
                d.order = Some(flatten_names(&args));
                Ok(Value::Null)
            }
            "prefer" => {
                d.prefer.extend(flatten_names(&args));
                Ok(Value::Null)
            }
            _ => return None,
        };
        Some(result)
    }
}

impl Context for DirectiveContext<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.extra
            .get(name)
            .or_else(|| self.vars.get(name))
            .cloned()
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Option<ShapeResult<Value>> {
        if DIRECTIVES.contains(&name) {
            return self.directive(name, args);
        }
        self.functions.get(name).map(|func| func(&args))
    }
}
