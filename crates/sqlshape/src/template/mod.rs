//! Template rendering.
//!
//! Queries and preference predicates are written in a small directive language:
//!
//! ```text
//! SELECT id, name, note FROM users
//! WHERE status = [% bind(status) %]
//! [% IF min_age %]  AND age >= [% bind(min_age) %][% END %]
//! [%- key_columns('id'); drop_columns('note') %]
//! ```
//!
//! - Text outside `[% ... %]` is copied verbatim; `[%# ... %]` is a comment.
//! - `[%-` / `-%]` remove adjacent whitespace up to and including one newline.
//! - Statements: `IF` / `ELSIF` / `ELSE` / `END`, `UNLESS`, `FOREACH x IN list`,
//!   `SET x = expr`, or an expression whose value is written to the output.
//!
//! [`TemplateEngine`] is the seam the rest of the crate renders through; [`Engine`]
//! is the built-in implementation.

mod eval;
mod lexer;
mod parser;


pub use parser::Template;

use crate::error::{ShapeError, ShapeResult};
use crate::value::{Record, Value};
use eval::Evaluator;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Parsed templates kept per engine before the cache is reset.
const CACHE_CAPACITY: usize = 512;

/// Variables and functions visible to a template while it renders.
pub trait Context {
    /// Value bound to `name`, if any.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Invoke the function `name`. Returns `None` when no such function exists.
    fn call(&mut self, name: &str, args: Vec<Value>) -> Option<ShapeResult<Value>> {
        let _ = (name, args);
        None
    }
}

impl Context for Record {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Render a template string against a context.
///
/// Implementations raise [`ShapeError::Render`] on syntax errors and, in strict mode,
/// on references to unknown non-private variables. Errors raised by context functions
/// are returned unchanged.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, ctx: &mut dyn Context) -> ShapeResult<String>;
}

/// Configuration for [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Unknown variables are an error instead of rendering as empty.
    pub strict: bool,
    /// Names matching this pattern are never exposed to templates.
    pub private_pattern: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: true,
            private_pattern: Some(r"^[_.]".to_string()),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable strict variable checking.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Override the private-name pattern.
    pub fn private_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.private_pattern = Some(pattern.into());
        self
    }

    /// Expose every name, including `_`-prefixed ones.
    pub fn no_private(mut self) -> Self {
        self.private_pattern = None;
        self
    }
}

/// The built-in template engine.
///
/// Parsed templates are cached by source text, so rendering the same predicate for
/// many candidate records parses it once.
#[derive(Debug)]
pub struct Engine {
    strict: bool,
    private: Option<Regex>,
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            strict: true,
            private: Some(Regex::new(r"^[_.]").expect("invalid built-in private-name regex")),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl Engine {
    /// Engine with the default configuration (strict, `_` / `.` names private).
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with an explicit configuration.
    pub fn with_config(config: EngineConfig) -> ShapeResult<Self> {
        let private = config
            .private_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ShapeError::configuration(format!("invalid private-name pattern: {e}")))?;
        Ok(Self {
            strict: config.strict,
            private,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Whether variables marked private are hidden from templates.
    pub fn is_private(&self, name: &str) -> bool {
        self.private.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Parse `src`, reusing a cached parse when available.
    pub fn compile(&self, src: &str) -> ShapeResult<Arc<Template>> {
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(src).cloned()) {
            return Ok(hit);
        }

        let parsed = Arc::new(parser::parse(src)?);
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= CACHE_CAPACITY {
                cache.clear();
            }
            cache.insert(src.to_string(), Arc::clone(&parsed));
        }
        Ok(parsed)
    }

    /// Evaluate an already parsed template.
    pub fn render_template(&self, template: &Template, ctx: &mut dyn Context) -> ShapeResult<String> {
        let mut out = String::new();
        Evaluator::new(self.strict, self.private.as_ref(), ctx).run(&template.nodes, &mut out)?;
        Ok(out)
    }
}

impl TemplateEngine for Engine {
    fn render(&self, template: &str, ctx: &mut dyn Context) -> ShapeResult<String> {
        let parsed = self.compile(template)?;
        self.render_template(&parsed, ctx)
    }
}
