//! Query templates.
//!
//! A [`QueryTemplate`] holds the raw SQL template together with the configuration that
//! shapes its results. The template can change that configuration while it renders,
//! through a fixed set of directives:
//!
//! | directive | effect |
//! |-----------|--------|
//! | `bind(value[, attrs])` | record a parameter at the next position, output `?` |
//! | `bind(placeholder, value, attrs)` | record a parameter at an explicit placeholder |
//! | `key_columns(...)` / `drop_columns(...)` / `order(...)` | replace (or read) the list |
//! | `prefer(rule, ...)` | append preference rules |
//! | `transform(name[, field \| {group => .., args => [..]}])` | append a transform step |
//!
//! Rendering happens once. Later calls return the cached SQL so directives never
//! fire twice.
//!
//! # Example
//!
//! ```ignore
//! use sqlshape::QueryTemplate;
//!
//! let mut q = QueryTemplate::builder()
//!     .sql("SELECT id, value, note FROM t WHERE kind = [% bind(kind) %]\
//!           [% key_columns('id'); drop_columns('note') %]")
//!     .var("kind", "a")
//!     .build()?;
//!
//! assert_eq!(q.render()?, "SELECT id, value, note FROM t WHERE kind = ?");
//! assert_eq!(q.key_columns(), ["id"]);
//! ```

mod directives;


use crate::database::{BoundParam, Database, Placeholder};
use crate::error::{ShapeError, ShapeResult};
use crate::order::{OrderSuffix, extract_order_columns};
use crate::result_set::{ResultSet, ResultSetOptions};
use crate::template::{Engine, TemplateEngine};
use crate::transform::{Selector, StepSource, TransformChain};
use crate::value::{Record, Value};
use directives::{DirectiveContext, Directives};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// A function callable from templates.
pub type TemplateFn = Arc<dyn Fn(&[Value]) -> ShapeResult<Value> + Send + Sync>;

fn blank_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("invalid built-in blank-line regex"))
}

/// Collapse runs of blank or whitespace-only lines into a single blank line.
pub fn squeeze_blank_lines(sql: &str) -> String {
    blank_run_regex().replace_all(sql, "\n\n").into_owned()
}

/// Builder for [`QueryTemplate`].
#[derive(Default)]
pub struct QueryTemplateBuilder {
    sql: Option<String>,
    file: Option<PathBuf>,
    prefix: String,
    suffix: String,
    key_columns: Vec<String>,
    drop_columns: Vec<String>,
    order: Option<Vec<String>>,
    prefer: Vec<String>,
    transform: Option<TransformChain>,
    vars: Record,
    functions: HashMap<String, TemplateFn>,
    engine: Option<Arc<dyn TemplateEngine>>,
    database: Option<Arc<dyn Database>>,
    squeeze_blank_lines: bool,
    order_suffix: Option<OrderSuffix>,
}

impl QueryTemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inline template text.
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Read the template text from a file when the template is built.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Text spliced before the template.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Text spliced after the template.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn drop_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Explicit sort-order columns. An empty list disables extraction from the SQL.
    pub fn order<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Append a preference rule.
    pub fn prefer(mut self, rule: impl Into<String>) -> Self {
        self.prefer.push(rule.into());
        self
    }

    /// Transformation chain used by `transform` directives and result shaping.
    pub fn transform(mut self, chain: TransformChain) -> Self {
        self.transform = Some(chain);
        self
    }

    /// Variable visible to the template.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Function callable from the template. Directive names cannot be overridden.
    pub fn function<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> ShapeResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(func));
        self
    }

    /// Template engine used for rendering and preference rules (default: [`Engine`]).
    pub fn engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Database handed to result sets.
    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    /// Collapse blank-line runs in the rendered SQL.
    pub fn squeeze_blank_lines(mut self, enabled: bool) -> Self {
        self.squeeze_blank_lines = enabled;
        self
    }

    /// Trailing clause tolerated after `ORDER BY` when extracting sort columns.
    pub fn order_suffix(mut self, suffix: impl Into<OrderSuffix>) -> Self {
        self.order_suffix = Some(suffix.into());
        self
    }

    pub fn build(mut self) -> ShapeResult<QueryTemplate> {
        let raw = match (self.sql.take(), self.file.take()) {
            (Some(_), Some(_)) => {
                return Err(ShapeError::configuration(
                    "query template takes either inline SQL or a file, not both",
                ));
            }
            (None, None) => {
                return Err(ShapeError::configuration(
                    "query template requires inline SQL or a file",
                ));
            }
            (Some(sql), None) => sql,
            (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
                ShapeError::configuration(format!(
                    "failed to read query template {}: {e}",
                    path.display()
                ))
            })?,
        };
        Ok(QueryTemplate::assemble(raw, self))
    }
}

/// A SQL template plus the configuration that shapes its results.
pub struct QueryTemplate {
    raw: String,
    prefix: String,
    suffix: String,
    vars: Record,
    functions: HashMap<String, TemplateFn>,
    engine: Arc<dyn TemplateEngine>,
    database: Option<Arc<dyn Database>>,
    squeeze_blank_lines: bool,
    order_suffix: Option<OrderSuffix>,
    directives: Directives,
    rendered: Option<String>,
}

impl fmt::Debug for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTemplate")
            .field("raw", &self.raw)
            .field("key_columns", &self.directives.key_columns)
            .field("drop_columns", &self.directives.drop_columns)
            .field("prefer", &self.directives.prefer)
            .field("params", &self.directives.params)
            .field("rendered", &self.rendered)
            .finish_non_exhaustive()
    }
}

impl QueryTemplate {
    pub fn builder() -> QueryTemplateBuilder {
        QueryTemplateBuilder::new()
    }

    /// Template with inline SQL and default settings.
    pub fn new(sql: impl Into<String>) -> Self {
        Self::assemble(sql.into(), QueryTemplateBuilder::new())
    }

    fn assemble(raw: String, builder: QueryTemplateBuilder) -> Self {
        Self {
            raw,
            prefix: builder.prefix,
            suffix: builder.suffix,
            vars: builder.vars,
            functions: builder.functions,
            engine: builder.engine.unwrap_or_else(|| Arc::new(Engine::new())),
            database: builder.database,
            squeeze_blank_lines: builder.squeeze_blank_lines,
            order_suffix: builder.order_suffix,
            directives: Directives {
                key_columns: builder.key_columns,
                drop_columns: builder.drop_columns,
                order: builder.order,
                prefer: builder.prefer,
                chain: builder.transform,
                params: Vec::new(),
                counter: 0,
            },
            rendered: None,
        }
    }

    /// The template text as given, without prefix or suffix.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The rendered SQL, if [`render`](Self::render) has run.
    pub fn sql(&self) -> Option<&str> {
        self.rendered.as_deref()
    }

    pub fn engine(&self) -> &Arc<dyn TemplateEngine> {
        &self.engine
    }

    pub fn database(&self) -> Option<&Arc<dyn Database>> {
        self.database.as_ref()
    }

    /// Record a parameter at the next automatic position. Returns `?`.
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.directives.bind_auto(value.into(), None).sql_text()
    }

    /// [`bind`](Self::bind) with a driver attribute hint.
    pub fn bind_with(&mut self, value: impl Into<Value>, attrs: impl Into<Value>) -> String {
        self.directives
            .bind_auto(value.into(), Some(attrs.into()))
            .sql_text()
    }

    /// Record a parameter at an explicit placeholder without advancing the counter.
    ///
    /// Returns `?` for positions and the placeholder name otherwise.
    pub fn bind_at(
        &mut self,
        placeholder: impl Into<Placeholder>,
        value: impl Into<Value>,
        attrs: impl Into<Value>,
    ) -> String {
        self.directives
            .bind_at(placeholder.into(), value.into(), Some(attrs.into()))
            .sql_text()
    }

    /// Bound parameters in the order they were recorded.
    pub fn params(&self) -> &[BoundParam] {
        &self.directives.params
    }

    pub fn key_columns(&self) -> &[String] {
        &self.directives.key_columns
    }

    pub fn set_key_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directives.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn drop_columns(&self) -> &[String] {
        &self.directives.drop_columns
    }

    pub fn set_drop_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directives.drop_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sort-order columns.
    ///
    /// Unless set explicitly, the SQL is rendered and the columns are taken from its
    /// trailing `ORDER BY` clause. The result is cached.
    pub fn order(&mut self) -> ShapeResult<Vec<String>> {
        if self.directives.order.is_none() {
            self.render()?;
        }
        // Rendering may have run an `order(...)` directive.
        if let Some(order) = &self.directives.order {
            return Ok(order.clone());
        }
        let sql = self.rendered.as_deref().unwrap_or_default();
        let extracted = extract_order_columns(sql, self.order_suffix.as_ref());
        self.directives.order = Some(extracted.clone());
        Ok(extracted)
    }

    pub fn set_order<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directives.order = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Append a preference rule.
    pub fn prefer(&mut self, rule: impl Into<String>) -> &mut Self {
        self.directives.prefer.push(rule.into());
        self
    }

    /// Preference rules in declaration order.
    pub fn preferences(&self) -> &[String] {
        &self.directives.prefer
    }

    pub fn transform_chain(&self) -> Option<&TransformChain> {
        self.directives.chain.as_ref()
    }

    /// Append a step to the transformation chain.
    pub fn transform(
        &mut self,
        source: impl Into<StepSource>,
        selector: Selector,
        args: Vec<Value>,
    ) -> ShapeResult<&mut Self> {
        self.directives.transform(source.into(), selector, args)?;
        Ok(self)
    }

    /// Render the SQL. See [`render_with`](Self::render_with).
    pub fn render(&mut self) -> ShapeResult<&str> {
        self.render_with(&Record::new())
    }

    /// Render prefix, template and suffix with extra variables layered over the
    /// stored ones.
    ///
    /// Only the first successful call renders; later calls return the cached SQL and
    /// ignore `extra`.
    pub fn render_with(&mut self, extra: &Record) -> ShapeResult<&str> {
        if self.rendered.is_none() {
            let sql = self.render_fresh(extra)?;
            self.rendered = Some(sql);
        }
        Ok(self.rendered.as_deref().unwrap_or_default())
    }

    /// A failed render leaves the directives as they were before it started, so a
    /// retry does not repeat binds or other side effects.
    fn render_fresh(&mut self, extra: &Record) -> ShapeResult<String> {
        let source = format!("{}{}{}", self.prefix, self.raw, self.suffix);
        let mut scratch = self.directives.clone();
        let mut ctx = DirectiveContext {
            directives: &mut scratch,
            vars: &self.vars,
            extra,
            functions: &self.functions,
        };
        let mut sql = self.engine.render(&source, &mut ctx)?;
        self.directives = scratch;
        if self.squeeze_blank_lines {
            sql = squeeze_blank_lines(&sql);
        }

        tracing::debug!(
            target: "sqlshape.sql",
            sql = %sql,
            params = self.directives.params.len(),
            "rendered query template"
        );
        Ok(sql)
    }

    /// Render, then snapshot the configuration into a result set.
    pub fn result_set(&mut self) -> ShapeResult<ResultSet> {
        self.result_set_with(ResultSetOptions::default())
    }

    /// Like [`result_set`](Self::result_set); fields set in `options` take precedence.
    pub fn result_set_with(&mut self, options: ResultSetOptions) -> ShapeResult<ResultSet> {
        let sql = self.render()?.to_string();
        let database = options
            .database
            .or_else(|| self.database.clone())
            .ok_or_else(|| {
                ShapeError::configuration("result set requires a database; none was configured")
            })?;

        Ok(ResultSet::new(
            sql,
            self.directives.params.clone(),
            database,
            ResultSetOptions {
                database: None,
                key_columns: options
                    .key_columns
                    .or_else(|| Some(self.directives.key_columns.clone())),
                drop_columns: options
                    .drop_columns
                    .or_else(|| Some(self.directives.drop_columns.clone())),
                prefer: options
                    .prefer
                    .or_else(|| Some(self.directives.prefer.clone())),
                transform: options.transform.or_else(|| self.directives.chain.clone()),
                shape: options.shape,
                engine: options.engine.or_else(|| Some(Arc::clone(&self.engine))),
            },
        ))
    }
}
