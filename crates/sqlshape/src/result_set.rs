//! Executing rendered queries and shaping their rows.
//!
//! A [`ResultSet`] is a snapshot of a query's configuration taken when it is created:
//! later changes to the [`QueryTemplate`](crate::QueryTemplate) do not affect it.

use crate::database::{BoundParam, Database, Statement};
use crate::error::{ShapeError, ShapeResult};
use crate::flat::{Slice, assemble};
use crate::resolver::PreferenceResolver;
use crate::template::{Engine, TemplateEngine};
use crate::transform::TransformChain;
use crate::tree::{ResultTree, TreeColumns, build_tree};
use crate::value::{Record, Value};
use std::fmt;
use std::sync::Arc;

/// Default output of [`ResultSet::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Tree,
    Flat(Slice),
}

/// Overrides applied when a result set is created.
///
/// Fields left `None` are taken from the query template.
#[derive(Clone, Default)]
pub struct ResultSetOptions {
    pub database: Option<Arc<dyn Database>>,
    pub key_columns: Option<Vec<String>>,
    pub drop_columns: Option<Vec<String>>,
    pub prefer: Option<Vec<String>>,
    pub transform: Option<TransformChain>,
    /// Defaults to [`Shape::Tree`] when key columns are set, else a hash per row.
    pub shape: Option<Shape>,
    /// Engine for preference rules.
    pub engine: Option<Arc<dyn TemplateEngine>>,
}

impl ResultSetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn drop_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn prefer<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefer = Some(rules.into_iter().map(Into::into).collect());
        self
    }

    pub fn transform(mut self, chain: TransformChain) -> Self {
        self.transform = Some(chain);
        self
    }

    pub fn shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engine = Some(engine);
        self
    }
}

impl fmt::Debug for ResultSetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSetOptions")
            .field("key_columns", &self.key_columns)
            .field("drop_columns", &self.drop_columns)
            .field("prefer", &self.prefer)
            .field("transform", &self.transform)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// A rendered query bound to a database, ready to execute.
pub struct ResultSet {
    sql: String,
    params: Vec<BoundParam>,
    database: Arc<dyn Database>,
    key_columns: Vec<String>,
    drop_columns: Vec<String>,
    resolver: PreferenceResolver,
    chain: Option<TransformChain>,
    shape: Shape,
    statement: Option<Box<dyn Statement>>,
    columns: Option<Vec<String>>,
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("key_columns", &self.key_columns)
            .field("drop_columns", &self.drop_columns)
            .field("resolver", &self.resolver)
            .field("shape", &self.shape)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl ResultSet {
    /// Build a result set from rendered SQL. `options.database` is ignored in favour
    /// of `database`.
    pub fn new(
        sql: impl Into<String>,
        params: Vec<BoundParam>,
        database: Arc<dyn Database>,
        options: ResultSetOptions,
    ) -> Self {
        let key_columns = options.key_columns.unwrap_or_default();
        let shape = options.shape.unwrap_or(if key_columns.is_empty() {
            Shape::Flat(Slice::Hash)
        } else {
            Shape::Tree
        });
        let engine = options
            .engine
            .unwrap_or_else(|| Arc::new(Engine::new()) as Arc<dyn TemplateEngine>);

        Self {
            sql: sql.into(),
            params,
            database,
            key_columns,
            drop_columns: options.drop_columns.unwrap_or_default(),
            resolver: PreferenceResolver::new(engine, options.prefer.unwrap_or_default()),
            chain: options.transform,
            shape,
            statement: None,
            columns: None,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn drop_columns(&self) -> &[String] {
        &self.drop_columns
    }

    pub fn preferences(&self) -> &[String] {
        self.resolver.rules()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Prepare and execute the statement.
    ///
    /// Registers the `key` and `non_key` transform groups from the reported columns.
    pub fn execute(&mut self) -> ShapeResult<()> {
        tracing::debug!(
            target: "sqlshape.sql",
            sql = %self.sql,
            params = self.params.len(),
            "executing query"
        );
        let mut statement = self.database.prepare(&self.sql)?;
        statement.execute(&self.params)?;
        let columns = statement
            .column_names()
            .map(<[String]>::to_vec)
            .ok_or_else(|| ShapeError::driver("statement reported no column names after execute"))?;

        let non_key = non_key_columns(&columns, &self.key_columns, &self.drop_columns);
        if let Some(chain) = self.chain.as_mut() {
            chain
                .define_group("key", self.key_columns.iter().cloned())
                .define_group("non_key", non_key);
        }

        self.columns = Some(columns);
        self.statement = Some(statement);
        Ok(())
    }

    /// Column names reported by the last execution.
    pub fn columns(&self) -> ShapeResult<&[String]> {
        self.columns.as_deref().ok_or_else(|| {
            ShapeError::usage("column names are unknown until the result set has executed")
        })
    }

    /// Columns that are neither key nor dropped.
    pub fn non_key_columns(&self) -> ShapeResult<Vec<String>> {
        Ok(non_key_columns(
            self.columns()?,
            &self.key_columns,
            &self.drop_columns,
        ))
    }

    /// Raw rows of the pending execution, executing first if needed.
    pub fn rows(&mut self) -> ShapeResult<Rows> {
        let statement = self.take_statement()?;
        Ok(Rows {
            statement,
            done: false,
        })
    }

    fn take_statement(&mut self) -> ShapeResult<Box<dyn Statement>> {
        if self.statement.is_none() {
            self.execute()?;
        }
        self.statement
            .take()
            .ok_or_else(|| ShapeError::usage("result set has no executed statement"))
    }

    /// Execute (if needed) and build the keyed tree.
    pub fn fetch_tree(&mut self) -> ShapeResult<ResultTree> {
        let rows = self.rows()?;
        let non_key = self.non_key_columns()?;
        build_tree(
            rows,
            TreeColumns {
                key: &self.key_columns,
                drop: &self.drop_columns,
                non_key: &non_key,
            },
            self.chain.as_ref(),
            Some(&self.resolver),
        )
    }

    /// Execute (if needed) and assemble a flat list.
    pub fn fetch_flat(&mut self, slice: &Slice) -> ShapeResult<Vec<Value>> {
        let rows = self.rows()?;
        assemble(
            rows,
            slice,
            self.columns.as_deref(),
            &self.drop_columns,
            self.chain.as_ref(),
        )
    }

    /// Fetch in the default shape: the nested tree, or an array of flat rows.
    pub fn fetch(&mut self) -> ShapeResult<Value> {
        match self.shape.clone() {
            Shape::Tree => Ok(self.fetch_tree()?.to_nested()),
            Shape::Flat(slice) => Ok(Value::Array(self.fetch_flat(&slice)?)),
        }
    }
}

fn non_key_columns(columns: &[String], key: &[String], drop: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| !key.contains(c) && !drop.contains(c))
        .cloned()
        .collect()
}

/// Rows streamed from an executed statement. Stops after the first error.
pub struct Rows {
    statement: Box<dyn Statement>,
    done: bool,
}

impl Iterator for Rows {
    type Item = ShapeResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.statement.fetch_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::transform::Selector;
    use serde_json::json;

    fn database() -> Arc<MemoryDatabase> {
        Arc::new(MemoryDatabase::new(
            ["id", "value", "note"],
            vec![
                vec![json!(1), json!("a"), json!("first")],
                vec![json!(2), json!("b"), json!("second")],
                vec![json!(1), json!("c"), json!("third")],
            ],
        ))
    }

    fn result_set(options: ResultSetOptions) -> ResultSet {
        ResultSet::new("SELECT id, value, note FROM t", Vec::new(), database(), options)
    }

    #[test]
    fn columns_before_execute_is_usage_error() {
        let rs = result_set(ResultSetOptions::new());
        assert!(rs.columns().unwrap_err().is_usage());
    }

    #[test]
    fn execute_reports_columns() {
        let mut rs = result_set(ResultSetOptions::new().key_columns(["id"]).drop_columns(["note"]));
        rs.execute().unwrap();
        assert_eq!(rs.columns().unwrap(), ["id", "value", "note"]);
        assert_eq!(rs.non_key_columns().unwrap(), ["value"]);
    }

    #[test]
    fn default_shape_follows_key_columns() {
        assert_eq!(result_set(ResultSetOptions::new()).shape(), &Shape::Flat(Slice::Hash));
        assert_eq!(
            result_set(ResultSetOptions::new().key_columns(["id"])).shape(),
            &Shape::Tree
        );
    }

    #[test]
    fn fetch_tree_uses_preferences() {
        let mut rs = result_set(
            ResultSetOptions::new()
                .key_columns(["id"])
                .drop_columns(["note"])
                .prefer(["note == 'first'"]),
        );
        let tree = rs.fetch_tree().unwrap();
        assert_eq!(
            tree.to_nested(),
            json!({"1": {"id": 1, "value": "a"}, "2": {"id": 2, "value": "b"}})
        );
    }

    #[test]
    fn fetch_tree_without_key_columns_is_usage_error() {
        let mut rs = result_set(ResultSetOptions::new());
        assert!(rs.fetch_tree().unwrap_err().is_usage());
    }

    #[test]
    fn transform_groups_are_registered_on_execute() {
        let mut chain = TransformChain::new();
        chain
            .append("upper", Selector::Group("non_key".into()), vec![])
            .unwrap();
        let mut rs = result_set(
            ResultSetOptions::new()
                .drop_columns(["note"])
                .transform(chain)
                .shape(Shape::Flat(Slice::Array)),
        );
        assert_eq!(rs.fetch().unwrap(), json!([[1, "A"], [2, "B"], [1, "C"]]));
    }

    #[test]
    fn each_fetch_reexecutes() {
        let db = database();
        let mut rs = ResultSet::new(
            "SELECT 1",
            Vec::new(),
            db.clone(),
            ResultSetOptions::new(),
        );
        assert_eq!(rs.fetch_flat(&Slice::Hash).unwrap().len(), 3);
        assert_eq!(rs.fetch_flat(&Slice::Hash).unwrap().len(), 3);
        assert_eq!(db.executed().len(), 2);
    }

    #[test]
    fn driver_errors_propagate() {
        let mut rs = ResultSet::new(
            "SELECT 1",
            Vec::new(),
            Arc::new(MemoryDatabase::failing("syntax error at or near \"SELEC\"")),
            ResultSetOptions::new(),
        );
        let err = rs.fetch().unwrap_err();
        assert!(err.is_driver());
    }

    #[test]
    fn row_iterator_streams_in_fetch_order() {
        let mut rs = result_set(ResultSetOptions::new());
        let values: Vec<Value> = rs
            .rows()
            .unwrap()
            .map(|row| row.unwrap()["value"].clone())
            .collect();
        assert_eq!(values, vec![json!("a"), json!("b"), json!("c")]);
    }
}
