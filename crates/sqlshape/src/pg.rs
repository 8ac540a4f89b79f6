//! Postgres collaborator built on `tokio-postgres`.
//!
//! The [`Database`] traits are synchronous, so each [`PgDatabase`] owns a
//! current-thread tokio runtime and blocks on it for every driver call. The
//! connection task makes progress whenever one of those calls is running.
//!
//! Rendered SQL carries `?` at each bind site; [`PgDatabase::prepare`] numbers them
//! `$1..$n` in order before the text reaches the server. A `?` inside a string
//! literal, a quoted identifier, a comment or a dollar-quoted body is left alone.
//!
//! ```ignore
//! use sqlshape::{PgDatabase, QueryTemplate};
//! use std::sync::Arc;
//!
//! let db = Arc::new(PgDatabase::connect("postgres://localhost/app")?);
//! let mut q = QueryTemplate::builder()
//!     .sql("SELECT id, name FROM users WHERE id > $1[% key_columns('id') %]")
//!     .database(db)
//!     .build()?;
//! q.bind(10);
//! let tree = q.result_set()?.fetch_tree()?;
//! ```

use crate::database::{BoundParam, Database, Placeholder, Statement, positional_values};
use crate::error::{ShapeError, ShapeResult};
use crate::value::{Record, Value, as_number, is_truthy, to_text};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Column, NoTls, Row};

struct Inner {
    client: Client,
    runtime: Runtime,
}

/// A Postgres connection usable through the synchronous [`Database`] trait.
#[derive(Clone)]
pub struct PgDatabase {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PgDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDatabase").finish_non_exhaustive()
    }
}

impl PgDatabase {
    /// Connect without TLS.
    pub fn connect(url: &str) -> ShapeResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ShapeError::driver(format!("failed to start runtime: {e}")))?;

        let (client, connection) = runtime.block_on(tokio_postgres::connect(url, NoTls))?;
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(target: "sqlshape.pg", error = %e, "postgres connection closed with error");
            }
        });
        tracing::debug!(target: "sqlshape.pg", "connected");

        Ok(Self {
            inner: Arc::new(Inner { client, runtime }),
        })
    }
}

impl Database for PgDatabase {
    fn prepare(&self, sql: &str) -> ShapeResult<Box<dyn Statement>> {
        let sql = number_placeholders(sql);
        let statement = self
            .inner
            .runtime
            .block_on(self.inner.client.prepare(&sql))?;
        tracing::debug!(
            target: "sqlshape.pg",
            params = statement.params().len(),
            columns = statement.columns().len(),
            "prepared statement"
        );
        Ok(Box::new(PgStatement {
            inner: Arc::clone(&self.inner),
            statement,
            columns: None,
            rows: VecDeque::new(),
        }))
    }
}

struct PgStatement {
    inner: Arc<Inner>,
    statement: tokio_postgres::Statement,
    columns: Option<Vec<String>>,
    rows: VecDeque<Row>,
}

/// Rewrite each `?` bind site to `$1`, `$2`, ... in order of appearance.
fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut count = 0;
    let mut rest = sql;

    while let Some(c) = rest.chars().next() {
        let skip = match c {
            '?' => {
                count += 1;
                out.push_str(&format!("${count}"));
                rest = &rest[1..];
                continue;
            }
            '\'' | '"' => quoted_len(rest, c),
            '-' if rest.starts_with("--") => rest.find('\n').unwrap_or(rest.len()),
            '/' if rest.starts_with("/*") => rest[2..].find("*/").map_or(rest.len(), |end| end + 4),
            '$' => dollar_quoted_len(rest).unwrap_or(1),
            _ => c.len_utf8(),
        };
        out.push_str(&rest[..skip]);
        rest = &rest[skip..];
    }
    out
}

/// Length of a `'...'` or `"..."` token at the start of `s`; a doubled quote is an
/// escaped quote.
fn quoted_len(s: &str, quote: char) -> usize {
    let mut chars = s.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            if chars.peek().is_some_and(|(_, next)| *next == quote) {
                chars.next();
            } else {
                return i + 1;
            }
        }
    }
    s.len()
}

/// Length of a `$tag$...$tag$` body at the start of `s`, or `None` when the `$`
/// does not open one (for example `$1`).
fn dollar_quoted_len(s: &str) -> Option<usize> {
    let body = &s[1..];
    if body.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let tag_len = body
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|end| body[*end..].starts_with('$'))?;
    let delim = &s[..tag_len + 2];
    Some(
        s[delim.len()..]
            .find(delim)
            .map_or(s.len(), |close| delim.len() * 2 + close),
    )
}

/// `$N` names address positions; everything else is unsupported by Postgres.
fn normalize(params: &[BoundParam]) -> ShapeResult<Vec<BoundParam>> {
    params
        .iter()
        .map(|param| match &param.placeholder {
            Placeholder::Index(_) => Ok(param.clone()),
            Placeholder::Named(name) => {
                let idx = name
                    .strip_prefix('$')
                    .and_then(|n| n.parse::<u64>().ok())
                    .ok_or_else(|| {
                        ShapeError::driver(format!(
                            "postgres does not support named placeholder '{name}'"
                        ))
                    })?;
                Ok(BoundParam::new(idx, param.value.clone(), param.attrs.clone()))
            }
        })
        .collect()
}

fn mismatch(position: usize, ty: &Type, value: &Value) -> ShapeError {
    ShapeError::driver(format!(
        "parameter ${position} of type {ty} cannot take value {value}"
    ))
}

/// An integer parameter value. Fractions and values outside the column's range are
/// rejected instead of being truncated.
fn integral<T: TryFrom<i64>>(position: usize, ty: &Type, value: &Value) -> ShapeResult<T> {
    let fail = || mismatch(position, ty, value);
    let n = match value.as_i64() {
        Some(n) => n,
        None => {
            let f = as_number(value).ok_or_else(fail)?;
            let bound = -(i64::MIN as f64);
            if f.fract() != 0.0 || !(-bound..bound).contains(&f) {
                return Err(fail());
            }
            f as i64
        }
    };
    T::try_from(n).map_err(|_| fail())
}

/// Box a typed parameter; `null` becomes a typed `NULL` so the driver's type check
/// still passes.
fn typed<T>(null: bool, convert: impl FnOnce() -> ShapeResult<T>) -> ShapeResult<Box<dyn ToSql + Sync + Send>>
where
    T: ToSql + Sync + Send + 'static,
{
    if null {
        Ok(Box::new(Option::<T>::None))
    } else {
        Ok(Box::new(Some(convert()?)))
    }
}

/// Convert a bound value to the type Postgres expects for its parameter.
fn to_sql(position: usize, ty: &Type, value: &Value) -> ShapeResult<Box<dyn ToSql + Sync + Send>> {
    let null = value.is_null();
    let number = || as_number(value).ok_or_else(|| mismatch(position, ty, value));
    let text = || to_text(value);

    match *ty {
        Type::BOOL => typed(null, || Ok(is_truthy(value))),
        Type::INT2 => typed(null, || integral::<i16>(position, ty, value)),
        Type::INT4 => typed(null, || integral::<i32>(position, ty, value)),
        Type::INT8 => typed(null, || integral::<i64>(position, ty, value)),
        Type::FLOAT4 => typed(null, || Ok(number()? as f32)),
        Type::FLOAT8 => typed(null, number),
        Type::JSON | Type::JSONB => typed(null, || Ok(value.clone())),
        Type::UUID => typed(null, || {
            uuid::Uuid::parse_str(&text()).map_err(|_| mismatch(position, ty, value))
        }),
        Type::TIMESTAMPTZ => typed(null, || {
            DateTime::parse_from_rfc3339(&text())
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| mismatch(position, ty, value))
        }),
        Type::TIMESTAMP => typed(null, || {
            let text = text();
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f"))
                .map_err(|_| mismatch(position, ty, value))
        }),
        Type::DATE => typed(null, || {
            NaiveDate::parse_from_str(&text(), "%Y-%m-%d").map_err(|_| mismatch(position, ty, value))
        }),
        _ => typed(null, || Ok(text())),
    }
}

fn decode(row: &Row, idx: usize, column: &Column) -> ShapeResult<Value> {
    let name = column.name();
    let fail = |e: tokio_postgres::Error| ShapeError::decode(name, e.to_string());

    let value = match *column.type_() {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map_err(fail)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx).map_err(fail)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map_err(fail)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map_err(fail)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(fail)?
            .map(|f| Value::from(f64::from(f))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(fail)?.map(Value::from),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx).map_err(fail)?,
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map_err(fail)?
            .map(|id| Value::String(id.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(fail)?
            .map(|ts| Value::String(ts.to_rfc3339())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(fail)?
            .map(|ts| Value::String(ts.to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map_err(fail)?
            .map(|d| Value::String(d.to_string())),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(|_| {
                ShapeError::decode(name, format!("unsupported column type {}", column.type_()))
            })?
            .map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

impl Statement for PgStatement {
    fn execute(&mut self, params: &[BoundParam]) -> ShapeResult<()> {
        let types = self.statement.params();
        let values = positional_values(&normalize(params)?, types.len())?;

        let boxed = types
            .iter()
            .zip(&values)
            .enumerate()
            .map(|(i, (ty, value))| to_sql(i + 1, ty, value))
            .collect::<ShapeResult<Vec<_>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .inner
            .runtime
            .block_on(self.inner.client.query(&self.statement, &refs))?;
        tracing::debug!(target: "sqlshape.pg", rows = rows.len(), "executed statement");

        self.columns = Some(
            self.statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        );
        self.rows = rows.into();
        Ok(())
    }

    fn column_names(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn fetch_row(&mut self) -> ShapeResult<Option<Record>> {
        if self.columns.is_none() {
            return Err(ShapeError::usage("fetch_row called before execute"));
        }
        let Some(row) = self.rows.pop_front() else {
            return Ok(None);
        };
        let mut record = Record::new();
        for (idx, column) in row.columns().iter().enumerate() {
            record.insert(column.name().to_string(), decode(&row, idx, column)?);
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dollar_names_map_to_positions() {
        let params = vec![
            BoundParam::new("$2", json!("b"), None),
            BoundParam::new(1u64, json!("a"), None),
        ];
        let values = positional_values(&normalize(&params).unwrap(), 2).unwrap();
        assert_eq!(values, vec![json!("a"), json!("b")]);

        let past_end = vec![BoundParam::new("$3", json!("c"), None)];
        let err = positional_values(&normalize(&past_end).unwrap(), 2).unwrap_err();
        assert!(err.is_driver());
    }

    #[test]
    fn question_marks_become_numbered_placeholders() {
        assert_eq!(
            number_placeholders("SELECT * FROM t WHERE a = ? AND b IN (?, ?)"),
            "SELECT * FROM t WHERE a = $1 AND b IN ($2, $3)"
        );
        assert_eq!(number_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn question_marks_in_literals_and_comments_are_kept() {
        assert_eq!(
            number_placeholders("SELECT '?', 'it''s ?', \"col?\" FROM t WHERE a = ?"),
            "SELECT '?', 'it''s ?', \"col?\" FROM t WHERE a = $1"
        );
        assert_eq!(
            number_placeholders("SELECT ? -- why?\n/* or ? */ , ?"),
            "SELECT $1 -- why?\n/* or ? */ , $2"
        );
        assert_eq!(
            number_placeholders("SELECT $$a ? b$$, $fn$ ? $fn$, ?"),
            "SELECT $$a ? b$$, $fn$ ? $fn$, $1"
        );
        assert_eq!(number_placeholders("SELECT $1, ?"), "SELECT $1, $1");
        assert_eq!(number_placeholders("SELECT 'open ?"), "SELECT 'open ?");
    }

    #[test]
    fn other_names_are_driver_errors() {
        let params = vec![BoundParam::new(":name", json!("x"), None)];
        assert!(normalize(&params).unwrap_err().is_driver());
    }

    #[test]
    fn values_convert_by_parameter_type() {
        assert!(to_sql(1, &Type::INT4, &json!("12")).is_ok());
        assert!(to_sql(1, &Type::INT4, &json!("twelve")).unwrap_err().is_driver());
        assert!(to_sql(1, &Type::UUID, &json!("not-a-uuid")).unwrap_err().is_driver());
        assert!(to_sql(1, &Type::DATE, &json!("2024-02-29")).is_ok());
        assert!(to_sql(1, &Type::TEXT, &json!(5)).is_ok());
        assert!(to_sql(1, &Type::INT8, &Value::Null).is_ok());
    }

    #[test]
    fn integer_parameters_reject_fractions_and_overflow() {
        assert!(to_sql(1, &Type::INT4, &json!(3.7)).unwrap_err().is_driver());
        assert!(to_sql(1, &Type::INT4, &json!("3.7")).unwrap_err().is_driver());
        assert!(to_sql(1, &Type::INT2, &json!(70000)).unwrap_err().is_driver());
        assert!(to_sql(1, &Type::INT4, &json!(10_000_000_000i64)).unwrap_err().is_driver());
        assert!(to_sql(1, &Type::INT8, &json!(1e300)).unwrap_err().is_driver());

        assert!(to_sql(1, &Type::INT2, &json!(-32768)).is_ok());
        assert!(to_sql(1, &Type::INT4, &json!(4.0)).is_ok());
        assert!(to_sql(1, &Type::INT8, &json!(i64::MAX)).is_ok());
        assert!(to_sql(1, &Type::INT8, &json!(true)).is_ok());
    }
}
