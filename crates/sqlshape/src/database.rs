//! Database collaborator traits and the in-memory implementation.

use crate::error::{ShapeError, ShapeResult};
use crate::value::{Record, Value};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Where a bound value goes: a 1-based position or a driver-specific name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Placeholder {
    Index(u64),
    Named(String),
}

impl Placeholder {
    /// Text to splice into SQL at the bind site: `?` for positions, the name otherwise.
    pub fn sql_text(&self) -> String {
        match self {
            Placeholder::Index(_) => "?".to_string(),
            Placeholder::Named(name) => name.clone(),
        }
    }

    /// Interpret a template argument: nonnegative integers (or all-digit strings) are
    /// positions, anything else is a name.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_u64() {
                Some(idx) => Placeholder::Index(idx),
                None => Placeholder::Named(n.to_string()),
            },
            Value::String(s) => s.into(),
            other => Placeholder::Named(crate::value::to_text(other)),
        }
    }
}

impl From<u64> for Placeholder {
    fn from(idx: u64) -> Self {
        Placeholder::Index(idx)
    }
}

impl From<&str> for Placeholder {
    fn from(text: &str) -> Self {
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(idx) = text.parse() {
                return Placeholder::Index(idx);
            }
        }
        Placeholder::Named(text.to_string())
    }
}

impl From<&String> for Placeholder {
    fn from(text: &String) -> Self {
        text.as_str().into()
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Index(idx) => write!(f, "{idx}"),
            Placeholder::Named(name) => f.write_str(name),
        }
    }
}

/// One recorded bind: placeholder, value and optional driver attribute hint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundParam {
    pub placeholder: Placeholder,
    pub value: Value,
    pub attrs: Option<Value>,
}

impl BoundParam {
    pub fn new(placeholder: impl Into<Placeholder>, value: Value, attrs: Option<Value>) -> Self {
        Self {
            placeholder: placeholder.into(),
            value,
            attrs,
        }
    }
}

/// Flatten bind entries into the `count` positional values a statement takes.
///
/// Entries are applied in order, so a later entry at a reused position replaces the
/// earlier value. Positions never bound are `null`. Named entries are skipped. A
/// position outside `1..=count` is a [`ShapeError::Driver`].
pub fn positional_values(params: &[BoundParam], count: usize) -> ShapeResult<Vec<Value>> {
    let mut out = vec![Value::Null; count];
    for param in params {
        if let Placeholder::Index(idx) = param.placeholder {
            let slot = usize::try_from(idx)
                .ok()
                .and_then(|idx| idx.checked_sub(1))
                .filter(|slot| *slot < count)
                .ok_or_else(|| {
                    ShapeError::driver(format!(
                        "placeholder {idx} is out of range; statement takes {count} parameters"
                    ))
                })?;
            out[slot] = param.value.clone();
        }
    }
    Ok(out)
}

/// Opaque database connection.
pub trait Database: Send + Sync {
    /// Prepare a statement. Driver failures are [`ShapeError::Driver`].
    fn prepare(&self, sql: &str) -> ShapeResult<Box<dyn Statement>>;
}

/// A prepared statement.
pub trait Statement {
    /// Execute with the recorded bind entries.
    fn execute(&mut self, params: &[BoundParam]) -> ShapeResult<()>;

    /// Column names, known once the statement has executed.
    fn column_names(&self) -> Option<&[String]>;

    /// Next row, or `None` at end of stream.
    fn fetch_row(&mut self) -> ShapeResult<Option<Record>>;
}

/// A statement run against [`MemoryDatabase`].
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<BoundParam>,
}

#[derive(Debug, Default)]
struct MemoryState {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    fail_with: Option<String>,
    log: Vec<Executed>,
}

/// In-memory database returning a fixed result for every statement.
///
/// Executions are logged so callers can inspect the SQL and binds that reached the
/// driver.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    /// A database whose statements return `rows` with `columns`.
    pub fn new<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = MemoryState {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make every execution fail with a driver error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let state = MemoryState {
            fail_with: Some(message.into()),
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Statements executed so far.
    pub fn executed(&self) -> Vec<Executed> {
        self.state.lock().map(|s| s.log.clone()).unwrap_or_default()
    }
}

impl Database for MemoryDatabase {
    fn prepare(&self, sql: &str) -> ShapeResult<Box<dyn Statement>> {
        Ok(Box::new(MemoryStatement {
            sql: sql.to_string(),
            state: Arc::clone(&self.state),
            columns: None,
            pending: VecDeque::new(),
        }))
    }
}

struct MemoryStatement {
    sql: String,
    state: Arc<Mutex<MemoryState>>,
    columns: Option<Vec<String>>,
    pending: VecDeque<Vec<Value>>,
}

impl Statement for MemoryStatement {
    fn execute(&mut self, params: &[BoundParam]) -> ShapeResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ShapeError::driver("memory database lock poisoned"))?;
        state.log.push(Executed {
            sql: self.sql.clone(),
            params: params.to_vec(),
        });
        if let Some(message) = &state.fail_with {
            return Err(ShapeError::driver(message.clone()));
        }
        self.columns = Some(state.columns.clone());
        self.pending = state.rows.iter().cloned().collect();
        Ok(())
    }

    fn column_names(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn fetch_row(&mut self) -> ShapeResult<Option<Record>> {
        let Some(columns) = &self.columns else {
            return Err(ShapeError::usage("fetch_row called before execute"));
        };
        let Some(values) = self.pending.pop_front() else {
            return Ok(None);
        };
        if values.len() != columns.len() {
            return Err(ShapeError::driver(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Some(columns.iter().cloned().zip(values).collect()))
    }
}
