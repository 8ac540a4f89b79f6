//! # sqlshape
//!
//! Template-driven SQL construction with keyed result trees.
//!
//! ## Features
//!
//! - **SQL templates**: queries are written in a small `[% ... %]` directive language
//! - **Directives in the SQL**: templates can bind parameters and declare key, drop and
//!   sort columns, preference rules and transform steps while they render
//! - **Keyed trees**: rows are folded into a `key → key → … → record` tree
//! - **Preference rules**: ordered predicates decide which of several rows sharing a
//!   key is kept; without rules the last fetched row wins
//! - **Transform chains**: per-row, per-field and per-group value rewriting
//! - **Flat output**: hash or array per row, with optional slicing
//!
//! ## Example
//!
//! ```ignore
//! use sqlshape::prelude::*;
//! use std::sync::Arc;
//!
//! let mut q = QueryTemplate::builder()
//!     .sql(
//!         "SELECT id, source, value FROM readings \
//!          WHERE site = [% bind(site) %] ORDER BY id\
//!          [% key_columns('id'); drop_columns('source'); prefer(\"source == 'sensor'\") %]",
//!     )
//!     .var("site", "north")
//!     .database(Arc::new(PgDatabase::connect(&url)?))
//!     .build()?;
//!
//! let tree = q.result_set()?.fetch_tree()?;
//! println!("{}", serde_json::to_string_pretty(&tree)?);
//! ```

pub mod database;
pub mod error;
pub mod flat;
pub mod order;
pub mod prelude;
pub mod query;
pub mod resolver;
pub mod result_set;
pub mod template;
pub mod transform;
pub mod tree;
pub mod value;

#[cfg(feature = "postgres")]
pub mod pg;

pub use database::{BoundParam, Database, Executed, MemoryDatabase, Placeholder, Statement, positional_values};
pub use error::{ShapeError, ShapeResult};
pub use flat::{Slice, assemble};
pub use order::{OrderSuffix, extract_order_columns};
pub use query::{QueryTemplate, QueryTemplateBuilder, TemplateFn, squeeze_blank_lines};
pub use resolver::{PreferenceResolver, resolve};
pub use result_set::{ResultSet, ResultSetOptions, Rows, Shape};
pub use template::{Context, Engine, EngineConfig, Template, TemplateEngine};
pub use transform::{Selector, StepSource, TransformChain, TransformFn};
pub use tree::{ResultTree, TreeColumns, build_tree};
pub use value::{Record, Value};

#[cfg(feature = "postgres")]
pub use pg::PgDatabase;
