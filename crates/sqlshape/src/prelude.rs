//! Convenient imports for typical `sqlshape` usage.
//!
//! ```ignore
//! use sqlshape::prelude::*;
//! ```

pub use crate::{
    Database, Engine, QueryTemplate, ResultSet, ResultSetOptions, ResultTree, Selector,
    ShapeError, ShapeResult, Shape, Slice, TemplateEngine, TransformChain,
};

#[cfg(feature = "postgres")]
pub use crate::PgDatabase;
