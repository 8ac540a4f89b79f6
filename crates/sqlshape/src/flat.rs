//! Flat (non-nested) result assembly.

use crate::error::{ShapeError, ShapeResult};
use crate::transform::TransformChain;
use crate::value::{Record, Value};

/// Output shape for each row of a flat result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Slice {
    /// An object of every non-dropped column.
    #[default]
    Hash,
    /// An array of every non-dropped column, in column order.
    Array,
    /// An object of exactly these fields. Dropped columns are not filtered.
    Fields(Vec<String>),
    /// An array of the columns at these positions. Dropped columns are not filtered.
    Indices(Vec<usize>),
}

/// Assemble rows into a flat list.
///
/// `columns` is the statement's column list; it is only known after execution, and
/// assembling without it is a usage error. Rows pass through `chain` before slicing.
pub fn assemble<I>(
    rows: I,
    slice: &Slice,
    columns: Option<&[String]>,
    drop_columns: &[String],
    chain: Option<&TransformChain>,
) -> ShapeResult<Vec<Value>>
where
    I: IntoIterator<Item = ShapeResult<Record>>,
{
    let Some(columns) = columns else {
        return Err(ShapeError::usage(
            "column names are unknown until the statement has executed",
        ));
    };
    let kept: Vec<&String> = columns
        .iter()
        .filter(|c| !drop_columns.contains(c))
        .collect();

    let mut out = Vec::new();
    for row in rows {
        let row = match chain {
            Some(chain) => match chain.call(row?)? {
                Some(row) => row,
                None => continue,
            },
            None => row?,
        };
        out.push(shape(&row, slice, columns, &kept));
    }
    Ok(out)
}

fn field(row: &Record, name: &str) -> Value {
    row.get(name).cloned().unwrap_or(Value::Null)
}

fn shape(row: &Record, slice: &Slice, columns: &[String], kept: &[&String]) -> Value {
    match slice {
        Slice::Hash => Value::Object(
            kept.iter()
                .map(|name| ((*name).clone(), field(row, name)))
                .collect(),
        ),
        Slice::Array => Value::Array(kept.iter().map(|name| field(row, name)).collect()),
        Slice::Fields(names) => Value::Object(
            names
                .iter()
                .map(|name| (name.clone(), field(row, name)))
                .collect(),
        ),
        Slice::Indices(indices) => Value::Array(
            indices
                .iter()
                .map(|&idx| columns.get(idx).map_or(Value::Null, |name| field(row, name)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Selector;
    use serde_json::json;

    fn columns() -> Vec<String> {
        ["id", "name", "note"].iter().map(|s| s.to_string()).collect()
    }

    fn rows() -> Vec<ShapeResult<Record>> {
        let list: Vec<Record> = serde_json::from_value(json!([
            {"id": 1, "name": " a ", "note": "x"},
            {"id": 2, "name": "b", "note": "y"}
        ]))
        .unwrap();
        list.into_iter().map(Ok).collect()
    }

    fn drop() -> Vec<String> {
        vec!["note".to_string()]
    }

    #[test]
    fn hash_slice_omits_dropped_columns() {
        let cols = columns();
        let out = assemble(rows(), &Slice::Hash, Some(&cols), &drop(), None).unwrap();
        assert_eq!(out, vec![json!({"id": 1, "name": " a "}), json!({"id": 2, "name": "b"})]);
    }

    #[test]
    fn array_slice_keeps_column_order() {
        let cols = columns();
        let out = assemble(rows(), &Slice::Array, Some(&cols), &drop(), None).unwrap();
        assert_eq!(out, vec![json!([1, " a "]), json!([2, "b"])]);
    }

    #[test]
    fn explicit_slices_are_verbatim() {
        let cols = columns();
        let fields = Slice::Fields(vec!["note".into(), "id".into()]);
        let out = assemble(rows(), &fields, Some(&cols), &drop(), None).unwrap();
        assert_eq!(out[0], json!({"note": "x", "id": 1}));

        let indices = Slice::Indices(vec![2, 0, 9]);
        let out = assemble(rows(), &indices, Some(&cols), &drop(), None).unwrap();
        assert_eq!(out[1], json!(["y", 2, null]));
    }

    #[test]
    fn transforms_run_before_slicing() {
        let cols = columns();
        let mut chain = TransformChain::new();
        chain.append("trim", Selector::Field("name".into()), vec![]).unwrap();
        let out = assemble(rows(), &Slice::Array, Some(&cols), &drop(), Some(&chain)).unwrap();
        assert_eq!(out[0], json!([1, "a"]));
    }

    #[test]
    fn unknown_columns_is_usage_error() {
        let err = assemble(rows(), &Slice::Hash, None, &[], None).unwrap_err();
        assert!(err.is_usage());
    }
}
