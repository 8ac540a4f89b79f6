//! Keyed result trees.
//!
//! Rows are stored flat, keyed by the tuple of their key-column values, and fanned
//! out to a nested `key → key → … → record` mapping only when asked for.

use crate::error::{ShapeError, ShapeResult};
use crate::resolver::PreferenceResolver;
use crate::transform::TransformChain;
use crate::value::{Record, Value, number, to_text};
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Column layout used while building a tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeColumns<'a> {
    pub key: &'a [String],
    pub drop: &'a [String],
    pub non_key: &'a [String],
}

/// A built result tree. Entries keep first-arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTree {
    key_columns: Vec<String>,
    keys: Vec<Vec<String>>,
    records: Vec<Record>,
    index: HashMap<Vec<String>, usize>,
}

impl ResultTree {
    fn new(key_columns: Vec<String>) -> Self {
        Self {
            key_columns,
            ..Self::default()
        }
    }

    /// Key columns, outermost first.
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Tree depth (number of key columns).
    pub fn depth(&self) -> usize {
        self.key_columns.len()
    }

    /// Number of leaf records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Leaf record for a full composite key.
    pub fn get<S: AsRef<str>>(&self, key: &[S]) -> Option<&Record> {
        let key: Vec<String> = key.iter().map(|k| k.as_ref().to_string()).collect();
        self.index.get(&key).map(|&idx| &self.records[idx])
    }

    /// `(composite key, record)` pairs in first-arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&[String], &Record)> {
        self.keys
            .iter()
            .map(Vec::as_slice)
            .zip(self.records.iter())
    }

    /// Materialize the nested mapping view.
    pub fn to_nested(&self) -> Value {
        let mut root = Record::new();
        for (key, record) in self.iter() {
            let Some((last, parents)) = key.split_last() else {
                continue;
            };
            let mut node = &mut root;
            for part in parents {
                let child = node
                    .entry(part.clone())
                    .or_insert_with(|| Value::Object(Record::new()));
                if !child.is_object() {
                    *child = Value::Object(Record::new());
                }
                node = match child {
                    Value::Object(map) => map,
                    _ => unreachable!("child was just made an object"),
                };
            }
            node.insert(last.clone(), Value::Object(record.clone()));
        }
        Value::Object(root)
    }

    fn slot(&self, key: &[String]) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn insert(&mut self, key: Vec<String>, record: Record) {
        self.index.insert(key.clone(), self.records.len());
        self.keys.push(key);
        self.records.push(record);
    }
}

impl Serialize for ResultTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_nested().serialize(serializer)
    }
}

/// Bucket name for a key value. `null` shares the empty-string bucket and numbers
/// bucket by value, so `1`, `1.0` and `"1"` land together.
fn key_part(row: &Record, column: &str) -> ShapeResult<String> {
    match row.get(column) {
        Some(Value::Number(n)) if n.is_f64() => Ok(n
            .as_f64()
            .map_or_else(|| n.to_string(), |f| to_text(&number(f)))),
        Some(value) => Ok(to_text(value)),
        None => Err(ShapeError::usage(format!(
            "row has no key column '{column}'"
        ))),
    }
}

/// The fields stored in the tree: key columns, non-key columns, then any other
/// non-dropped field a transform may have added.
fn retained(row: &Record, columns: &TreeColumns<'_>) -> Record {
    let mut out = Record::new();
    for name in columns.key.iter().chain(columns.non_key) {
        if let Some(value) = row.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in row {
        if !out.contains_key(name) && !columns.drop.contains(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

fn dropped(row: &Record, columns: &TreeColumns<'_>) -> Record {
    columns
        .drop
        .iter()
        .filter_map(|name| row.get(name).map(|v| (name.clone(), v.clone())))
        .collect()
}

/// Build a tree from a row stream.
///
/// On a key collision without preference rules the later row replaces the stored
/// one. With rules, the stored record (plus the dropped columns remembered for its
/// key) and the incoming row are handed to the resolver, in that order, and the
/// winner's retained fields are stored.
pub fn build_tree<I>(
    rows: I,
    columns: TreeColumns<'_>,
    chain: Option<&TransformChain>,
    resolver: Option<&PreferenceResolver>,
) -> ShapeResult<ResultTree>
where
    I: IntoIterator<Item = ShapeResult<Record>>,
{
    if columns.key.is_empty() {
        return Err(ShapeError::usage(
            "building a result tree requires at least one key column",
        ));
    }

    let resolver = resolver.filter(|r| !r.is_empty());
    let mut tree = ResultTree::new(columns.key.to_vec());
    let mut shadow: HashMap<Vec<String>, Record> = HashMap::new();
    let mut collisions = 0usize;

    for row in rows {
        let row = match chain {
            Some(chain) => match chain.call(row?)? {
                Some(row) => row,
                None => continue,
            },
            None => row?,
        };

        let key = columns
            .key
            .iter()
            .map(|column| key_part(&row, column))
            .collect::<ShapeResult<Vec<_>>>()?;

        let Some(idx) = tree.slot(&key) else {
            if resolver.is_some() {
                shadow.insert(key.clone(), dropped(&row, &columns));
            }
            tree.insert(key, retained(&row, &columns));
            continue;
        };

        collisions += 1;
        let Some(resolver) = resolver else {
            tree.records[idx] = retained(&row, &columns);
            continue;
        };

        let mut previous = tree.records[idx].clone();
        if let Some(hidden) = shadow.get(&key) {
            for (name, value) in hidden {
                previous.insert(name.clone(), value.clone());
            }
        }
        let candidates = [previous, row];
        let winner = resolver.resolve(&candidates)?;
        tree.records[idx] = retained(winner, &columns);
        shadow.insert(key, dropped(&candidates[1], &columns));
    }

    tracing::debug!(
        target: "sqlshape.tree",
        records = tree.len(),
        collisions,
        "built result tree"
    );
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Engine;
    use crate::transform::Selector;
    use serde_json::json;
    use std::sync::Arc;

    fn rows(values: Value) -> Vec<ShapeResult<Record>> {
        let list: Vec<Record> = serde_json::from_value(values).unwrap();
        list.into_iter().map(Ok).collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn resolver(rules: &[&str]) -> PreferenceResolver {
        PreferenceResolver::new(Arc::new(Engine::new()), names(rules))
    }

    #[test]
    fn empty_key_columns_is_usage_error() {
        let err = build_tree(
            rows(json!([{"id": 1}])),
            TreeColumns {
                key: &[],
                drop: &[],
                non_key: &names(&["id"]),
            },
            None,
            None,
        )
        .unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn later_row_overwrites_without_rules() {
        let key = names(&["id"]);
        let non_key = names(&["value"]);
        let drop = names(&["note"]);
        let tree = build_tree(
            rows(json!([
                {"id": 1, "value": "first", "note": "a"},
                {"id": 2, "value": "other", "note": "b"},
                {"id": 1, "value": "second", "note": "c"}
            ])),
            TreeColumns {
                key: &key,
                drop: &drop,
                non_key: &non_key,
            },
            None,
            None,
        )
        .unwrap();

        assert_eq!(tree.len(), 2);
        let leaf = tree.get(&["1"]).unwrap();
        assert_eq!(leaf, &serde_json::from_value::<Record>(json!({"id": 1, "value": "second"})).unwrap());
        assert_eq!(
            tree.to_nested(),
            json!({"1": {"id": 1, "value": "second"}, "2": {"id": 2, "value": "other"}})
        );
    }

    #[test]
    fn equal_key_values_share_a_bucket() {
        let key = names(&["id"]);
        let non_key = names(&["value"]);
        let tree = build_tree(
            rows(json!([
                {"id": 1, "value": "int"},
                {"id": 1.0, "value": "float"},
                {"id": "1", "value": "text"},
                {"id": null, "value": "null"},
                {"id": "", "value": "empty"},
                {"id": 2.5, "value": "fraction"}
            ])),
            TreeColumns {
                key: &key,
                drop: &[],
                non_key: &non_key,
            },
            None,
            None,
        )
        .unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get(&["1"]).unwrap()["value"], json!("text"));
        assert_eq!(tree.get(&[""]).unwrap()["value"], json!("empty"));
        assert_eq!(tree.get(&["2.5"]).unwrap()["value"], json!("fraction"));
    }

    #[test]
    fn nested_view_has_one_level_per_key() {
        let key = names(&["region", "id"]);
        let non_key = names(&["n"]);
        let tree = build_tree(
            rows(json!([
                {"region": "eu", "id": 1, "n": 1},
                {"region": "eu", "id": 2, "n": 2},
                {"region": "us", "id": 1, "n": 3}
            ])),
            TreeColumns {
                key: &key,
                drop: &[],
                non_key: &non_key,
            },
            None,
            None,
        )
        .unwrap();

        assert_eq!(tree.depth(), 2);
        assert_eq!(
            tree.to_nested(),
            json!({
                "eu": {"1": {"region": "eu", "id": 1, "n": 1}, "2": {"region": "eu", "id": 2, "n": 2}},
                "us": {"1": {"region": "us", "id": 1, "n": 3}}
            })
        );
    }

    #[test]
    fn rules_see_dropped_columns_of_stored_record() {
        let key = names(&["id"]);
        let non_key = names(&["value"]);
        let drop = names(&["source"]);
        let prefer = resolver(&["source == 'primary'"]);
        let tree = build_tree(
            rows(json!([
                {"id": 1, "value": "from-primary", "source": "primary"},
                {"id": 1, "value": "from-mirror", "source": "mirror"}
            ])),
            TreeColumns {
                key: &key,
                drop: &drop,
                non_key: &non_key,
            },
            None,
            Some(&prefer),
        )
        .unwrap();

        let leaf = tree.get(&["1"]).unwrap();
        assert_eq!(leaf["value"], json!("from-primary"));
        assert!(!leaf.contains_key("source"));
    }

    #[test]
    fn first_arrival_skips_resolver() {
        let key = names(&["id"]);
        // A rule referencing a missing field would fail if it were ever evaluated.
        let prefer = resolver(&["missing == 1"]);
        let tree = build_tree(
            rows(json!([{"id": 1}, {"id": 2}])),
            TreeColumns {
                key: &key,
                drop: &[],
                non_key: &[],
            },
            None,
            Some(&prefer),
        )
        .unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn resolver_errors_abort_the_build() {
        let key = names(&["id"]);
        let prefer = resolver(&["missing == 1"]);
        let err = build_tree(
            rows(json!([{"id": 1}, {"id": 1}])),
            TreeColumns {
                key: &key,
                drop: &[],
                non_key: &[],
            },
            None,
            Some(&prefer),
        )
        .unwrap_err();
        assert!(err.is_render());
    }

    #[test]
    fn missing_key_column_is_an_error() {
        let key = names(&["id"]);
        let err = build_tree(
            rows(json!([{"other": 1}])),
            TreeColumns {
                key: &key,
                drop: &[],
                non_key: &[],
            },
            None,
            None,
        )
        .unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn stream_errors_abort_the_build() {
        let key = names(&["id"]);
        let mut input = rows(json!([{"id": 1}]));
        input.push(Err(ShapeError::driver("connection reset")));
        let err = build_tree(
            input,
            TreeColumns {
                key: &key,
                drop: &[],
                non_key: &[],
            },
            None,
            None,
        )
        .unwrap_err();
        assert!(err.is_driver());
    }

    #[test]
    fn transforms_run_before_keying_and_can_skip_rows() {
        let key = names(&["code"]);
        let non_key = names(&["label"]);
        let mut chain = TransformChain::new();
        chain
            .append("upper", Selector::Field("code".into()), vec![])
            .unwrap()
            .append(
                crate::transform::StepSource::callable("skip_hidden", |row, _| {
                    Ok(if row["label"] == json!("hidden") { Value::Null } else { row })
                }),
                Selector::Row,
                vec![],
            )
            .unwrap();

        let tree = build_tree(
            rows(json!([
                {"code": "ab", "label": "x"},
                {"code": "AB", "label": "y"},
                {"code": "cd", "label": "hidden"}
            ])),
            TreeColumns {
                key: &key,
                drop: &[],
                non_key: &non_key,
            },
            Some(&chain),
            None,
        )
        .unwrap();

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&["AB"]).unwrap()["label"], json!("y"));
    }
}
