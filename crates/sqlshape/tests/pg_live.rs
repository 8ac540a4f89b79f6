#![cfg(feature = "postgres")]

use serde_json::json;
use sqlshape::{PgDatabase, QueryTemplate, ShapeResult, Slice};
use std::sync::Arc;

fn database_url() -> Option<String> {
    let _ = dotenvy::dotenv();
    std::env::var("DATABASE_URL").ok()
}

#[test]
fn tree_from_values_list() -> ShapeResult<()> {
    let Some(url) = database_url() else {
        eprintln!("DATABASE_URL is not set; skipping tree_from_values_list");
        return Ok(());
    };

    let mut q = QueryTemplate::builder()
        .sql(
            "SELECT id, source, reading FROM (VALUES \
               (1, 'manual', 10.5::float8), \
               (1, 'sensor', 11.0::float8), \
               (2, 'manual', 7.25::float8)) AS t(id, source, reading) \
             WHERE reading > $1 ORDER BY id\
             [% key_columns('id'); drop_columns('source'); prefer(\"source == 'manual'\") %]",
        )
        .database(Arc::new(PgDatabase::connect(&url)?))
        .build()?;
    q.bind(1.0);

    let mut rs = q.result_set()?;
    let tree = rs.fetch_tree()?;
    assert_eq!(rs.columns()?, ["id", "source", "reading"]);
    assert_eq!(
        tree.to_nested(),
        json!({"1": {"id": 1, "reading": 10.5}, "2": {"id": 2, "reading": 7.25}})
    );
    Ok(())
}

#[test]
fn flat_rows_with_typed_params() -> ShapeResult<()> {
    let Some(url) = database_url() else {
        eprintln!("DATABASE_URL is not set; skipping flat_rows_with_typed_params");
        return Ok(());
    };

    let mut q = QueryTemplate::builder()
        .sql("SELECT $1::int8 AS n, $2::text AS label, $3::jsonb AS doc, NULL::text AS missing")
        .database(Arc::new(PgDatabase::connect(&url)?))
        .build()?;
    q.bind("42");
    q.bind(7);
    q.bind(json!({"k": [1, 2]}));

    let rows = q.result_set()?.fetch_flat(&Slice::Hash)?;
    assert_eq!(
        rows,
        vec![json!({"n": 42, "label": "7", "doc": {"k": [1, 2]}, "missing": null})]
    );
    Ok(())
}

#[test]
fn template_binds_reach_numbered_placeholders() -> ShapeResult<()> {
    let Some(url) = database_url() else {
        eprintln!("DATABASE_URL is not set; skipping template_binds_reach_numbered_placeholders");
        return Ok(());
    };

    let mut q = QueryTemplate::builder()
        .sql(
            "SELECT v, label, '?' AS mark FROM (VALUES (1, 'a'), (2, 'b'), (3, 'c')) AS t(v, label) \
             WHERE v >= [% bind(lo) %] AND label <> [% bind(skip) %] ORDER BY v",
        )
        .var("lo", 2)
        .var("skip", "c")
        .database(Arc::new(PgDatabase::connect(&url)?))
        .build()?;

    assert!(q.render()?.contains("v >= ? AND label <> ?"));
    let rows = q.result_set()?.fetch_flat(&Slice::Hash)?;
    assert_eq!(rows, vec![json!({"v": 2, "label": "b", "mark": "?"})]);
    Ok(())
}
