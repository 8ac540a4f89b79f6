use serde_json::json;
use sqlshape::{MemoryDatabase, QueryTemplate, ShapeResult, Slice, TransformChain};
use std::sync::Arc;

fn readings() -> Arc<MemoryDatabase> {
    Arc::new(MemoryDatabase::new(
        ["id", "value", "note"],
        vec![
            vec![json!(1), json!("old"), json!("first load")],
            vec![json!(2), json!("other"), json!("kept")],
            vec![json!(1), json!("new"), json!("second load")],
        ],
    ))
}

#[test]
fn key_and_drop_directives_shape_the_tree() -> ShapeResult<()> {
    let db = readings();
    let mut q = QueryTemplate::builder()
        .sql(
            "SELECT id, value, note FROM readings WHERE site = [% bind(site) %]\n\
             [%- key_columns('id'); drop_columns('note') %]",
        )
        .var("site", "north")
        .database(db.clone())
        .build()?;

    let tree = q.result_set()?.fetch_tree()?;
    assert_eq!(tree.len(), 2);

    let leaf = tree.get(&["1"]).expect("id 1 present");
    assert_eq!(leaf.get("value"), Some(&json!("new")));
    assert!(!leaf.contains_key("note"));

    let executed = db.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].sql, "SELECT id, value, note FROM readings WHERE site = ?");
    assert_eq!(executed[0].params[0].value, json!("north"));
    Ok(())
}

#[test]
fn preference_rules_can_keep_the_earlier_row() -> ShapeResult<()> {
    let mut q = QueryTemplate::builder()
        .sql(
            "SELECT id, value, note FROM readings\
             [% key_columns('id'); drop_columns('note'); prefer(\"note == 'first load'\") %]",
        )
        .database(readings())
        .build()?;

    let tree = q.result_set()?.fetch_tree()?;
    assert_eq!(tree.get(&["1"]).unwrap()["value"], json!("old"));
    assert_eq!(
        serde_json::to_value(&tree).unwrap(),
        json!({"1": {"id": 1, "value": "old"}, "2": {"id": 2, "value": "other"}})
    );
    Ok(())
}

#[test]
fn template_transforms_apply_to_groups() -> ShapeResult<()> {
    let mut q = QueryTemplate::builder()
        .sql(
            "SELECT id, value, note FROM readings\
             [% transform('upper', {group => 'non_key'}) %]",
        )
        .transform(TransformChain::new())
        .database(readings())
        .build()?;

    let rows = q.result_set()?.fetch_flat(&Slice::Array)?;
    assert_eq!(
        rows,
        vec![
            json!([1, "OLD", "FIRST LOAD"]),
            json!([2, "OTHER", "KEPT"]),
            json!([1, "NEW", "SECOND LOAD"]),
        ]
    );
    Ok(())
}

#[test]
fn result_set_is_a_snapshot() -> ShapeResult<()> {
    let mut q = QueryTemplate::builder()
        .sql("SELECT id, value, note FROM readings[% key_columns('id') %]")
        .database(readings())
        .build()?;

    let mut rs = q.result_set()?;
    q.set_key_columns(["value"]);
    assert_eq!(rs.key_columns(), ["id"]);
    assert_eq!(rs.fetch_tree()?.len(), 2);
    Ok(())
}

#[test]
fn render_errors_surface_before_execution() {
    let db = readings();
    let mut q = QueryTemplate::builder()
        .sql("SELECT [% columns %] FROM readings")
        .database(db.clone())
        .build()
        .unwrap();

    let err = q.result_set().unwrap_err();
    assert!(err.is_render());
    assert!(db.executed().is_empty());
}
