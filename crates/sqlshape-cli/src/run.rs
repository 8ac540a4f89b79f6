use crate::cli::RunArgs;
use crate::config::{ProjectConfig, apply_vars};
use sqlshape::{PgDatabase, Slice};
use std::sync::Arc;

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let project = ProjectConfig::load(args.config.clone())?;
    let database_url = match (&args.database, &project.file.database) {
        (Some(url), _) => url.clone(),
        (None, Some(database)) => database.url.clone(),
        (None, None) => anyhow::bail!(
            "no database configured in {}; set database.url or pass --database",
            args.config.display()
        ),
    };

    let database = Arc::new(PgDatabase::connect(&database_url)?);
    let mut query = apply_vars(project.template_builder()?, &args.vars)
        .database(database)
        .build()?;

    // Templates may set key columns themselves, so render before choosing a shape.
    query.render()?;
    let flat = args.flat || query.key_columns().is_empty();

    let mut result_set = query.result_set()?;
    let output = if flat {
        serde_json::Value::Array(result_set.fetch_flat(&Slice::Hash)?)
    } else {
        result_set.fetch_tree()?.to_nested()
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
