use crate::cli::RenderArgs;
use crate::config::{ProjectConfig, apply_vars};

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let project = ProjectConfig::load(args.config.clone())?;
    let mut query = apply_vars(project.template_builder()?, &args.vars).build()?;

    let sql = query.render()?.to_string();
    println!("{sql}");

    if !query.params().is_empty() {
        println!();
        println!("{}", serde_json::to_string_pretty(query.params())?);
    }
    Ok(())
}
