use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Root,
    Render,
    Run,
}

#[derive(Debug, Clone)]
pub enum Command {
    Help(HelpTopic),
    Render(RenderArgs),
    Run(RunArgs),
}

#[derive(Debug, Clone)]
pub struct RenderArgs {
    pub config: PathBuf,
    pub vars: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config: PathBuf,
    pub database: Option<String>,
    pub vars: Vec<(String, String)>,
    pub flat: bool,
}

const DEFAULT_CONFIG: &str = "sqlshape.toml";

pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().skip(1);
    let Some(first) = it.next() else {
        return Ok(Command::Help(HelpTopic::Root));
    };

    match first.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help(HelpTopic::Root)),
        "render" => parse_render(it.map(|s| s.as_str())),
        "run" => parse_run(it.map(|s| s.as_str())),
        _ => anyhow::bail!("unknown command: {first}"),
    }
}

fn parse_var(v: &str) -> anyhow::Result<(String, String)> {
    let Some((name, value)) = v.split_once('=') else {
        anyhow::bail!("--var expects NAME=VALUE, got: {v}");
    };
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("--var name must not be empty");
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_render<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from(DEFAULT_CONFIG);
    let mut vars = Vec::new();

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Render)),
            "--config" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--config requires a value");
                };
                config = PathBuf::from(v);
            }
            _ if token.starts_with("--config=") => {
                config = PathBuf::from(token.trim_start_matches("--config="));
            }
            "--var" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--var requires a value");
                };
                vars.push(parse_var(v)?);
            }
            _ if token.starts_with("--var=") => {
                vars.push(parse_var(token.trim_start_matches("--var="))?);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    Ok(Command::Render(RenderArgs { config, vars }))
}

fn parse_run<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from(DEFAULT_CONFIG);
    let mut database: Option<String> = None;
    let mut vars = Vec::new();
    let mut flat = false;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Run)),
            "--config" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--config requires a value");
                };
                config = PathBuf::from(v);
            }
            _ if token.starts_with("--config=") => {
                config = PathBuf::from(token.trim_start_matches("--config="));
            }
            "--database" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--database requires a value");
                };
                database = Some(v.to_string());
            }
            _ if token.starts_with("--database=") => {
                database = Some(token.trim_start_matches("--database=").to_string());
            }
            "--var" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--var requires a value");
                };
                vars.push(parse_var(v)?);
            }
            _ if token.starts_with("--var=") => {
                vars.push(parse_var(token.trim_start_matches("--var="))?);
            }
            "--flat" => flat = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    Ok(Command::Run(RunArgs {
        config,
        database,
        vars,
        flat,
    }))
}

pub fn print_help(topic: HelpTopic) {
    match topic {
        HelpTopic::Root => {
            println!(
                "\
sqlshape - render and run SQL templates with keyed result trees

USAGE:
  sqlshape <COMMAND> [OPTIONS]

COMMANDS:
  render        Render the query template and print SQL and bound parameters
  run           Execute the query and print the shaped result as JSON
  help          Print this help

Run `sqlshape <command> --help` for more."
            );
        }
        HelpTopic::Render => {
            println!(
                "\
USAGE:
  sqlshape render [OPTIONS]

OPTIONS:
  --config <FILE>       Config file path (default: sqlshape.toml)
  --var <NAME=VALUE>    Template variable; VALUE is parsed as JSON when possible
  -h, --help            Print help"
            );
        }
        HelpTopic::Run => {
            println!(
                "\
USAGE:
  sqlshape run [OPTIONS]

OPTIONS:
  --config <FILE>       Config file path (default: sqlshape.toml)
  --database <URL>      Override database.url from config
  --var <NAME=VALUE>    Template variable; VALUE is parsed as JSON when possible
  --flat                Print one object per row instead of the keyed tree
  -h, --help            Print help"
            );
        }
    }
}
