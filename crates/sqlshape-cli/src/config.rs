use serde::Deserialize;
use serde_json::{Map, Value};
use sqlshape::{
    Engine, EngineConfig, QueryTemplate, QueryTemplateBuilder, Selector, StepSource,
    TransformChain,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub config_dir: PathBuf,
    pub file: ConfigFile,
}

impl ProjectConfig {
    pub fn load(config_path: PathBuf) -> anyhow::Result<Self> {
        let config_dir = config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let raw = std::fs::read_to_string(&config_path).map_err(|e| {
            anyhow::anyhow!(
                "failed to read config file {}: {e}",
                config_path.display()
            )
        })?;

        let mut file = ConfigFile::parse(&raw).map_err(|e| {
            anyhow::anyhow!(
                "failed to load config file {}: {e:#}",
                config_path.display()
            )
        })?;
        file.expand_env()?;
        file.validate()?;

        Ok(Self { config_dir, file })
    }

    pub fn resolve_path(&self, p: impl AsRef<Path>) -> PathBuf {
        let p = p.as_ref();
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.config_dir.join(p)
        }
    }

    /// Query template builder described by the config, without a database.
    pub fn template_builder(&self) -> anyhow::Result<QueryTemplateBuilder> {
        let query = &self.file.query;
        let mut builder = QueryTemplate::builder()
            .prefix(query.prefix.clone())
            .suffix(query.suffix.clone())
            .key_columns(query.key_columns.iter().cloned())
            .drop_columns(query.drop_columns.iter().cloned())
            .squeeze_blank_lines(query.squeeze_blank_lines);

        builder = match (&query.sql, &query.file) {
            (Some(sql), _) => builder.sql(sql.clone()),
            (None, Some(file)) => builder.file(self.resolve_path(file)),
            (None, None) => builder,
        };
        if let Some(order) = &query.order {
            builder = builder.order(order.iter().cloned());
        }
        if let Some(suffix) = &query.order_suffix {
            builder = builder.order_suffix(suffix.clone());
        }
        for rule in &query.prefer {
            builder = builder.prefer(rule.clone());
        }
        for (name, value) in &self.file.vars {
            builder = builder.var(name.clone(), value.clone());
        }

        let engine = Engine::with_config(self.file.engine.to_engine_config())?;
        builder = builder.engine(Arc::new(engine));

        // A chain is always configured so `transform(...)` directives work.
        let mut chain = TransformChain::new();
        for step in &self.file.transform {
            chain.append(
                StepSource::Named(step.name.clone()),
                step.selector(),
                step.args.clone(),
            )?;
        }
        Ok(builder.transform(chain))
    }
}

/// Apply `--var NAME=VALUE` overrides. Values that parse as JSON keep their type.
pub fn apply_vars(
    mut builder: QueryTemplateBuilder,
    vars: &[(String, String)],
) -> QueryTemplateBuilder {
    for (name, raw) in vars {
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        builder = builder.var(name.clone(), value);
    }
    builder
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,

    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    pub query: QueryConfig,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub vars: Map<String, Value>,

    #[serde(default)]
    pub transform: Vec<TransformStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryConfig {
    pub sql: Option<String>,
    pub file: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub drop_columns: Vec<String>,
    pub order: Option<Vec<String>>,
    pub order_suffix: Option<String>,
    #[serde(default)]
    pub prefer: Vec<String>,
    #[serde(default)]
    pub squeeze_blank_lines: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_true")]
    pub strict: bool,
    /// Empty string exposes every variable.
    #[serde(default = "default_private_pattern")]
    pub private_pattern: String,
}

fn default_true() -> bool {
    true
}

fn default_private_pattern() -> String {
    "^[_.]".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            strict: true,
            private_pattern: default_private_pattern(),
        }
    }
}

impl EngineSection {
    fn to_engine_config(&self) -> EngineConfig {
        let config = EngineConfig::new().strict(self.strict);
        if self.private_pattern.is_empty() {
            config.no_private()
        } else {
            config.private_pattern(self.private_pattern.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformStep {
    pub name: String,
    pub field: Option<String>,
    pub group: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl TransformStep {
    fn selector(&self) -> Selector {
        match (&self.field, &self.group) {
            (Some(field), _) => Selector::Field(field.clone()),
            (None, Some(group)) => Selector::Group(group.clone()),
            (None, None) => Selector::Row,
        }
    }
}

impl ConfigFile {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn expand_env(&mut self) -> anyhow::Result<()> {
        if let Some(database) = self.database.as_mut() {
            database.url = expand_env_vars(&database.url)?;
        }
        if let Some(file) = self.query.file.as_mut() {
            *file = expand_env_vars(file)?;
        }
        for value in self.vars.values_mut() {
            if let Value::String(s) = value {
                *s = expand_env_vars(s)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.version.trim() != "1" {
            anyhow::bail!("unsupported config version: {}", self.version);
        }

        match (&self.query.sql, &self.query.file) {
            (Some(_), Some(_)) => anyhow::bail!("query.sql and query.file are mutually exclusive"),
            (None, None) => anyhow::bail!("one of query.sql or query.file is required"),
            _ => {}
        }

        if let Some(database) = &self.database {
            if database.url.trim().is_empty() {
                anyhow::bail!("database.url must not be empty");
            }
        }

        for step in &self.transform {
            if step.name.trim().is_empty() {
                anyhow::bail!("transform.name must not be empty");
            }
            if step.field.is_some() && step.group.is_some() {
                anyhow::bail!(
                    "transform '{}' sets both field and group; pick one",
                    step.name
                );
            }
        }

        Ok(())
    }
}

fn expand_env_vars(input: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            anyhow::bail!("unterminated env var reference: ${{{after}");
        };
        let key = &after[..end];
        if key.is_empty() {
            anyhow::bail!("invalid env var reference: ${{}}");
        }
        let v = std::env::var(key)
            .map_err(|_| anyhow::anyhow!("missing env var for config expansion: {key}"))?;
        out.push_str(&v);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}
