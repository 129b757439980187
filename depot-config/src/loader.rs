// Configuration file loaders

use crate::env::EnvLoader;
use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `KEY=value` lines using the environment naming convention
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }
}

/// Parses a configuration file into a JSON tree
pub struct ConfigLoader {
    format: FileFormat,
    env: EnvLoader,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            env: EnvLoader::default(),
        }
    }

    /// Detect the format from the file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError(format!("{} has no extension", path.display())))?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("unsupported format: {ext}")))?;

        Ok(Self::new(format))
    }

    /// Variable prefix used for `.env`-style files
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env = EnvLoader::new(prefix);
        self
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {e}", path.display())))?;

        self.parse(&content)
    }

    pub fn parse(&self, content: &str) -> Result<Value> {
        let value = match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON: {e}")))?,
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML: {e}")))?;
                serde_json::to_value(table)
                    .map_err(|e| ConfigError::ParseError(format!("TOML: {e}")))?
            }
            FileFormat::Env => self.env.from_pairs(env_lines(content)),
        };

        if !value.is_object() {
            return Err(ConfigError::ParseError(
                "top level must be a table of sections".to_string(),
            ));
        }
        Ok(value)
    }
}

fn env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_toml_sections() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let value = loader
            .parse(
                r#"
                [namespace]
                prefix = "org_"

                [listener.retry]
                max_attempts = 3
                "#,
            )
            .unwrap();

        assert_eq!(value["namespace"]["prefix"], "org_");
        assert_eq!(value["listener"]["retry"]["max_attempts"], 3);
    }

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let value = loader.parse(r#"{"database": {"pool_size": 4}}"#).unwrap();
        assert_eq!(value, json!({"database": {"pool_size": 4}}));
        assert!(loader.parse("[1, 2]").is_err());
    }

    #[test]
    fn test_parse_env_file() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let value = loader
            .parse(
                r#"
                # database
                export DEPOT_DATABASE__URL="postgres://localhost/depot"
                DEPOT_DATABASE__POOL_SIZE=8
                UNRELATED=1
                "#,
            )
            .unwrap();

        assert_eq!(
            value,
            json!({"database": {"url": "postgres://localhost/depot", "pool_size": 8}})
        );
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("JSON"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("toml"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("env"), Some(FileFormat::Env));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert!(ConfigLoader::auto("depot").is_err());
        assert_eq!(ConfigLoader::auto("depot.toml").unwrap().format(), FileFormat::Toml);
    }

    #[test]
    fn test_bad_toml() {
        let err = ConfigLoader::new(FileFormat::Toml).parse("[database").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
