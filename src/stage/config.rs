//! Stage configuration file (`-c/--config`).

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Contents of a stage configuration file: a YAML mapping.
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    path: Option<PathBuf>,
    values: Mapping,
}

impl StageConfig {
    /// Read and parse a configuration file. An empty file is an empty
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConfigFile`] if the file cannot be read and
    /// [`ConfigError::ConfigParse`] if it is not a YAML mapping.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&text).map_err(|source| ConfigError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// Fails if `text` is not a YAML mapping.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        let values = if text.trim().is_empty() {
            Mapping::new()
        } else {
            serde_yaml::from_str(text)?
        };
        Ok(Self { path: None, values })
    }

    /// File the configuration was read from.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Typed value of a top-level key; `None` when the key is absent.
    ///
    /// # Errors
    ///
    /// Fails if the value does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_yaml::Error> {
        self.values
            .get(key)
            .map(|v| serde_yaml::from_value(v.clone()))
            .transpose()
    }

    /// The whole configuration as `T`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not deserialize into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        serde_yaml::from_value(Value::Mapping(self.values.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct EsConfig {
        host: String,
        port: u16,
        #[serde(default)]
        index: Option<String>,
    }

    #[test]
    fn typed_access() {
        let config = StageConfig::from_yaml("host: localhost\nport: 9200\n").unwrap();
        assert_eq!(config.get::<String>("host").unwrap().as_deref(), Some("localhost"));
        assert_eq!(config.get::<u16>("port").unwrap(), Some(9200));
        assert_eq!(config.get::<u16>("missing").unwrap(), None);
        assert!(config.get::<u16>("host").is_err());

        let es: EsConfig = config.parse().unwrap();
        assert_eq!(
            es,
            EsConfig {
                host: "localhost".into(),
                port: 9200,
                index: None
            }
        );
    }

    #[test]
    fn empty_and_invalid_text() {
        assert!(StageConfig::from_yaml("").unwrap().is_empty());
        assert!(StageConfig::from_yaml("- a\n- b\n").is_err());
    }
}
