use crate::options::ClientOptions;
use std::{fs, path};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),
    #[error("Missing config section: {0}")]
    MissingSection(String),
    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Uninitialized field: {0}")]
    Uninitialized(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Self::Uninitialized(err.field_name().to_string())
    }
}

/// Anything that carries a YAML document can hand out client options.
pub trait Configurable {
    /// Root of the loaded document.
    fn config(&self) -> &serde_yaml::Value;

    fn load_config(path: impl AsRef<path::Path>) -> Result<serde_yaml::Value, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let document = serde_yaml::from_str(&raw)?;
        Ok(document)
    }

    /// Walk the document along a dotted path such as `"crawler.http"`.
    fn get_config_value(&self, dotted: &str) -> Option<&serde_yaml::Value> {
        if dotted.is_empty() {
            return None;
        }
        dotted
            .split('.')
            .try_fold(self.config(), |node, segment| node.get(segment))
    }

    /// Build [`ClientOptions`] from the section found at `key`.
    fn client_options(&self, key: &str) -> Result<ClientOptions, ConfigError> {
        let section = self
            .get_config_value(key)
            .ok_or_else(|| ConfigError::MissingSection(key.to_string()))?;
        ClientOptions::from_config(section)
    }
}
