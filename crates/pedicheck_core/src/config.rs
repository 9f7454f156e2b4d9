//! Core runtime configuration.
//!
//! # Responsibility
//! - Load `CoreConfig` from JSON, filling absent fields with defaults.
//! - Validate operational knobs before any subsystem starts.
//!
//! # Invariants
//! - Clinical thresholds (bands, heart-rate ranges, the 730-day switch) are
//!   constants and never appear here.

use crate::model::growth::Indicator;
use crate::tree::engine::DEFAULT_MAX_TRAVERSAL_STEPS;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Hard ceiling for `max_traversal_steps`.
pub const MAX_TRAVERSAL_STEPS_LIMIT: usize = 10_000;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "config is not valid JSON: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub log_level: String,
    /// Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// In-memory database when unset.
    pub database_path: Option<PathBuf>,
    /// Step budget of the decision tree engine; raised to the node count for
    /// larger trees.
    pub max_traversal_steps: usize,
    /// Indicators computed per assessment. `WEIGHT_FOR_LENGTH` and
    /// `WEIGHT_FOR_HEIGHT` are one family resolved by age.
    pub nutrition_indicators: Vec<Indicator>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            database_path: None,
            max_traversal_steps: DEFAULT_MAX_TRAVERSAL_STEPS,
            nutrition_indicators: vec![
                Indicator::WeightForAge,
                Indicator::HeightForAge,
                Indicator::WeightForLength,
                Indicator::BmiForAge,
            ],
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if crate::logging::LogLevel::parse(&self.log_level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unsupported log_level `{}`",
                self.log_level
            )));
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir `{}` must be absolute",
                    dir.display()
                )));
            }
        }
        if !(1..=MAX_TRAVERSAL_STEPS_LIMIT).contains(&self.max_traversal_steps) {
            return Err(ConfigError::Invalid(format!(
                "max_traversal_steps must be within 1..={MAX_TRAVERSAL_STEPS_LIMIT}, got {}",
                self.max_traversal_steps
            )));
        }
        if self.nutrition_indicators.is_empty() {
            return Err(ConfigError::Invalid(
                "nutrition_indicators must not be empty".to_string(),
            ));
        }
        for (position, indicator) in self.nutrition_indicators.iter().enumerate() {
            if self.nutrition_indicators[..position]
                .iter()
                .any(|earlier| earlier.same_family(*indicator))
            {
                return Err(ConfigError::Invalid(format!(
                    "nutrition indicator {indicator} listed more than once"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use crate::model::growth::Indicator;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = CoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.max_traversal_steps, 256);
        assert_eq!(config.nutrition_indicators.len(), 4);
    }

    #[test]
    fn partial_document_overrides_selected_fields() {
        let config = CoreConfig::from_json_str(
            r#"{"max_traversal_steps": 32, "nutrition_indicators": ["WEIGHT_FOR_AGE"]}"#,
        )
        .unwrap();
        assert_eq!(config.max_traversal_steps, 32);
        assert_eq!(config.nutrition_indicators, vec![Indicator::WeightForAge]);
    }

    #[test]
    fn rejects_out_of_range_steps_and_duplicate_families() {
        let zero = CoreConfig::from_json_str(r#"{"max_traversal_steps": 0}"#).unwrap_err();
        assert!(matches!(zero, ConfigError::Invalid(_)));

        let duplicate = CoreConfig::from_json_str(
            r#"{"nutrition_indicators": ["WEIGHT_FOR_LENGTH", "WEIGHT_FOR_HEIGHT"]}"#,
        )
        .unwrap_err();
        assert!(matches!(duplicate, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_json() {
        assert!(matches!(
            CoreConfig::from_json_str(r#"{"max_steps": 3}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            CoreConfig::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"log_level": "warn"}}"#).unwrap();

        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "warn");

        let missing = CoreConfig::from_file(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
