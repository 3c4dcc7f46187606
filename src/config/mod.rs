mod access;
mod observability;

use std::{collections::HashSet, path::Path};

pub use access::*;
pub use observability::*;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
///
/// Loaded from TOML. Environment variables can be referenced as `${VAR_NAME}`
/// anywhere outside a comment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessConfig {
    /// Permission group cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Field masking.
    #[serde(default)]
    pub masking: MaskingConfig,

    /// Row-condition expressions.
    #[serde(default)]
    pub row_conditions: RowConditionConfig,

    /// Behavior when no data policy matches.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Operation keys guarded by the route table.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl AccessConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: AccessConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.masking.full_sentinel.is_empty() {
            return Err(ConfigError::Validation(
                "masking.full_sentinel must not be empty".into(),
            ));
        }

        if self.masking.unmask_roles.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "masking.unmask_roles must not contain empty role names".into(),
            ));
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.route.trim().is_empty() {
                return Err(ConfigError::Validation("Route key must not be empty".into()));
            }
            if route.feature.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Route '{}' has an empty feature",
                    route.route
                )));
            }
            if !seen.insert(route.route.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate route '{}'",
                    route.route
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand `${VAR_NAME}` references, leaving anything after `#` untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
