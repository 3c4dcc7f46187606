use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    authz::{ActionCode, DEFAULT_MAX_EXPRESSION_LENGTH},
    masking::{DEFAULT_FULL_SENTINEL, UnknownMaskRuleBehavior},
};

/// Permission group cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// How long a loaded permission group is served before reloading.
    /// Zero disables caching.
    #[serde(default = "default_permission_group_ttl_secs")]
    pub permission_group_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            permission_group_ttl_secs: default_permission_group_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn permission_group_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_group_ttl_secs)
    }
}

fn default_permission_group_ttl_secs() -> u64 {
    300
}

/// Field masking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaskingConfig {
    /// Replacement emitted by the FULL rule.
    #[serde(default = "default_full_sentinel")]
    pub full_sentinel: String,

    /// Fallback for tagged fields whose group rule has no `mask_with`.
    #[serde(default = "default_fallback")]
    pub default_fallback: String,

    /// Behavior when a policy names a rule this build does not know.
    #[serde(default)]
    pub unknown_rule: UnknownMaskRuleBehavior,

    /// Roles allowed to request force-unmask overrides.
    #[serde(default)]
    pub unmask_roles: Vec<String>,

    /// Subject types that are always masked. Force-unmask overrides do not
    /// apply to them and a `NONE` rule gives way to the fallback.
    #[serde(default)]
    pub always_masked_subject_types: Vec<String>,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            full_sentinel: default_full_sentinel(),
            default_fallback: default_fallback(),
            unknown_rule: UnknownMaskRuleBehavior::default(),
            unmask_roles: Vec::new(),
            always_masked_subject_types: Vec::new(),
        }
    }
}

fn default_full_sentinel() -> String {
    DEFAULT_FULL_SENTINEL.to_string()
}

fn default_fallback() -> String {
    "***".to_string()
}

/// Row-condition expression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowConditionConfig {
    /// Maximum expression length in bytes (0 = unlimited).
    #[serde(default = "default_max_expression_length")]
    pub max_expression_length: usize,
}

impl Default for RowConditionConfig {
    fn default() -> Self {
        Self {
            max_expression_length: default_max_expression_length(),
        }
    }
}

fn default_max_expression_length() -> usize {
    DEFAULT_MAX_EXPRESSION_LENGTH
}

/// Fallbacks applied when no data policy matches a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub unmatched_row_scope: UnmatchedRowScope,
}

/// Row scope used when no data policy matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedRowScope {
    /// Own rows only.
    #[default]
    Own,
    /// The group's `default_row_scope`. `CUSTOM` still narrows to own rows
    /// since there is no expression to evaluate.
    GroupDefault,
}

/// Maps an operation key to the permission it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Operation key, e.g. `customers.list`.
    pub route: String,
    pub feature: String,
    pub action: ActionCode,
}
