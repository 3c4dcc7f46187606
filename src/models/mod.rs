mod data_policy;
mod permission_group;

pub use data_policy::*;
pub use permission_group::*;
use serde::{Deserialize, Serialize};

/// Which rows a caller may see.
///
/// `Own` is the most restrictive scope and the safe default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowScope {
    #[default]
    Own,
    Org,
    All,
    /// Narrowed further by a row condition expression
    Custom,
}

impl RowScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RowScope::Own => "OWN",
            RowScope::Org => "ORG",
            RowScope::All => "ALL",
            RowScope::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for RowScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RowScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OWN" => Ok(RowScope::Own),
            "ORG" => Ok(RowScope::Org),
            "ALL" => Ok(RowScope::All),
            "CUSTOM" => Ok(RowScope::Custom),
            _ => Err(format!("Invalid row scope: {}", s)),
        }
    }
}
