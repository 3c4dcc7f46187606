use serde::{Deserialize, Serialize};

/// Action an actor performs on a feature.
///
/// The set is closed: adding an action is a compile-time change that forces
/// every exhaustive `match` below to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCode {
    Read,
    Create,
    Update,
    Delete,
    Export,
    Approve,
    /// Universal override: may see everything that is masked.
    Unmask,
}

impl ActionCode {
    pub const ALL: [ActionCode; 7] = [
        ActionCode::Read,
        ActionCode::Create,
        ActionCode::Update,
        ActionCode::Delete,
        ActionCode::Export,
        ActionCode::Approve,
        ActionCode::Unmask,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionCode::Read => "READ",
            ActionCode::Create => "CREATE",
            ActionCode::Update => "UPDATE",
            ActionCode::Delete => "DELETE",
            ActionCode::Export => "EXPORT",
            ActionCode::Approve => "APPROVE",
            ActionCode::Unmask => "UNMASK",
        }
    }

    /// Whether performing `self` satisfies a `required` action.
    ///
    /// No requirement is always satisfied, `Unmask` satisfies every requirement,
    /// and every other action satisfies only itself. This relation gates
    /// mask-rule overrides; the allow/deny gate uses exact assignment membership.
    pub fn satisfies(self, required: Option<ActionCode>) -> bool {
        let Some(required) = required else {
            return true;
        };
        match self {
            ActionCode::Unmask => true,
            ActionCode::Read
            | ActionCode::Create
            | ActionCode::Update
            | ActionCode::Delete
            | ActionCode::Export
            | ActionCode::Approve => self == required,
        }
    }
}

impl std::fmt::Display for ActionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READ" => Ok(ActionCode::Read),
            "CREATE" => Ok(ActionCode::Create),
            "UPDATE" => Ok(ActionCode::Update),
            "DELETE" => Ok(ActionCode::Delete),
            "EXPORT" => Ok(ActionCode::Export),
            "APPROVE" => Ok(ActionCode::Approve),
            "UNMASK" => Ok(ActionCode::Unmask),
            _ => Err(format!("Invalid action code: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_no_requirement_is_always_satisfied() {
        for action in ActionCode::ALL {
            assert!(action.satisfies(None), "{action} should satisfy no requirement");
        }
    }

    #[test]
    fn test_unmask_satisfies_everything() {
        for required in ActionCode::ALL {
            assert!(ActionCode::Unmask.satisfies(Some(required)));
        }
    }

    #[rstest]
    #[case(ActionCode::Read, ActionCode::Read, true)]
    #[case(ActionCode::Read, ActionCode::Export, false)]
    #[case(ActionCode::Export, ActionCode::Read, false)]
    #[case(ActionCode::Read, ActionCode::Unmask, false)]
    #[case(ActionCode::Approve, ActionCode::Approve, true)]
    fn test_other_actions_satisfy_only_themselves(
        #[case] action: ActionCode,
        #[case] required: ActionCode,
        #[case] expected: bool,
    ) {
        assert_eq!(action.satisfies(Some(required)), expected);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("read".parse::<ActionCode>().unwrap(), ActionCode::Read);
        assert_eq!(" Unmask ".parse::<ActionCode>().unwrap(), ActionCode::Unmask);
        assert!("PURGE".parse::<ActionCode>().is_err());
    }

    #[test]
    fn test_serde_uses_upper_case() {
        let json = serde_json::to_string(&ActionCode::Export).unwrap();
        assert_eq!(json, "\"EXPORT\"");
        let parsed: ActionCode = serde_json::from_str("\"APPROVE\"").unwrap();
        assert_eq!(parsed, ActionCode::Approve);
    }
}
