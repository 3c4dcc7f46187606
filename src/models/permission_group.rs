use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::RowScope;
use crate::authz::ActionCode;

/// One allowed `(feature, action)` pair of a permission group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionAssignment {
    pub feature: String,
    pub action: ActionCode,
}

impl PermissionAssignment {
    pub fn new(feature: impl Into<String>, action: ActionCode) -> Self {
        Self {
            feature: feature.into(),
            action,
        }
    }
}

/// Masking rule for one sensitive-data category within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FieldMaskRule {
    /// Sensitive-data category (e.g. "SSN")
    #[validate(length(min = 1, max = 64))]
    pub tag: String,
    /// Replacement literal shown instead of the raw value
    #[serde(default = "default_mask_with")]
    pub mask_with: String,
    /// Action needed to see the raw value
    #[serde(default = "default_required_action")]
    pub required_action: ActionCode,
    /// Whether revealing the raw value is audited
    #[serde(default)]
    pub audit: bool,
}

fn default_mask_with() -> String {
    "***".to_string()
}

fn default_required_action() -> ActionCode {
    ActionCode::Unmask
}

impl FieldMaskRule {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            mask_with: default_mask_with(),
            required_action: default_required_action(),
            audit: false,
        }
    }

    pub fn with_mask_with(mut self, mask_with: impl Into<String>) -> Self {
        self.mask_with = mask_with.into();
        self
    }

    pub fn with_required_action(mut self, action: ActionCode) -> Self {
        self.required_action = action;
        self
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }
}

/// A named set of allowed actions plus per-tag masking rules.
///
/// Read-mostly at decision time. Collections are only ever replaced whole,
/// so readers observe either the old or the new set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PermissionGroup {
    /// Unique group code (e.g. "ANALYST")
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    /// Display name
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allow-list of exact `(feature, action)` pairs
    #[serde(default)]
    pub assignments: BTreeSet<PermissionAssignment>,
    /// Masking rules keyed by tag
    #[serde(default, with = "mask_rules_as_list")]
    pub mask_rules: BTreeMap<String, FieldMaskRule>,
    /// Row scope when no data policy matches
    #[serde(default)]
    pub default_row_scope: RowScope,
}

impl PermissionGroup {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            assignments: BTreeSet::new(),
            mask_rules: BTreeMap::new(),
            default_row_scope: RowScope::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_assignment(mut self, feature: impl Into<String>, action: ActionCode) -> Self {
        self.assignments
            .insert(PermissionAssignment::new(feature, action));
        self
    }

    pub fn with_mask_rule(mut self, rule: FieldMaskRule) -> Self {
        self.mask_rules.insert(rule.tag.clone(), rule);
        self
    }

    pub fn with_default_row_scope(mut self, scope: RowScope) -> Self {
        self.default_row_scope = scope;
        self
    }

    /// Replace the whole assignment set.
    pub fn replace_assignments(
        mut self,
        assignments: impl IntoIterator<Item = PermissionAssignment>,
    ) -> Self {
        self.assignments = assignments.into_iter().collect();
        self
    }

    /// Replace the whole mask-rule set. Later rules win on duplicate tags.
    pub fn replace_mask_rules(mut self, rules: impl IntoIterator<Item = FieldMaskRule>) -> Self {
        self.mask_rules = rules
            .into_iter()
            .map(|rule| (rule.tag.clone(), rule))
            .collect();
        self
    }

    /// Exact membership; no wildcards, no action hierarchy.
    pub fn find_assignment(&self, feature: &str, action: ActionCode) -> Option<&PermissionAssignment> {
        self.assignments
            .iter()
            .find(|a| a.feature == feature && a.action == action)
    }

    pub fn mask_rule(&self, tag: &str) -> Option<&FieldMaskRule> {
        self.mask_rules.get(tag)
    }
}

/// Mask rules are authored as a list and stored keyed by tag.
mod mask_rules_as_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::FieldMaskRule;

    pub fn serialize<S: Serializer>(
        rules: &BTreeMap<String, FieldMaskRule>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&FieldMaskRule> = rules.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, FieldMaskRule>, D::Error> {
        let list = Vec::<FieldMaskRule>::deserialize(deserializer)?;
        Ok(list
            .into_iter()
            .map(|rule| (rule.tag.clone(), rule))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyst() -> PermissionGroup {
        PermissionGroup::new("ANALYST", "Analyst")
            .with_assignment("CUSTOMER", ActionCode::Read)
            .with_mask_rule(FieldMaskRule::new("SSN").with_audit(true))
    }

    #[test]
    fn test_duplicate_assignments_collapse() {
        let group = analyst().with_assignment("CUSTOMER", ActionCode::Read);
        assert_eq!(group.assignments.len(), 1);
    }

    #[test]
    fn test_find_assignment_is_exact() {
        let group = analyst();
        assert!(group.find_assignment("CUSTOMER", ActionCode::Read).is_some());
        assert!(group.find_assignment("CUSTOMER", ActionCode::Export).is_none());
        assert!(group.find_assignment("customer", ActionCode::Read).is_none());
        // Unmask is not a wildcard at this layer
        let group = group.with_assignment("ORDER", ActionCode::Unmask);
        assert!(group.find_assignment("ORDER", ActionCode::Read).is_none());
    }

    #[test]
    fn test_replace_operations_swap_whole_collections() {
        let group = analyst()
            .replace_assignments([PermissionAssignment::new("ORDER", ActionCode::Export)])
            .replace_mask_rules([FieldMaskRule::new("PHONE").with_mask_with("###")]);

        assert_eq!(group.assignments.len(), 1);
        assert!(group.find_assignment("CUSTOMER", ActionCode::Read).is_none());
        assert!(group.mask_rule("SSN").is_none());
        assert_eq!(group.mask_rule("PHONE").unwrap().mask_with, "###");
    }

    #[test]
    fn test_field_mask_rule_defaults() {
        let rule: FieldMaskRule = toml::from_str(r#"tag = "SSN""#).unwrap();
        assert_eq!(rule.mask_with, "***");
        assert_eq!(rule.required_action, ActionCode::Unmask);
        assert!(!rule.audit);
    }

    #[test]
    fn test_deserialize_group_from_toml() {
        let group: PermissionGroup = toml::from_str(
            r#"
            code = "ANALYST"
            name = "Analyst"
            default_row_scope = "ORG"
            assignments = [{ feature = "CUSTOMER", action = "READ" }]

            [[mask_rules]]
            tag = "SSN"
            audit = true
            "#,
        )
        .unwrap();

        assert_eq!(group.default_row_scope, RowScope::Org);
        assert!(group.find_assignment("CUSTOMER", ActionCode::Read).is_some());
        assert!(group.mask_rule("SSN").unwrap().audit);
    }

    #[test]
    fn test_validation_rejects_empty_code() {
        let group = PermissionGroup::new("", "Nameless");
        assert!(group.validate().is_err());
        assert!(analyst().validate().is_ok());
    }
}
