use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::RowScope;
use crate::{
    authz::ActionCode,
    masking::{ConfiguredMaskRule, MaskParams},
};

/// Row-scope and mask-rule policy.
///
/// Every optional dimension (`action_code`, `perm_group_code`, `org_policy_id`,
/// `org_group_code`, `business_type`) is a wildcard when absent. Policies are
/// tried in ascending `priority` order and the first match wins; there is no
/// automatic specificity scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DataPolicy {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[validate(length(min = 1, max = 128))]
    pub feature_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_code: Option<ActionCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perm_group_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_policy_id: Option<String>,
    /// Matched case-insensitively against the request's org groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_group_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_type: Option<String>,
    #[serde(default)]
    pub row_scope: RowScope,
    /// Row condition; required iff `row_scope` is `CUSTOM`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_scope_expr: Option<String>,
    #[serde(default)]
    pub default_mask_rule: ConfiguredMaskRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_params: Option<MaskParams>,
    /// Action that reveals masked values under this policy
    #[serde(default = "default_required_action")]
    pub required_action_code: Option<ActionCode>,
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    /// Lower value wins
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Inclusive start of the effective window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    /// Exclusive end of the effective window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
}

fn default_required_action() -> Option<ActionCode> {
    Some(ActionCode::Unmask)
}

fn default_true() -> bool {
    true
}

impl DataPolicy {
    pub fn new(feature_code: impl Into<String>, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature_code: feature_code.into(),
            action_code: None,
            perm_group_code: None,
            org_policy_id: None,
            org_group_code: None,
            business_type: None,
            row_scope: RowScope::default(),
            row_scope_expr: None,
            default_mask_rule: ConfiguredMaskRule::default(),
            mask_params: None,
            required_action_code: default_required_action(),
            audit_enabled: true,
            priority,
            active: true,
            effective_from: None,
            effective_to: None,
        }
    }

    pub fn with_action(mut self, action: ActionCode) -> Self {
        self.action_code = Some(action);
        self
    }

    pub fn with_perm_group(mut self, code: impl Into<String>) -> Self {
        self.perm_group_code = Some(code.into());
        self
    }

    pub fn with_org_policy(mut self, id: impl Into<String>) -> Self {
        self.org_policy_id = Some(id.into());
        self
    }

    pub fn with_org_group(mut self, code: impl Into<String>) -> Self {
        self.org_group_code = Some(code.into());
        self
    }

    pub fn with_business_type(mut self, business_type: impl Into<String>) -> Self {
        self.business_type = Some(business_type.into());
        self
    }

    pub fn with_row_scope(mut self, scope: RowScope) -> Self {
        self.row_scope = scope;
        self
    }

    pub fn with_row_scope_expr(mut self, expr: impl Into<String>) -> Self {
        self.row_scope_expr = Some(expr.into());
        self
    }

    pub fn with_mask_rule(mut self, rule: impl Into<ConfiguredMaskRule>) -> Self {
        self.default_mask_rule = rule.into();
        self
    }

    pub fn with_mask_params(mut self, params: MaskParams) -> Self {
        self.mask_params = Some(params);
        self
    }

    pub fn with_required_action(mut self, action: Option<ActionCode>) -> Self {
        self.required_action_code = action;
        self
    }

    pub fn with_audit(mut self, audit_enabled: bool) -> Self {
        self.audit_enabled = audit_enabled;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_window(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.effective_from = from;
        self.effective_to = to;
        self
    }

    /// Active and inside `[effective_from, effective_to)` at `at`.
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.active
            && self.effective_from.is_none_or(|from| at >= from)
            && self.effective_to.is_none_or(|to| at < to)
    }

    /// Structural checks beyond field validation.
    ///
    /// Row expressions are compiled separately by the row-condition evaluator.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())?;

        let has_expr = self
            .row_scope_expr
            .as_deref()
            .is_some_and(|expr| !expr.trim().is_empty());
        if self.row_scope == RowScope::Custom && !has_expr {
            return Err(format!(
                "Policy {}: row_scope CUSTOM requires row_scope_expr",
                self.id
            ));
        }
        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to)
            && from >= to
        {
            return Err(format!(
                "Policy {}: effective_from must be before effective_to",
                self.id
            ));
        }
        Ok(())
    }
}

/// Result of policy resolution for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPolicyMatch {
    pub policy_id: Uuid,
    pub row_scope: RowScope,
    pub row_scope_expr: Option<String>,
    pub mask_rule: ConfiguredMaskRule,
    pub mask_params: MaskParams,
    pub required_action_code: Option<ActionCode>,
    pub audit_enabled: bool,
    pub priority: i32,
}

impl From<&DataPolicy> for DataPolicyMatch {
    fn from(policy: &DataPolicy) -> Self {
        Self {
            policy_id: policy.id,
            row_scope: policy.row_scope,
            row_scope_expr: policy.row_scope_expr.clone(),
            mask_rule: policy.default_mask_rule.clone(),
            mask_params: policy.mask_params.clone().unwrap_or_default(),
            required_action_code: policy.required_action_code,
            audit_enabled: policy.audit_enabled,
            priority: policy.priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::masking::MaskRule;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let policy =
            DataPolicy::new("CUSTOMER", 10).with_window(Some(t0()), Some(t0() + Duration::seconds(60)));

        assert!(policy.is_effective_at(t0()));
        assert!(policy.is_effective_at(t0() + Duration::seconds(59)));
        assert!(!policy.is_effective_at(t0() - Duration::seconds(1)));
        assert!(!policy.is_effective_at(t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_open_bounds_are_unbounded() {
        let policy = DataPolicy::new("CUSTOMER", 10);
        assert!(policy.is_effective_at(t0()));

        let from_only = policy.clone().with_window(Some(t0()), None);
        assert!(from_only.is_effective_at(t0() + Duration::days(10_000)));
        assert!(!from_only.is_effective_at(t0() - Duration::seconds(1)));

        let to_only = policy.with_window(None, Some(t0()));
        assert!(to_only.is_effective_at(t0() - Duration::days(10_000)));
        assert!(!to_only.is_effective_at(t0()));
    }

    #[test]
    fn test_inactive_is_never_effective() {
        let policy = DataPolicy::new("CUSTOMER", 10).with_active(false);
        assert!(!policy.is_effective_at(t0()));
        assert!(!policy.is_effective_at(Utc::now()));
    }

    #[test]
    fn test_custom_scope_requires_expression() {
        let policy = DataPolicy::new("CUSTOMER", 10).with_row_scope(RowScope::Custom);
        assert!(policy.check().is_err());

        let policy = policy.with_row_scope_expr("   ");
        assert!(policy.check().is_err());

        let policy = policy.with_row_scope_expr("org_code == 'HQ'");
        assert!(policy.check().is_ok());
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let policy = DataPolicy::new("CUSTOMER", 10).with_window(Some(t0()), Some(t0()));
        assert!(policy.check().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: DataPolicy = toml::from_str(
            r#"
            feature_code = "CUSTOMER"
            action_code = "READ"
            row_scope = "ORG"
            default_mask_rule = "partial"
            priority = 50
            "#,
        )
        .unwrap();

        assert_eq!(policy.action_code, Some(ActionCode::Read));
        assert_eq!(policy.row_scope, RowScope::Org);
        assert_eq!(
            policy.default_mask_rule,
            ConfiguredMaskRule::Known(MaskRule::Partial)
        );
        assert_eq!(policy.required_action_code, Some(ActionCode::Unmask));
        assert!(policy.active);
        assert!(policy.audit_enabled);
    }

    #[test]
    fn test_match_from_policy() {
        let policy = DataPolicy::new("CUSTOMER", 10)
            .with_row_scope(RowScope::Own)
            .with_mask_rule(MaskRule::None);
        let matched = DataPolicyMatch::from(&policy);
        assert_eq!(matched.policy_id, policy.id);
        assert_eq!(matched.row_scope, RowScope::Own);
        assert_eq!(matched.mask_rule, ConfiguredMaskRule::Known(MaskRule::None));
        assert_eq!(matched.priority, 10);
    }
}
