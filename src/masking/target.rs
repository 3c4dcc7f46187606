use std::collections::HashSet;

use serde::Serialize;

use super::rule::{ConfiguredMaskRule, MaskParams};

/// Per-request masking context for one kind of data.
///
/// Built fresh for every request and never mutated afterwards; the `with_*`
/// builders consume the target and return a new one.
#[derive(Debug, Clone, Serialize)]
pub struct MaskingTarget {
    /// What the data belongs to (usually the feature code)
    pub subject_type: String,
    /// Sensitive-data category (e.g. "SSN", "PHONE")
    pub data_kind: String,
    /// Whether the resolved policy masks by default
    pub default_mask: bool,
    /// Blanket override: reveal everything
    pub force_unmask: bool,
    /// Data kinds revealed regardless of policy
    pub force_unmask_kinds: HashSet<String>,
    /// Field names revealed regardless of policy
    pub force_unmask_fields: HashSet<String>,
    /// Roles of the requester, copied into audit events
    pub requester_roles: Vec<String>,
    /// Row the value belongs to, copied into audit events
    pub row_id: Option<String>,
    /// Transform to apply when masking; `None` means use the caller's fallback
    pub mask_rule: Option<ConfiguredMaskRule>,
    /// Parameters for `mask_rule`
    pub mask_params: MaskParams,
    /// Whether override reveals are audited
    pub audit_enabled: bool,
    /// Free-text justification supplied with an override
    pub reason: Option<String>,
}

impl MaskingTarget {
    pub fn new(subject_type: impl Into<String>, data_kind: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            data_kind: data_kind.into(),
            default_mask: true,
            force_unmask: false,
            force_unmask_kinds: HashSet::new(),
            force_unmask_fields: HashSet::new(),
            requester_roles: Vec::new(),
            row_id: None,
            mask_rule: None,
            mask_params: MaskParams::default(),
            audit_enabled: true,
            reason: None,
        }
    }

    pub fn with_default_mask(mut self, default_mask: bool) -> Self {
        self.default_mask = default_mask;
        self
    }

    pub fn with_force_unmask(mut self, force_unmask: bool) -> Self {
        self.force_unmask = force_unmask;
        self
    }

    pub fn with_force_unmask_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_unmask_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_force_unmask_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_unmask_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requester_roles(mut self, roles: Vec<String>) -> Self {
        self.requester_roles = roles;
        self
    }

    pub fn with_row_id(mut self, row_id: impl Into<String>) -> Self {
        self.row_id = Some(row_id.into());
        self
    }

    pub fn with_mask_rule(mut self, rule: impl Into<ConfiguredMaskRule>) -> Self {
        self.mask_rule = Some(rule.into());
        self
    }

    pub fn with_mask_params(mut self, params: MaskParams) -> Self {
        self.mask_params = params;
        self
    }

    pub fn with_audit(mut self, audit_enabled: bool) -> Self {
        self.audit_enabled = audit_enabled;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Which override, if any, reveals `field_name` for this target.
    ///
    /// Checked in precedence order: blanket, data kind, field.
    pub fn override_for(&self, field_name: Option<&str>) -> Option<OverrideKind> {
        if self.force_unmask {
            return Some(OverrideKind::Blanket);
        }
        if self.force_unmask_kinds.contains(&self.data_kind) {
            return Some(OverrideKind::DataKind);
        }
        if let Some(field) = field_name
            && self.force_unmask_fields.contains(field)
        {
            return Some(OverrideKind::Field);
        }
        None
    }
}

/// The override path that revealed a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    Blanket,
    DataKind,
    Field,
}

impl std::fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideKind::Blanket => write!(f, "blanket"),
            OverrideKind::DataKind => write!(f, "data_kind"),
            OverrideKind::Field => write!(f, "field"),
        }
    }
}
