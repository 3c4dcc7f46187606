use std::collections::HashSet;

use super::target::MaskingTarget;

/// Decides whether a target is masked when no override applies.
pub trait MaskingStrategy: Send + Sync {
    fn should_mask(&self, target: &MaskingTarget) -> bool;

    /// Targets that stay masked even when an override asks for the raw
    /// value or the configured rule would leave it unchanged.
    fn always_masks(&self, _target: &MaskingTarget) -> bool {
        false
    }
}

/// Policy-driven strategy.
///
/// Masks when the resolved policy masks by default and its rule is not `NONE`.
/// Subject types listed in `always_masked_subject_types` are masked even when
/// the policy would not, and overrides never reveal them.
#[derive(Debug, Clone, Default)]
pub struct PolicyMaskingStrategy {
    always_masked_subject_types: HashSet<String>,
}

impl PolicyMaskingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_always_masked_subject_types<I, S>(mut self, subject_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.always_masked_subject_types = subject_types.into_iter().map(Into::into).collect();
        self
    }
}

impl MaskingStrategy for PolicyMaskingStrategy {
    fn should_mask(&self, target: &MaskingTarget) -> bool {
        if self.always_masks(target) {
            return true;
        }
        let rule_masks = target.mask_rule.as_ref().is_none_or(|rule| !rule.is_none());
        target.default_mask && rule_masks
    }

    fn always_masks(&self, target: &MaskingTarget) -> bool {
        self.always_masked_subject_types
            .contains(&target.subject_type)
    }
}
