use std::sync::Arc;

use super::{
    ActionCode,
    error::{AccessError, DenialReason},
};
use crate::{
    cache::PermissionGroupCache,
    models::{PermissionAssignment, PermissionGroup},
};

/// Allow/deny gate on exact `(feature, action)` membership.
///
/// There is no action hierarchy here: holding `UNMASK` on a feature does not
/// grant `READ` on it. The hierarchy in [`ActionCode::satisfies`] applies to
/// mask-rule overrides only.
#[derive(Debug, Clone)]
pub struct PermissionDecisionEngine {
    cache: Arc<PermissionGroupCache>,
}

impl PermissionDecisionEngine {
    pub fn new(cache: Arc<PermissionGroupCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<PermissionGroupCache> {
        &self.cache
    }

    /// Check that `group_code` holds `(feature, action)`.
    ///
    /// # Errors
    /// - `PermissionDenied(GroupNotFound)` for an unknown group
    /// - `PermissionDenied(InsufficientPermission)` when the pair is absent
    /// - `Store` when the group could not be loaded; the caller must deny
    pub async fn evaluate(
        &self,
        group_code: &str,
        feature: &str,
        action: ActionCode,
    ) -> Result<PermissionAssignment, AccessError> {
        let group = self.load_group(group_code).await?;
        self.evaluate_group(&group, feature, action)
    }

    /// Load a group through the cache.
    pub async fn load_group(&self, group_code: &str) -> Result<Arc<PermissionGroup>, AccessError> {
        self.cache.get_or_throw(group_code).await.map_err(|e| {
            let err = AccessError::from(e);
            if err.is_denial() {
                tracing::debug!(group = %group_code, "Permission group not found");
            } else {
                tracing::warn!(group = %group_code, error = %err, "Failed to load permission group");
            }
            err
        })
    }

    /// Check membership against an already loaded group.
    pub fn evaluate_group(
        &self,
        group: &PermissionGroup,
        feature: &str,
        action: ActionCode,
    ) -> Result<PermissionAssignment, AccessError> {
        match group.find_assignment(feature, action) {
            Some(assignment) => Ok(assignment.clone()),
            None => {
                tracing::debug!(
                    group = %group.code,
                    feature = %feature,
                    action = %action,
                    "Permission denied"
                );
                Err(AccessError::denied(DenialReason::InsufficientPermission {
                    feature: feature.to_string(),
                    action,
                }))
            }
        }
    }
}
