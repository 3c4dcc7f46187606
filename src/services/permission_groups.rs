use std::sync::Arc;

use crate::{
    cache::PermissionGroupCache,
    db::{DbResult, repos::PermissionGroupRepo},
    models::{FieldMaskRule, PermissionAssignment, PermissionGroup},
};

/// Service layer for permission group administration.
///
/// Every successful write evicts the group from the decision cache, so the
/// change is visible to the next access check on this node instead of after
/// the cache TTL.
#[derive(Clone)]
pub struct PermissionGroupService {
    repo: Arc<dyn PermissionGroupRepo>,
    cache: Arc<PermissionGroupCache>,
}

impl PermissionGroupService {
    pub fn new(repo: Arc<dyn PermissionGroupRepo>, cache: Arc<PermissionGroupCache>) -> Self {
        Self { repo, cache }
    }

    /// Get a group straight from the store, bypassing the cache.
    pub async fn get(&self, code: &str) -> DbResult<Option<PermissionGroup>> {
        self.repo.get_by_code(code).await
    }

    pub async fn list_codes(&self) -> DbResult<Vec<String>> {
        self.repo.list_codes().await
    }

    /// Create or replace a group.
    pub async fn upsert(&self, group: PermissionGroup) -> DbResult<PermissionGroup> {
        let group = self.repo.upsert(group).await?;
        self.invalidate(&group.code);
        Ok(group)
    }

    /// Replace the full set of `(feature, action)` pairs held by a group.
    ///
    /// # Errors
    /// `DbError::NotFound` if the group does not exist.
    pub async fn replace_assignments(
        &self,
        code: &str,
        assignments: Vec<PermissionAssignment>,
    ) -> DbResult<PermissionGroup> {
        let group = self.repo.replace_assignments(code, assignments).await?;
        self.invalidate(code);
        Ok(group)
    }

    /// Replace the field mask rules of a group.
    ///
    /// # Errors
    /// `DbError::NotFound` if the group does not exist.
    pub async fn replace_mask_rules(
        &self,
        code: &str,
        rules: Vec<FieldMaskRule>,
    ) -> DbResult<PermissionGroup> {
        let group = self.repo.replace_mask_rules(code, rules).await?;
        self.invalidate(code);
        Ok(group)
    }

    fn invalidate(&self, code: &str) {
        self.cache.evict(code);
        tracing::info!(group = %code, "Permission group updated");
    }
}

impl std::fmt::Debug for PermissionGroupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGroupService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
