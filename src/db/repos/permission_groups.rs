use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{FieldMaskRule, PermissionAssignment, PermissionGroup},
};

/// Repository for permission groups.
///
/// Assignment and mask-rule collections are replaced whole, never patched, so
/// a concurrent reader sees either the previous set or the new one.
#[async_trait]
pub trait PermissionGroupRepo: Send + Sync {
    /// Get a group by its unique code.
    async fn get_by_code(&self, code: &str) -> DbResult<Option<PermissionGroup>>;

    /// Insert or replace a group, keyed by code.
    async fn upsert(&self, group: PermissionGroup) -> DbResult<PermissionGroup>;

    /// Replace the allowed `(feature, action)` set of an existing group.
    ///
    /// # Errors
    /// Returns `DbError::NotFound` if no group has this code.
    async fn replace_assignments(
        &self,
        code: &str,
        assignments: Vec<PermissionAssignment>,
    ) -> DbResult<PermissionGroup>;

    /// Replace the mask rules of an existing group.
    ///
    /// # Errors
    /// Returns `DbError::NotFound` if no group has this code.
    async fn replace_mask_rules(
        &self,
        code: &str,
        rules: Vec<FieldMaskRule>,
    ) -> DbResult<PermissionGroup>;

    /// All group codes, sorted.
    async fn list_codes(&self) -> DbResult<Vec<String>>;
}
