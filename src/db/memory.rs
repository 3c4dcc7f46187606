//! In-memory repositories backed by a TOML policy document.
//!
//! ```toml
//! [[permission_groups]]
//! code = "ANALYST"
//! name = "Analyst"
//! assignments = [{ feature = "CUSTOMER", action = "READ" }]
//!
//! [[permission_groups.mask_rules]]
//! tag = "SSN"
//! audit = true
//!
//! [[data_policies]]
//! feature_code = "CUSTOMER"
//! perm_group_code = "ANALYST"
//! row_scope = "ORG"
//! default_mask_rule = "PARTIAL"
//! priority = 10
//! ```

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    error::{DbError, DbResult},
    repos::{DataPolicyRepo, PermissionGroupRepo},
};
use crate::models::{DataPolicy, FieldMaskRule, PermissionAssignment, PermissionGroup};

/// Groups and policies as authored in a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default)]
    pub permission_groups: Vec<PermissionGroup>,
    #[serde(default)]
    pub data_policies: Vec<DataPolicy>,
}

impl PolicyDocument {
    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> DbResult<Self> {
        let document: PolicyDocument = toml::from_str(content)?;
        document.validate()?;
        Ok(document)
    }

    /// Structural checks: unique group codes and policy ids, valid fields.
    ///
    /// Row expressions are not compiled here.
    pub fn validate(&self) -> DbResult<()> {
        let mut codes = HashSet::new();
        for group in &self.permission_groups {
            validator::Validate::validate(group)
                .map_err(|e| DbError::Validation(format!("Group '{}': {}", group.code, e)))?;
            if !codes.insert(group.code.as_str()) {
                return Err(DbError::Conflict(format!(
                    "Duplicate permission group code '{}'",
                    group.code
                )));
            }
        }

        let mut ids = HashSet::new();
        for policy in &self.data_policies {
            policy.check().map_err(DbError::Validation)?;
            if !ids.insert(policy.id) {
                return Err(DbError::Conflict(format!(
                    "Duplicate data policy id '{}'",
                    policy.id
                )));
            }
        }
        Ok(())
    }
}

/// Permission groups held in memory.
#[derive(Debug, Default)]
pub struct MemoryPermissionGroupRepo {
    groups: RwLock<BTreeMap<String, PermissionGroup>>,
}

impl MemoryPermissionGroupRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: impl IntoIterator<Item = PermissionGroup>) -> Self {
        let groups = groups
            .into_iter()
            .map(|group| (group.code.clone(), group))
            .collect();
        Self {
            groups: RwLock::new(groups),
        }
    }

    async fn update<F>(&self, code: &str, f: F) -> DbResult<PermissionGroup>
    where
        F: FnOnce(PermissionGroup) -> PermissionGroup,
    {
        let mut groups = self.groups.write().await;
        let current = groups.remove(code).ok_or(DbError::NotFound)?;
        let updated = f(current);
        groups.insert(updated.code.clone(), updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl PermissionGroupRepo for MemoryPermissionGroupRepo {
    async fn get_by_code(&self, code: &str) -> DbResult<Option<PermissionGroup>> {
        Ok(self.groups.read().await.get(code).cloned())
    }

    async fn upsert(&self, group: PermissionGroup) -> DbResult<PermissionGroup> {
        validator::Validate::validate(&group).map_err(|e| DbError::Validation(e.to_string()))?;
        self.groups
            .write()
            .await
            .insert(group.code.clone(), group.clone());
        Ok(group)
    }

    async fn replace_assignments(
        &self,
        code: &str,
        assignments: Vec<PermissionAssignment>,
    ) -> DbResult<PermissionGroup> {
        self.update(code, |group| group.replace_assignments(assignments))
            .await
    }

    async fn replace_mask_rules(
        &self,
        code: &str,
        rules: Vec<FieldMaskRule>,
    ) -> DbResult<PermissionGroup> {
        self.update(code, |group| group.replace_mask_rules(rules))
            .await
    }

    async fn list_codes(&self) -> DbResult<Vec<String>> {
        Ok(self.groups.read().await.keys().cloned().collect())
    }
}

/// Data policies held in memory, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryDataPolicyRepo {
    policies: RwLock<Vec<DataPolicy>>,
}

impl MemoryDataPolicyRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(policies: impl IntoIterator<Item = DataPolicy>) -> Self {
        Self {
            policies: RwLock::new(policies.into_iter().collect()),
        }
    }
}

#[async_trait]
impl DataPolicyRepo for MemoryDataPolicyRepo {
    async fn list_active(&self) -> DbResult<Vec<DataPolicy>> {
        let mut active: Vec<DataPolicy> = self
            .policies
            .read()
            .await
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect();
        // Stable: equal priorities keep insertion order
        active.sort_by_key(|p| p.priority);
        Ok(active)
    }

    async fn list_all(&self) -> DbResult<Vec<DataPolicy>> {
        Ok(self.policies.read().await.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<DataPolicy>> {
        Ok(self
            .policies
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn upsert(&self, policy: DataPolicy) -> DbResult<DataPolicy> {
        policy.check().map_err(DbError::Validation)?;
        let mut policies = self.policies.write().await;
        match policies.iter_mut().find(|p| p.id == policy.id) {
            Some(existing) => *existing = policy.clone(),
            None => policies.push(policy.clone()),
        }
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{authz::ActionCode, models::RowScope};

    const DOCUMENT: &str = r#"
        [[permission_groups]]
        code = "ANALYST"
        name = "Analyst"
        assignments = [{ feature = "CUSTOMER", action = "READ" }]

        [[permission_groups.mask_rules]]
        tag = "SSN"
        audit = true

        [[data_policies]]
        feature_code = "CUSTOMER"
        perm_group_code = "ANALYST"
        row_scope = "ORG"
        default_mask_rule = "PARTIAL"
        priority = 10

        [[data_policies]]
        feature_code = "CUSTOMER"
        row_scope = "OWN"
        priority = 100
    "#;

    #[test]
    fn test_document_parses() {
        let document = PolicyDocument::from_str(DOCUMENT).unwrap();
        assert_eq!(document.permission_groups.len(), 1);
        assert_eq!(document.data_policies.len(), 2);
        assert_eq!(document.data_policies[0].row_scope, RowScope::Org);
    }

    #[test]
    fn test_document_rejects_duplicate_codes() {
        let content = r#"
            [[permission_groups]]
            code = "ANALYST"
            name = "Analyst"

            [[permission_groups]]
            code = "ANALYST"
            name = "Analyst again"
        "#;
        assert!(matches!(
            PolicyDocument::from_str(content),
            Err(DbError::Conflict(_))
        ));
    }

    #[test]
    fn test_document_rejects_custom_scope_without_expression() {
        let content = r#"
            [[data_policies]]
            feature_code = "CUSTOMER"
            row_scope = "CUSTOM"
            priority = 1
        "#;
        assert!(matches!(
            PolicyDocument::from_str(content),
            Err(DbError::Validation(_))
        ));
    }

    #[test]
    fn test_document_rejects_unknown_fields() {
        let content = r#"
            [[data_policies]]
            feature_code = "CUSTOMER"
            priority = 1
            specificity = 3
        "#;
        assert!(matches!(
            PolicyDocument::from_str(content),
            Err(DbError::Parse(_))
        ));
    }

    #[test]
    fn test_document_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.toml");
        std::fs::write(&path, DOCUMENT).unwrap();
        let document = PolicyDocument::from_file(&path).unwrap();
        assert_eq!(document.permission_groups[0].code, "ANALYST");

        assert!(matches!(
            PolicyDocument::from_file(dir.path().join("missing.toml")),
            Err(DbError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_group_replace_operations() {
        let repo = MemoryPermissionGroupRepo::with_groups([PermissionGroup::new(
            "ANALYST", "Analyst",
        )
        .with_assignment("CUSTOMER", ActionCode::Read)]);

        let updated = repo
            .replace_assignments(
                "ANALYST",
                vec![PermissionAssignment::new("ORDER", ActionCode::Export)],
            )
            .await
            .unwrap();
        assert!(updated.find_assignment("CUSTOMER", ActionCode::Read).is_none());

        let stored = repo.get_by_code("ANALYST").await.unwrap().unwrap();
        assert_eq!(stored, updated);

        let err = repo.replace_mask_rules("MISSING", vec![]).await;
        assert!(matches!(err, Err(DbError::NotFound)));
        assert_eq!(repo.list_codes().await.unwrap(), vec!["ANALYST".to_string()]);
    }

    #[tokio::test]
    async fn test_list_active_sorts_stably_and_skips_inactive() {
        let first = DataPolicy::new("CUSTOMER", 10);
        let second = DataPolicy::new("CUSTOMER", 10);
        let early = DataPolicy::new("CUSTOMER", 1);
        let inactive = DataPolicy::new("CUSTOMER", 0).with_active(false);
        let repo = MemoryDataPolicyRepo::with_policies([
            first.clone(),
            second.clone(),
            early.clone(),
            inactive.clone(),
        ]);

        let ids: Vec<Uuid> = repo
            .list_active()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![early.id, first.id, second.id]);
        assert_eq!(repo.list_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_policy_upsert_replaces_in_place() {
        let policy = DataPolicy::new("CUSTOMER", 10);
        let repo = MemoryDataPolicyRepo::with_policies([policy.clone(), DataPolicy::new("ORDER", 5)]);

        repo.upsert(policy.clone().with_row_scope(RowScope::All))
            .await
            .unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, policy.id);
        assert_eq!(all[0].row_scope, RowScope::All);

        let invalid = DataPolicy::new("CUSTOMER", 1).with_row_scope(RowScope::Custom);
        assert!(matches!(
            repo.upsert(invalid).await,
            Err(DbError::Validation(_))
        ));
    }
}
