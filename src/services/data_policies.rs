use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    authz::{AccessError, RowConditionEvaluator},
    db::{DbError, DbResult, repos::DataPolicyRepo},
    models::DataPolicy,
};

/// Service layer for data policy administration.
///
/// Policies are checked and their row conditions compiled before they are
/// stored, so a malformed policy is rejected at save time rather than failing
/// closed on every request it would match.
#[derive(Clone)]
pub struct DataPolicyService {
    repo: Arc<dyn DataPolicyRepo>,
    row_conditions: Arc<RowConditionEvaluator>,
}

impl DataPolicyService {
    pub fn new(repo: Arc<dyn DataPolicyRepo>, row_conditions: Arc<RowConditionEvaluator>) -> Self {
        Self {
            repo,
            row_conditions,
        }
    }

    /// Validate and store a policy, replacing any policy with the same id.
    ///
    /// # Errors
    /// - `InvalidPolicy` for structural problems (empty feature, CUSTOM
    ///   scope without an expression, inverted window)
    /// - `InvalidCondition` if the row expression does not compile
    pub async fn save(&self, policy: DataPolicy) -> Result<DataPolicy, DataPolicyError> {
        self.validate(&policy)?;
        let policy = self.repo.upsert(policy).await?;
        tracing::info!(
            policy_id = %policy.id,
            feature = %policy.feature_code,
            priority = policy.priority,
            "Data policy saved"
        );
        Ok(policy)
    }

    /// Run every save-time check without storing.
    pub fn validate(&self, policy: &DataPolicy) -> Result<(), DataPolicyError> {
        policy.check().map_err(DataPolicyError::InvalidPolicy)?;

        if let Some(expr) = policy.row_scope_expr.as_deref()
            && !expr.trim().is_empty()
        {
            self.row_conditions.compile(expr)?;
        }
        Ok(())
    }

    /// Mark a policy inactive. Inactive policies never match.
    pub async fn deactivate(&self, id: Uuid) -> Result<DataPolicy, DataPolicyError> {
        let policy = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(DataPolicyError::NotFound)?;
        let policy = self.repo.upsert(policy.with_active(false)).await?;
        tracing::info!(policy_id = %id, "Data policy deactivated");
        Ok(policy)
    }

    pub async fn get_by_id(&self, id: Uuid) -> DbResult<Option<DataPolicy>> {
        self.repo.get_by_id(id).await
    }

    /// Active policies in evaluation order.
    pub async fn list_active(&self) -> DbResult<Vec<DataPolicy>> {
        self.repo.list_active().await
    }

    pub async fn list_all(&self) -> DbResult<Vec<DataPolicy>> {
        self.repo.list_all().await
    }
}

impl std::fmt::Debug for DataPolicyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPolicyService").finish_non_exhaustive()
    }
}

/// Errors that can occur during data policy operations.
#[derive(Debug, Error)]
pub enum DataPolicyError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid data policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid row condition: {0}")]
    InvalidCondition(String),

    #[error("Data policy not found")]
    NotFound,
}

impl From<AccessError> for DataPolicyError {
    fn from(e: AccessError) -> Self {
        DataPolicyError::InvalidCondition(e.to_string())
    }
}

impl From<DataPolicyError> for AccessError {
    fn from(e: DataPolicyError) -> Self {
        match e {
            DataPolicyError::Database(e) => AccessError::from(e),
            DataPolicyError::InvalidPolicy(msg) | DataPolicyError::InvalidCondition(msg) => {
                AccessError::PolicyConfiguration(msg)
            }
            DataPolicyError::NotFound => AccessError::Store("Data policy not found".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::MemoryDataPolicyRepo,
        models::RowScope,
    };

    fn service() -> DataPolicyService {
        DataPolicyService::new(
            Arc::new(MemoryDataPolicyRepo::new()),
            Arc::new(RowConditionEvaluator::default()),
        )
    }

    #[tokio::test]
    async fn test_save_and_list() {
        let service = service();
        service
            .save(DataPolicy::new("CUSTOMER", 20).with_row_scope(RowScope::Org))
            .await
            .unwrap();
        service.save(DataPolicy::new("CUSTOMER", 10)).await.unwrap();

        let active = service.list_active().await.unwrap();
        assert_eq!(
            active.iter().map(|p| p.priority).collect::<Vec<_>>(),
            vec![10, 20]
        );
    }

    #[tokio::test]
    async fn test_custom_scope_without_expression_is_rejected() {
        let service = service();
        let result = service
            .save(DataPolicy::new("CUSTOMER", 10).with_row_scope(RowScope::Custom))
            .await;
        assert!(matches!(result, Err(DataPolicyError::InvalidPolicy(_))));
        assert!(service.list_all().await.unwrap().is_empty());
    }

    #[cfg(feature = "cel")]
    #[tokio::test]
    async fn test_malformed_expression_is_rejected_at_save() {
        let service = service();
        let result = service
            .save(
                DataPolicy::new("CUSTOMER", 10)
                    .with_row_scope(RowScope::Custom)
                    .with_row_scope_expr("org_code == "),
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, DataPolicyError::InvalidCondition(_)));
        assert!(AccessError::from(err).is_configuration());
        assert!(service.list_all().await.unwrap().is_empty());
    }

    #[cfg(feature = "cel")]
    #[tokio::test]
    async fn test_valid_expression_is_compiled_and_cached() {
        let service = service();
        service
            .save(
                DataPolicy::new("CUSTOMER", 10)
                    .with_row_scope(RowScope::Custom)
                    .with_row_scope_expr("org_code == 'HQ'"),
            )
            .await
            .unwrap();
        assert_eq!(service.row_conditions.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate() {
        let service = service();
        let policy = service.save(DataPolicy::new("CUSTOMER", 10)).await.unwrap();

        let deactivated = service.deactivate(policy.id).await.unwrap();
        assert!(!deactivated.active);
        assert!(service.list_active().await.unwrap().is_empty());
        assert_eq!(service.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_unknown_policy() {
        let service = service();
        let result = service.deactivate(Uuid::new_v4()).await;
        assert!(matches!(result, Err(DataPolicyError::NotFound)));
    }
}
