use async_trait::async_trait;
use uuid::Uuid;

use crate::{db::error::DbResult, models::DataPolicy};

/// Repository for data policies.
#[async_trait]
pub trait DataPolicyRepo: Send + Sync {
    /// Active policies in ascending priority order.
    ///
    /// Ties keep insertion order. Effective windows are not applied here; the
    /// resolver checks them against the request time.
    async fn list_active(&self) -> DbResult<Vec<DataPolicy>>;

    /// Every stored policy, active or not, in insertion order.
    async fn list_all(&self) -> DbResult<Vec<DataPolicy>>;

    /// Get a policy by id.
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<DataPolicy>>;

    /// Insert or replace a policy, keyed by id. Replacing keeps the original
    /// insertion position.
    async fn upsert(&self, policy: DataPolicy) -> DbResult<DataPolicy>;
}
