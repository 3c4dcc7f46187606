mod error;
pub mod memory;
pub mod repos;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use memory::{MemoryDataPolicyRepo, MemoryPermissionGroupRepo, PolicyDocument};
pub use repos::*;

/// Repository trait objects shared by the decision components.
#[derive(Clone)]
pub struct PolicyStore {
    permission_groups: Arc<dyn PermissionGroupRepo>,
    data_policies: Arc<dyn DataPolicyRepo>,
}

impl PolicyStore {
    pub fn new(
        permission_groups: Arc<dyn PermissionGroupRepo>,
        data_policies: Arc<dyn DataPolicyRepo>,
    ) -> Self {
        Self {
            permission_groups,
            data_policies,
        }
    }

    /// In-memory store seeded from a policy document.
    pub fn from_document(document: PolicyDocument) -> Self {
        Self::new(
            Arc::new(MemoryPermissionGroupRepo::with_groups(
                document.permission_groups,
            )),
            Arc::new(MemoryDataPolicyRepo::with_policies(document.data_policies)),
        )
    }

    pub fn permission_groups(&self) -> Arc<dyn PermissionGroupRepo> {
        self.permission_groups.clone()
    }

    pub fn data_policies(&self) -> Arc<dyn DataPolicyRepo> {
        self.data_policies.clone()
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore").finish_non_exhaustive()
    }
}
