mod data_policies;
mod permission_groups;

pub use data_policies::{DataPolicyError, DataPolicyService};
pub use permission_groups::PermissionGroupService;
