mod data_policies;
mod permission_groups;

pub use data_policies::*;
pub use permission_groups::*;
