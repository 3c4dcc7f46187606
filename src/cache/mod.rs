mod error;
mod permission_group;

pub use error::{CacheError, CacheResult};
pub use permission_group::{DEFAULT_PERMISSION_GROUP_TTL, PermissionGroupCache};
