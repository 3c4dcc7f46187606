//! Access-decision errors.
//!
//! Two families callers must tell apart: [`AccessError::PermissionDenied`]
//! (the request is not allowed) and [`AccessError::PolicyConfiguration`]
//! (a stored policy is broken). Neither is raised for "no policy matched",
//! which resolves to a safe default instead.

use thiserror::Error;

use super::ActionCode;
use crate::{cache::CacheError, db::DbError};

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenialReason {
    #[error("permission group '{0}' not found")]
    GroupNotFound(String),

    #[error("no permission for {action} on {feature}")]
    InsufficientPermission { feature: String, action: ActionCode },

    #[error("no permission group on request")]
    Unauthenticated,
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Access denied: {0}")]
    PermissionDenied(DenialReason),

    #[error("Policy configuration error: {0}")]
    PolicyConfiguration(String),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl AccessError {
    pub fn denied(reason: DenialReason) -> Self {
        Self::PermissionDenied(reason)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::PolicyConfiguration(message.into())
    }

    /// The request itself was refused.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::UnknownRoute(_))
    }

    /// A stored policy or expression is malformed.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::PolicyConfiguration(_))
    }
}

impl From<CacheError> for AccessError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound(code) => Self::PermissionDenied(DenialReason::GroupNotFound(code)),
            CacheError::Store(e) => Self::Store(e.to_string()),
        }
    }
}

impl From<DbError> for AccessError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Validation(message) => Self::PolicyConfiguration(message),
            other => Self::Store(other.to_string()),
        }
    }
}
