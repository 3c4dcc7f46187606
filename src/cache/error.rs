use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Permission group not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

pub type CacheResult<T> = Result<T, CacheError>;
