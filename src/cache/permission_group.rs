use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;

use super::error::{CacheError, CacheResult};
use crate::{db::repos::PermissionGroupRepo, models::PermissionGroup};

pub const DEFAULT_PERMISSION_GROUP_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    group: Arc<PermissionGroup>,
    loaded_at: Instant,
}

impl CacheEntry {
    fn new(group: PermissionGroup) -> Self {
        Self {
            group: Arc::new(group),
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}

/// Short-TTL cache of permission groups keyed by code.
///
/// Entries younger than the TTL are served without touching the store, so an
/// edit may be invisible for up to one TTL unless [`evict`](Self::evict) is
/// called. Expiry is lazy; there is no background sweeper. Lookups that find
/// no group are not cached.
///
/// # Multi-Node Deployments
///
/// Each process keeps its own map. Eviction only affects the local node; other
/// nodes pick up changes when their entries expire.
pub struct PermissionGroupCache {
    entries: DashMap<String, CacheEntry>,
    repo: Arc<dyn PermissionGroupRepo>,
    ttl: Duration,
}

impl PermissionGroupCache {
    pub fn new(repo: Arc<dyn PermissionGroupRepo>) -> Self {
        Self::with_ttl(repo, DEFAULT_PERMISSION_GROUP_TTL)
    }

    pub fn with_ttl(repo: Arc<dyn PermissionGroupRepo>, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            repo,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a group, loading it from the store when absent or expired.
    ///
    /// # Errors
    /// `CacheError::NotFound` if the store has no such group,
    /// `CacheError::Store` if the store fails.
    pub async fn get_or_throw(&self, code: &str) -> CacheResult<Arc<PermissionGroup>> {
        // The map guard must be released before the awaited load below
        if let Some(entry) = self.entries.get(code)
            && entry.is_fresh(self.ttl)
        {
            return Ok(entry.group.clone());
        }

        let group = self
            .repo
            .get_by_code(code)
            .await?
            .ok_or_else(|| CacheError::NotFound(code.to_string()))?;

        tracing::debug!(group = %code, "Loaded permission group into cache");

        let entry = CacheEntry::new(group);
        let group = entry.group.clone();
        self.entries.insert(code.to_string(), entry);
        Ok(group)
    }

    /// Drop the cached entry so the next lookup reloads it.
    pub fn evict(&self, code: &str) {
        if self.entries.remove(code).is_some() {
            tracing::debug!(group = %code, "Evicted permission group from cache");
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries currently held, including expired ones not yet reloaded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PermissionGroupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGroupCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        authz::ActionCode,
        db::{
            DbError, DbResult, MemoryPermissionGroupRepo,
            repos::PermissionGroupRepo,
        },
        models::{FieldMaskRule, PermissionAssignment},
    };

    /// Counts store reads so tests can tell cache hits from reloads.
    struct CountingRepo {
        inner: MemoryPermissionGroupRepo,
        reads: AtomicUsize,
    }

    impl CountingRepo {
        fn new(groups: Vec<PermissionGroup>) -> Self {
            Self {
                inner: MemoryPermissionGroupRepo::with_groups(groups),
                reads: AtomicUsize::new(0),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PermissionGroupRepo for CountingRepo {
        async fn get_by_code(&self, code: &str) -> DbResult<Option<PermissionGroup>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_by_code(code).await
        }

        async fn upsert(&self, group: PermissionGroup) -> DbResult<PermissionGroup> {
            self.inner.upsert(group).await
        }

        async fn replace_assignments(
            &self,
            code: &str,
            assignments: Vec<PermissionAssignment>,
        ) -> DbResult<PermissionGroup> {
            self.inner.replace_assignments(code, assignments).await
        }

        async fn replace_mask_rules(
            &self,
            code: &str,
            rules: Vec<FieldMaskRule>,
        ) -> DbResult<PermissionGroup> {
            self.inner.replace_mask_rules(code, rules).await
        }

        async fn list_codes(&self) -> DbResult<Vec<String>> {
            self.inner.list_codes().await
        }
    }

    struct FailingRepo;

    #[async_trait]
    impl PermissionGroupRepo for FailingRepo {
        async fn get_by_code(&self, _code: &str) -> DbResult<Option<PermissionGroup>> {
            Err(DbError::Internal("connection refused".to_string()))
        }

        async fn upsert(&self, group: PermissionGroup) -> DbResult<PermissionGroup> {
            Ok(group)
        }

        async fn replace_assignments(
            &self,
            _code: &str,
            _assignments: Vec<PermissionAssignment>,
        ) -> DbResult<PermissionGroup> {
            Err(DbError::NotFound)
        }

        async fn replace_mask_rules(
            &self,
            _code: &str,
            _rules: Vec<FieldMaskRule>,
        ) -> DbResult<PermissionGroup> {
            Err(DbError::NotFound)
        }

        async fn list_codes(&self) -> DbResult<Vec<String>> {
            Ok(vec![])
        }
    }

    fn analyst() -> PermissionGroup {
        PermissionGroup::new("ANALYST", "Analyst").with_assignment("CUSTOMER", ActionCode::Read)
    }

    #[tokio::test]
    async fn test_serves_stale_entry_within_ttl() {
        let repo = Arc::new(CountingRepo::new(vec![analyst()]));
        let cache = PermissionGroupCache::new(repo.clone());

        let first = cache.get_or_throw("ANALYST").await.unwrap();
        assert!(first.find_assignment("CUSTOMER", ActionCode::Read).is_some());

        repo.replace_assignments("ANALYST", vec![]).await.unwrap();

        let second = cache.get_or_throw("ANALYST").await.unwrap();
        assert!(second.find_assignment("CUSTOMER", ActionCode::Read).is_some());
        assert_eq!(repo.reads(), 1);
    }

    #[tokio::test]
    async fn test_evict_forces_reload() {
        let repo = Arc::new(CountingRepo::new(vec![analyst()]));
        let cache = PermissionGroupCache::new(repo.clone());

        cache.get_or_throw("ANALYST").await.unwrap();
        repo.replace_assignments("ANALYST", vec![]).await.unwrap();
        cache.evict("ANALYST");

        let reloaded = cache.get_or_throw("ANALYST").await.unwrap();
        assert!(reloaded.assignments.is_empty());
        assert_eq!(repo.reads(), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reloads() {
        let repo = Arc::new(CountingRepo::new(vec![analyst()]));
        let cache = PermissionGroupCache::with_ttl(repo.clone(), Duration::ZERO);

        cache.get_or_throw("ANALYST").await.unwrap();
        cache.get_or_throw("ANALYST").await.unwrap();
        assert_eq!(repo.reads(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reloads() {
        let repo = Arc::new(CountingRepo::new(vec![analyst()]));
        let cache = PermissionGroupCache::with_ttl(repo.clone(), Duration::from_millis(20));

        cache.get_or_throw("ANALYST").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get_or_throw("ANALYST").await.unwrap();
        assert_eq!(repo.reads(), 2);
    }

    #[tokio::test]
    async fn test_missing_group_is_not_cached() {
        let repo = Arc::new(CountingRepo::new(vec![]));
        let cache = PermissionGroupCache::new(repo.clone());

        assert!(matches!(
            cache.get_or_throw("GHOST").await,
            Err(CacheError::NotFound(code)) if code == "GHOST"
        ));
        assert!(cache.is_empty());

        repo.upsert(PermissionGroup::new("GHOST", "Ghost")).await.unwrap();
        assert!(cache.get_or_throw("GHOST").await.is_ok());
        assert_eq!(repo.reads(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let cache = PermissionGroupCache::new(Arc::new(FailingRepo));
        assert!(matches!(
            cache.get_or_throw("ANALYST").await,
            Err(CacheError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_entry() {
        let repo = Arc::new(CountingRepo::new(vec![analyst()]));
        let cache = Arc::new(PermissionGroupCache::new(repo.clone()));
        cache.get_or_throw("ANALYST").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_throw("ANALYST").await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(repo.reads(), 1);
    }
}
