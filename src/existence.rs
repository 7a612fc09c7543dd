//! Process-lifetime cache of the runtime's installed-model listing

use crate::error::VaultResult;
use crate::runtime::ModelRuntime;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Answers "is this model installed?" from one runtime `list` call
///
/// The listing is fetched lazily and kept until [`ExistenceCache::invalidate`].
/// Every operation that mutates the store must invalidate before the next
/// query since the cache cannot observe the store itself.
pub struct ExistenceCache {
    runtime: Arc<dyn ModelRuntime>,
    models: Mutex<Option<BTreeSet<String>>>,
}

impl ExistenceCache {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            models: Mutex::new(None),
        }
    }

    /// Fetch the listing if it is not cached yet
    ///
    /// A failed listing is cached as empty so queries fall through to disk
    /// checks without calling the runtime again.
    pub async fn ensure_initialized(&self) -> VaultResult<()> {
        let mut models = self.models.lock().await;
        if models.is_some() {
            return Ok(());
        }

        match self.runtime.list().await {
            Ok(keys) => {
                tracing::debug!(count = keys.len(), "Existence cache initialised");
                *models = Some(keys.into_iter().collect());
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Runtime listing failed, existence cache left empty");
                *models = Some(BTreeSet::new());
                Err(e)
            }
        }
    }

    /// Membership test against the cached listing
    pub async fn exists(&self, model_key: &str) -> bool {
        let _ = self.ensure_initialized().await;
        self.models
            .lock()
            .await
            .as_ref()
            .is_some_and(|m| m.contains(model_key))
    }

    /// Every cached model key, sorted
    pub async fn models(&self) -> Vec<String> {
        let _ = self.ensure_initialized().await;
        self.models
            .lock()
            .await
            .as_ref()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the listing; the next query calls the runtime again
    pub async fn invalidate(&self) {
        *self.models.lock().await = None;
        tracing::debug!("Existence cache invalidated");
    }

    pub async fn is_initialized(&self) -> bool {
        self.models.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use crate::store::ModelSpec;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRuntime {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ModelRuntime for CountingRuntime {
        async fn list(&self) -> VaultResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VaultError::Runtime("down".to_string()));
            }
            Ok(vec!["demo:1b".to_string(), "llama2:latest".to_string()])
        }

        async fn pull(&self, _spec: &ModelSpec) -> VaultResult<()> {
            Ok(())
        }

        async fn remove(&self, _spec: &ModelSpec) -> VaultResult<()> {
            Ok(())
        }
    }

    fn runtime(fail: bool) -> Arc<CountingRuntime> {
        Arc::new(CountingRuntime {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn test_lists_once() {
        let rt = runtime(false);
        let cache = ExistenceCache::new(rt.clone());
        assert!(!cache.is_initialized().await);

        assert!(cache.exists("demo:1b").await);
        assert!(!cache.exists("demo:7b").await);
        assert_eq!(cache.models().await.len(), 2);
        assert_eq!(rt.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_relist() {
        let rt = runtime(false);
        let cache = ExistenceCache::new(rt.clone());
        cache.ensure_initialized().await.unwrap();
        cache.ensure_initialized().await.unwrap();
        cache.invalidate().await;
        assert!(!cache.is_initialized().await);
        assert!(cache.exists("llama2:latest").await);
        assert_eq!(rt.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_listing_is_cached_empty() {
        let rt = runtime(true);
        let cache = ExistenceCache::new(rt.clone());
        assert!(cache.ensure_initialized().await.is_err());
        assert!(!cache.exists("demo:1b").await);
        assert!(!cache.exists("demo:1b").await);
        assert_eq!(rt.calls.load(Ordering::SeqCst), 1);
    }
}
