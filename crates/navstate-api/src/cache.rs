use std::future::Future;

use navstate_core::NavigationError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub last_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub key: String,
    pub from_cache: bool,
}

#[derive(Debug, Default)]
struct CacheSlot {
    last: Option<(Value, String)>,
    stats: CacheStats,
}

/// Remembers the last saved blob so an unchanged state is not written twice.
///
/// The lock only guards the compare and the replacement, never the write
/// itself. Overlapping saves therefore race, and whichever write resolves last
/// owns the slot.
#[derive(Debug, Default)]
pub struct AppStatePersistenceCache {
    slot: Mutex<CacheSlot>,
}

impl AppStatePersistenceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached key when `blob` equals the last saved blob, otherwise
    /// write it through `writer` and remember the result.
    ///
    /// # Errors
    /// Propagates the writer's error. The slot is left unchanged in that case.
    pub async fn save_if_changed<F, Fut>(
        &self,
        blob: Value,
        writer: F,
    ) -> Result<SaveOutcome, NavigationError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<String, NavigationError>>,
    {
        {
            let mut slot = self.slot.lock();
            let cached_key = match &slot.last {
                Some((cached_blob, key)) if *cached_blob == blob => Some(key.clone()),
                _ => None,
            };
            if let Some(key) = cached_key {
                slot.stats.hit_count += 1;
                tracing::debug!(key = %key, "app state unchanged; reusing cached key");
                return Ok(SaveOutcome { key, from_cache: true });
            }
        }

        let key = writer(blob.clone()).await?;

        let mut slot = self.slot.lock();
        slot.stats.miss_count += 1;
        slot.stats.last_key = Some(key.clone());
        slot.last = Some((blob, key.clone()));
        tracing::debug!(key = %key, "app state written");
        Ok(SaveOutcome { key, from_cache: false })
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.slot.lock().stats.clone()
    }

    /// Forget the cached blob and zero the counters.
    pub fn reset(&self) {
        *self.slot.lock() = CacheSlot::default();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;

    fn counting_writer(
        calls: &Arc<AtomicUsize>,
    ) -> impl FnOnce(Value) -> std::future::Ready<Result<String, NavigationError>> {
        let calls = Arc::clone(calls);
        move |_blob| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(format!("KEY{call}")))
        }
    }

    // Test IDs: TCACHE-001
    #[tokio::test]
    async fn unchanged_blob_is_not_written_again() -> Result<(), NavigationError> {
        let cache = AppStatePersistenceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.save_if_changed(json!({ "a": 1 }), counting_writer(&calls)).await?;
        let second = cache.save_if_changed(json!({ "a": 1 }), counting_writer(&calls)).await?;
        assert_eq!(first, SaveOutcome { key: "KEY1".to_string(), from_cache: false });
        assert_eq!(second, SaveOutcome { key: "KEY1".to_string(), from_cache: true });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let third = cache.save_if_changed(json!({ "a": 2 }), counting_writer(&calls)).await?;
        assert_eq!(third.key, "KEY2");
        assert_eq!(
            cache.stats(),
            CacheStats { hit_count: 1, miss_count: 2, last_key: Some("KEY2".to_string()) }
        );
        Ok(())
    }

    // Test IDs: TCACHE-002
    #[tokio::test]
    async fn failed_write_leaves_slot_untouched() -> Result<(), NavigationError> {
        let cache = AppStatePersistenceCache::new();
        cache.save_if_changed(json!({ "a": 1 }), |_| async { Ok("KEY1".to_string()) }).await?;

        let failed = cache
            .save_if_changed(json!({ "a": 2 }), |_| async {
                Err(NavigationError::InvalidInput("store offline".to_string()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.stats().last_key.as_deref(), Some("KEY1"));

        let again =
            cache.save_if_changed(json!({ "a": 1 }), |_| async { Ok("unused".to_string()) }).await?;
        assert!(again.from_cache);

        cache.reset();
        assert_eq!(cache.stats(), CacheStats::default());
        Ok(())
    }

    // Test IDs: TCACHE-003
    #[tokio::test]
    async fn last_writer_to_resolve_owns_the_slot() -> Result<(), NavigationError> {
        let cache = Arc::new(AppStatePersistenceCache::new());
        let (release_slow, slow_gate) = oneshot::channel::<()>();

        let slow_cache = Arc::clone(&cache);
        let slow = tokio::spawn(async move {
            slow_cache
                .save_if_changed(json!({ "which": "slow" }), |_| async move {
                    let _ = slow_gate.await;
                    Ok("SLOW".to_string())
                })
                .await
        });
        tokio::task::yield_now().await;

        cache
            .save_if_changed(json!({ "which": "fast" }), |_| async { Ok("FAST".to_string()) })
            .await?;
        let _ = release_slow.send(());
        let slow_outcome = match slow.await {
            Ok(outcome) => outcome?,
            Err(err) => panic!("slow save task failed: {err}"),
        };
        assert_eq!(slow_outcome.key, "SLOW");

        let stats = cache.stats();
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.last_key.as_deref(), Some("SLOW"));
        let hit = cache
            .save_if_changed(json!({ "which": "slow" }), |_| async { Ok("unused".to_string()) })
            .await?;
        assert!(hit.from_cache);
        Ok(())
    }
}
