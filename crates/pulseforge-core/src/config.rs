//! Config resolution with a TTL-bounded snapshot cache.
//!
//! The configuration store serves flat string key/value pairs by logical
//! name (`ai.enabled`, `ai.weight.duration`, ...). [`ConfigResolver`]
//! coerces them into a typed [`PipelineConfig`] snapshot and publishes it
//! snapshot-and-swap: readers hold an `Arc` to an immutable snapshot, and
//! a refresh replaces the whole thing under a short write lock. Stale
//! snapshots are served when the store is unreachable; with no snapshot at
//! all, resolution fails [`ErrorKind::Degraded`]-classified and the caller
//! proceeds as if AI were disabled.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use pulseforge_types::PipelineConfig;

use crate::error::{PipelineError, Result};

/// The configuration store could not be read.
#[derive(Error, Debug)]
#[error("config fetch failed: {0}")]
pub struct ConfigFetchError(pub String);

/// A source of flat configuration key/value pairs.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the full key map. May block on I/O.
    async fn fetch(&self) -> std::result::Result<HashMap<String, String>, ConfigFetchError>;
}

/// An in-memory source with a fixed key map. Used by tests and by the CLI
/// when no external store is configured.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    values: HashMap<String, String>,
}

impl StaticConfigSource {
    /// A source serving the given keys.
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// A source serving no overrides; defaults apply.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn fetch(&self) -> std::result::Result<HashMap<String, String>, ConfigFetchError> {
        Ok(self.values.clone())
    }
}

struct CachedSnapshot {
    config: Arc<PipelineConfig>,
    fetched_at: Instant,
}

/// Typed config snapshots over a [`ConfigSource`], cached with a bounded
/// TTL.
pub struct ConfigResolver {
    source: Arc<dyn ConfigSource>,
    base: PipelineConfig,
    ttl: Duration,
    fetch_attempts: u32,
    cached: RwLock<Option<CachedSnapshot>>,
}

impl ConfigResolver {
    /// A resolver over `source`, layering fetched keys on top of `base`.
    pub fn new(source: Arc<dyn ConfigSource>, base: PipelineConfig) -> Self {
        let ttl = Duration::from_secs(base.config_ttl_seconds);
        Self {
            source,
            base,
            ttl,
            fetch_attempts: 2,
            cached: RwLock::new(None),
        }
    }

    /// The current snapshot, refreshing if the TTL has elapsed.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError::Degraded`] when the store is unreachable
    /// after bounded retries and no previous snapshot exists.
    pub async fn snapshot(&self) -> Result<Arc<PipelineConfig>> {
        if let Some(fresh) = self.fresh_snapshot() {
            return Ok(fresh);
        }

        match self.fetch_with_retry().await {
            Ok(values) => {
                let config = Arc::new(self.coerce(values));
                let mut cached = self.cached.write().expect("config cache lock poisoned");
                *cached = Some(CachedSnapshot {
                    config: Arc::clone(&config),
                    fetched_at: Instant::now(),
                });
                Ok(config)
            }
            Err(err) => {
                // Serve stale rather than failing the pulse.
                let cached = self.cached.read().expect("config cache lock poisoned");
                if let Some(ref snapshot) = *cached {
                    warn!(error = %err, "config refresh failed, serving stale snapshot");
                    return Ok(Arc::clone(&snapshot.config));
                }
                Err(PipelineError::Degraded(err.to_string()))
            }
        }
    }

    fn fresh_snapshot(&self) -> Option<Arc<PipelineConfig>> {
        let cached = self.cached.read().expect("config cache lock poisoned");
        cached.as_ref().and_then(|snapshot| {
            (snapshot.fetched_at.elapsed() < self.ttl).then(|| Arc::clone(&snapshot.config))
        })
    }

    async fn fetch_with_retry(
        &self,
    ) -> std::result::Result<HashMap<String, String>, ConfigFetchError> {
        let mut last_err = None;
        for attempt in 0..self.fetch_attempts {
            match self.source.fetch().await {
                Ok(values) => return Ok(values),
                Err(err) => {
                    if attempt + 1 < self.fetch_attempts {
                        tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ConfigFetchError("no fetch attempted".into())))
    }

    fn coerce(&self, values: HashMap<String, String>) -> PipelineConfig {
        let mut config = self.base.clone();
        for (key, raw) in &values {
            if let Err(err) = config.apply_key(key, raw) {
                warn!(key = %key, error = %err, "skipping config key");
            }
        }
        debug!(keys = values.len(), "config snapshot refreshed");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        fail_first: AtomicU32,
        values: HashMap<String, String>,
        fetches: AtomicU32,
    }

    #[async_trait]
    impl ConfigSource for FlakySource {
        async fn fetch(&self) -> std::result::Result<HashMap<String, String>, ConfigFetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(ConfigFetchError("store unreachable".into()));
            }
            Ok(self.values.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl ConfigSource for DownSource {
        async fn fetch(&self) -> std::result::Result<HashMap<String, String>, ConfigFetchError> {
            Err(ConfigFetchError("store down".into()))
        }
    }

    #[tokio::test]
    async fn snapshot_applies_overrides_to_base() {
        let source = StaticConfigSource::new(HashMap::from([
            ("ai.enabled".to_string(), "false".to_string()),
            ("pipeline.worker_concurrency".to_string(), "3".to_string()),
        ]));
        let resolver = ConfigResolver::new(Arc::new(source), PipelineConfig::default());

        let snapshot = resolver.snapshot().await.unwrap();
        assert!(!snapshot.ai_enabled);
        assert_eq!(snapshot.worker_concurrency, 3);
        // Untouched keys keep their defaults.
        assert_eq!(snapshot.event_deadline_seconds, 300);
    }

    #[tokio::test]
    async fn snapshot_is_cached_within_ttl() {
        let source = Arc::new(FlakySource {
            fail_first: AtomicU32::new(0),
            values: HashMap::new(),
            fetches: AtomicU32::new(0),
        });
        let resolver = ConfigResolver::new(source.clone(), PipelineConfig::default());

        resolver.snapshot().await.unwrap();
        resolver.snapshot().await.unwrap();
        resolver.snapshot().await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_retries_once_then_succeeds() {
        let source = Arc::new(FlakySource {
            fail_first: AtomicU32::new(1),
            values: HashMap::from([("ai.enabled".to_string(), "false".to_string())]),
            fetches: AtomicU32::new(0),
        });
        let resolver = ConfigResolver::new(source.clone(), PipelineConfig::default());

        let snapshot = resolver.snapshot().await.unwrap();
        assert!(!snapshot.ai_enabled);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_store_without_cache_is_degraded() {
        let resolver = ConfigResolver::new(Arc::new(DownSource), PipelineConfig::default());
        let err = resolver.snapshot().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Degraded);
    }

    #[tokio::test]
    async fn unreachable_store_serves_stale_snapshot() {
        let mut base = PipelineConfig::default();
        base.config_ttl_seconds = 0; // every call refreshes

        let source = Arc::new(FlakySource {
            fail_first: AtomicU32::new(0),
            values: HashMap::from([("ai.enabled".to_string(), "false".to_string())]),
            fetches: AtomicU32::new(0),
        });
        let resolver = ConfigResolver::new(source.clone(), base);

        // Prime the cache, then break the source.
        let first = resolver.snapshot().await.unwrap();
        assert!(!first.ai_enabled);
        source.fail_first.store(u32::MAX, Ordering::SeqCst);

        let stale = resolver.snapshot().await.unwrap();
        assert_eq!(*stale, *first);
    }

    #[tokio::test]
    async fn unknown_keys_are_skipped_not_fatal() {
        let source = StaticConfigSource::new(HashMap::from([
            ("ai.not_a_key".to_string(), "1".to_string()),
            ("ai.enabled".to_string(), "false".to_string()),
        ]));
        let resolver = ConfigResolver::new(Arc::new(source), PipelineConfig::default());
        let snapshot = resolver.snapshot().await.unwrap();
        assert!(!snapshot.ai_enabled);
    }
}
