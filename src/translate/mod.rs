//! Translation resolution pipeline.
//!
//! A request is resolved by the first stage that produces a result:
//! user glossary → in-memory cache → persistent cache → provider. A live
//! provider result is written to both cache layers and, for authenticated
//! callers, counted against their monthly usage.

pub mod cache;
pub mod glossary;
pub mod normalize;
pub mod openai;
pub mod provider;
pub mod sqlite_cache;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::UserId;
use crate::db::StoreError;
use crate::metrics::{MetricsRegistry, Stage};
use crate::usage::UsageTracker;
use cache::MemoryCache;
use glossary::Glossary;
use normalize::CacheKey;
use provider::TranslationProvider;
use sqlite_cache::SqliteCache;

/// Translation request as submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

/// Which stage produced a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Glossary,
    Cache,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translated_text: String,
    pub origin: Origin,
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("Failed to translate text: {0}")]
    Upstream(String),
    #[error("Failed to translate text: Translation API returned empty content.")]
    EmptyResponse,
    #[error("Failed to translate text: provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Translation is not configured on this server.")]
    Disabled,
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TranslationService {
    /// `None` when no API key is configured: glossary and cache hits are
    /// still served, misses fail with [`TranslateError::Disabled`].
    provider: Option<Arc<dyn TranslationProvider>>,
    memory: MemoryCache,
    cache: SqliteCache,
    glossary: Arc<Glossary>,
    usage: Arc<UsageTracker>,
    metrics: Arc<MetricsRegistry>,
    provider_timeout: Duration,
}

impl TranslationService {
    pub fn new(
        provider: Option<Arc<dyn TranslationProvider>>,
        memory: MemoryCache,
        cache: SqliteCache,
        glossary: Arc<Glossary>,
        usage: Arc<UsageTracker>,
        metrics: Arc<MetricsRegistry>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            memory,
            cache,
            glossary,
            usage,
            metrics,
            provider_timeout,
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Resolve a translation. Blank input is a no-op and returns `Ok(None)`
    /// without touching the store or the provider.
    pub async fn translate(
        &self,
        request: &TranslateRequest,
        caller: Option<&UserId>,
    ) -> Result<Option<Translation>, TranslateError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let src = request.source_language.as_str();
        let tgt = request.target_language.as_str();

        let request_id = uuid::Uuid::new_v4().to_string();
        let _total = self.metrics.time(Stage::Total);

        // 1. User glossary, exact normalized match
        if let Some(user) = caller {
            let hit = {
                let _timer = self.metrics.time(Stage::GlossaryLookup);
                self.glossary.lookup(user, text, src, tgt)?
            };
            if let Some(custom) = hit {
                debug!(%request_id, user = %user, "glossary hit");
                return Ok(Some(Translation {
                    translated_text: custom,
                    origin: Origin::Glossary,
                }));
            }
        }

        // 2. Shared cache: memory first, then the persistent table
        let key = CacheKey::derive(text, src, tgt);
        let cached = {
            let _timer = self.metrics.time(Stage::CacheLookup);
            match self.memory.get(&key) {
                Some(hit) => Some(hit),
                None => self.cache.get(&key, src, tgt)?.map(|e| {
                    self.memory.insert(key, e.translated_text.clone());
                    e.translated_text
                }),
            }
        };
        if let Some(translated_text) = cached {
            debug!(%request_id, ?key, "cache hit");
            return Ok(Some(Translation {
                translated_text,
                origin: Origin::Cache,
            }));
        }

        // 3. Live provider call
        let Some(provider) = &self.provider else {
            debug!(%request_id, ?key, "cache miss and no provider configured");
            return Err(TranslateError::Disabled);
        };
        debug!(%request_id, ?key, "cache miss, calling provider");
        let instruction = provider::system_instruction(src, tgt);
        let timer = self.metrics.time(Stage::ProviderCall);
        let outcome =
            tokio::time::timeout(self.provider_timeout, provider.translate(&instruction, text))
                .await;
        let provider_elapsed = timer.elapsed();
        drop(timer);

        let translated = match outcome {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                warn!(%request_id, error = %e, "provider call failed");
                return Err(e);
            }
            Err(_) => {
                warn!(%request_id, timeout = ?self.provider_timeout, "provider call timed out");
                return Err(TranslateError::Timeout(self.provider_timeout));
            }
        };
        if translated.trim().is_empty() {
            warn!(%request_id, "provider returned empty content");
            return Err(TranslateError::EmptyResponse);
        }

        // 4. Populate the cache. A concurrent miss may have stored the key
        //    first; the stored row wins so every layer serves the same text.
        let translated = if self.cache.insert(&key, text, src, tgt, &translated)? {
            translated
        } else {
            match self.cache.get(&key, src, tgt)? {
                Some(stored) => {
                    debug!(%request_id, ?key, "cache row already written, serving stored text");
                    stored.translated_text
                }
                None => translated,
            }
        };
        self.memory.insert(key, translated.clone());

        // 5. Account usage of the original text
        if let Some(user) = caller {
            let characters = text.chars().count() as i64;
            self.usage.record(user, characters).map_err(|e| {
                warn!(%request_id, user = %user, error = %e, "usage recording failed");
                e
            })?;
        }

        info!(
            %request_id,
            provider_ms = provider_elapsed.as_secs_f64() * 1000.0,
            chars = text.chars().count(),
            "translated via provider"
        );

        Ok(Some(Translation {
            translated_text: translated,
            origin: Origin::Provider,
        }))
    }

    pub fn memory_cache_len(&self) -> usize {
        self.memory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::Database;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::num::NonZeroUsize;

    /// Records every call and answers with a scripted reply.
    struct FakeProvider {
        reply: Mutex<Result<String, String>>,
        delay: Duration,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeProvider {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Ok(reply.to_string())),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(msg: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Err(msg.to_string())),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Ok("late".into())),
                delay,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn set_reply(&self, reply: &str) {
            *self.reply.lock() = Ok(reply.to_string());
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl TranslationProvider for FakeProvider {
        async fn translate(
            &self,
            system_instruction: &str,
            text: &str,
        ) -> Result<String, TranslateError> {
            self.calls
                .lock()
                .push((system_instruction.to_string(), text.to_string()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.lock().clone().map_err(TranslateError::Upstream)
        }
    }

    struct Harness {
        service: TranslationService,
        provider: Arc<FakeProvider>,
        glossary: Arc<Glossary>,
        usage: Arc<UsageTracker>,
        cache: SqliteCache,
        db: Arc<Database>,
    }

    fn harness(provider: Arc<FakeProvider>) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
        ));
        let glossary = Arc::new(Glossary::new(Arc::clone(&db)));
        let usage = Arc::new(UsageTracker::new(Arc::clone(&db), clock));
        let service = TranslationService::new(
            Some(provider.clone() as Arc<dyn TranslationProvider>),
            MemoryCache::new(NonZeroUsize::new(16).unwrap()),
            SqliteCache::new(Arc::clone(&db)),
            Arc::clone(&glossary),
            Arc::clone(&usage),
            Arc::new(MetricsRegistry::new()),
            Duration::from_millis(200),
        );
        Harness {
            service,
            provider,
            glossary,
            usage,
            cache: SqliteCache::new(Arc::clone(&db)),
            db,
        }
    }

    fn request(text: &str) -> TranslateRequest {
        TranslateRequest {
            text: text.into(),
            source_language: "English".into(),
            target_language: "German".into(),
        }
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let h = harness(FakeProvider::replying("x"));
        let user = UserId::new("u1");
        for text in ["", "   ", "\n\t"] {
            assert!(h.service.translate(&request(text), Some(&user)).await.unwrap().is_none());
        }
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.cache.count().unwrap(), 0);
        assert_eq!(h.usage.current(&user).unwrap().translated_characters, 0);
    }

    #[tokio::test]
    async fn first_request_calls_provider_caches_and_counts() {
        let h = harness(FakeProvider::replying("Hallo Welt\n"));
        let user = UserId::new("u1");

        let out = h
            .service
            .translate(&request("  Hello World  "), Some(&user))
            .await
            .unwrap()
            .unwrap();
        // provider content is stored and returned as-is
        assert_eq!(out.translated_text, "Hallo Welt\n");
        assert_eq!(out.origin, Origin::Provider);

        let calls = h.provider.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "Hello World");
        assert!(calls[0].0.contains("from English to German"));

        let key = CacheKey::derive("hello world", "english", "german");
        assert_eq!(key.to_hex(), blake3::hash(b"hello world|english|german").to_hex().to_string());
        let entry = h.cache.get(&key, "English", "German").unwrap().unwrap();
        assert_eq!(entry.original_text, "Hello World");
        assert_eq!(entry.translated_text, "Hallo Welt\n");

        assert_eq!(h.usage.current(&user).unwrap().translated_characters, 11);
    }

    #[tokio::test]
    async fn repeat_request_is_served_from_cache() {
        let h = harness(FakeProvider::replying("Hallo Welt"));
        let user = UserId::new("u1");

        let first = h.service.translate(&request("Hello World"), Some(&user)).await.unwrap().unwrap();
        h.provider.set_reply("something else");
        let second = h
            .service
            .translate(&request("hello WORLD "), Some(&user))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(second.translated_text, first.translated_text);
        assert_eq!(second.origin, Origin::Cache);
        // cached requests contribute nothing
        assert_eq!(h.usage.current(&user).unwrap().translated_characters, 11);
    }

    #[tokio::test]
    async fn persistent_cache_serves_when_memory_is_cold() {
        let h = harness(FakeProvider::replying("unused"));
        let key = CacheKey::derive("Good night", "English", "German");
        h.cache
            .insert(&key, "Good night", "English", "German", "Gute Nacht")
            .unwrap();
        assert_eq!(h.service.memory_cache_len(), 0);

        let out = h.service.translate(&request("good night"), None).await.unwrap().unwrap();
        assert_eq!(out.translated_text, "Gute Nacht");
        assert_eq!(out.origin, Origin::Cache);
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.service.memory_cache_len(), 1);
    }

    #[tokio::test]
    async fn glossary_wins_over_cache_and_provider() {
        let h = harness(FakeProvider::replying("Wolke"));
        let user = UserId::new("u1");
        h.glossary
            .add(Some(&user), "Cloud", "Cloud (Fachbegriff)", "English", "German")
            .unwrap();
        let key = CacheKey::derive("cloud", "English", "German");
        h.cache.insert(&key, "cloud", "English", "German", "Wolke").unwrap();

        for variant in ["cloud", "  CLOUD ", "Cloud"] {
            let out = h.service.translate(&request(variant), Some(&user)).await.unwrap().unwrap();
            assert_eq!(out.translated_text, "Cloud (Fachbegriff)");
            assert_eq!(out.origin, Origin::Glossary);
        }
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.usage.current(&user).unwrap().translated_characters, 0);

        // glossary is per user: anyone else sees the shared cache
        let out = h.service.translate(&request("cloud"), None).await.unwrap().unwrap();
        assert_eq!(out.translated_text, "Wolke");
    }

    #[tokio::test]
    async fn unauthenticated_requests_record_no_usage() {
        let h = harness(FakeProvider::replying("Hallo"));
        let out = h.service.translate(&request("Hello"), None).await.unwrap().unwrap();
        assert_eq!(out.origin, Origin::Provider);

        let rows: i64 = h
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM user_monthly_usage", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn usage_sums_uncached_original_lengths() {
        let h = harness(FakeProvider::replying("übersetzt"));
        let user = UserId::new("u1");
        for text in ["one", "three", "Grüße", "one"] {
            h.service.translate(&request(text), Some(&user)).await.unwrap();
        }
        // "one" is cached the second time; "Grüße" counts characters, not bytes
        assert_eq!(h.provider.call_count(), 3);
        assert_eq!(h.usage.current(&user).unwrap().translated_characters, 3 + 5 + 5);
    }

    #[tokio::test]
    async fn provider_failure_writes_nothing() {
        let h = harness(FakeProvider::failing("connection reset"));
        let user = UserId::new("u1");

        let err = h.service.translate(&request("Hello"), Some(&user)).await.unwrap_err();
        assert!(matches!(err, TranslateError::Upstream(_)));
        assert_eq!(err.to_string(), "Failed to translate text: connection reset");
        assert_eq!(h.cache.count().unwrap(), 0);
        assert_eq!(h.usage.current(&user).unwrap().translated_characters, 0);
    }

    #[tokio::test]
    async fn empty_provider_content_is_a_failure() {
        let h = harness(FakeProvider::replying("   "));
        let user = UserId::new("u1");

        let err = h.service.translate(&request("Hello"), Some(&user)).await.unwrap_err();
        assert!(matches!(err, TranslateError::EmptyResponse));
        assert_eq!(h.cache.count().unwrap(), 0);
        assert_eq!(h.usage.current(&user).unwrap().translated_characters, 0);
    }

    /// Stores a competing translation for the same key while "translating",
    /// as a concurrent request on another instance would.
    struct RacingProvider {
        cache: SqliteCache,
    }

    #[async_trait]
    impl TranslationProvider for RacingProvider {
        async fn translate(
            &self,
            _system_instruction: &str,
            text: &str,
        ) -> Result<String, TranslateError> {
            let key = CacheKey::derive(text, "English", "German");
            self.cache
                .insert(&key, text, "English", "German", "Hallo (first)")
                .map_err(TranslateError::Store)?;
            Ok("Hallo (second)".into())
        }
    }

    #[tokio::test]
    async fn concurrent_miss_serves_the_stored_translation() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
        ));
        let provider = Arc::new(RacingProvider {
            cache: SqliteCache::new(Arc::clone(&db)),
        });
        let service = TranslationService::new(
            Some(provider as Arc<dyn TranslationProvider>),
            MemoryCache::new(NonZeroUsize::new(16).unwrap()),
            SqliteCache::new(Arc::clone(&db)),
            Arc::new(Glossary::new(Arc::clone(&db))),
            Arc::new(UsageTracker::new(Arc::clone(&db), clock)),
            Arc::new(MetricsRegistry::new()),
            Duration::from_millis(200),
        );

        let out = service.translate(&request("Hello"), None).await.unwrap().unwrap();
        assert_eq!(out.translated_text, "Hallo (first)");
        assert_eq!(out.origin, Origin::Provider);

        let again = service.translate(&request("Hello"), None).await.unwrap().unwrap();
        assert_eq!(again.translated_text, "Hallo (first)");
        assert_eq!(again.origin, Origin::Cache);

        let key = CacheKey::derive("Hello", "English", "German");
        let stored = SqliteCache::new(db).get(&key, "English", "German").unwrap().unwrap();
        assert_eq!(stored.translated_text, "Hallo (first)");
    }

    #[tokio::test]
    async fn without_provider_hits_are_served_and_misses_are_disabled() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
        ));
        let glossary = Arc::new(Glossary::new(Arc::clone(&db)));
        let cache = SqliteCache::new(Arc::clone(&db));
        let service = TranslationService::new(
            None,
            MemoryCache::new(NonZeroUsize::new(16).unwrap()),
            SqliteCache::new(Arc::clone(&db)),
            Arc::clone(&glossary),
            Arc::new(UsageTracker::new(Arc::clone(&db), clock)),
            Arc::new(MetricsRegistry::new()),
            Duration::from_millis(200),
        );
        assert!(!service.has_provider());

        let user = UserId::new("u1");
        glossary.add(Some(&user), "Cloud", "Wolke", "English", "German").unwrap();
        let key = CacheKey::derive("Hello", "English", "German");
        cache.insert(&key, "Hello", "English", "German", "Hallo").unwrap();

        let out = service.translate(&request("cloud"), Some(&user)).await.unwrap().unwrap();
        assert_eq!(out.origin, Origin::Glossary);
        let out = service.translate(&request("hello"), None).await.unwrap().unwrap();
        assert_eq!(out.translated_text, "Hallo");
        assert_eq!(out.origin, Origin::Cache);

        let err = service.translate(&request("Goodbye"), None).await.unwrap_err();
        assert!(matches!(err, TranslateError::Disabled));
    }

    #[tokio::test]
    async fn slow_provider_hits_configured_timeout() {
        let h = harness(FakeProvider::slow(Duration::from_secs(5)));
        let err = h.service.translate(&request("Hello"), None).await.unwrap_err();
        assert!(matches!(err, TranslateError::Timeout(d) if d == Duration::from_millis(200)));
        assert_eq!(h.cache.count().unwrap(), 0);
    }
}
