//! Persistent, globally shared translation cache backed by SQLite.
//! Rows are immutable: never updated, never deleted. The UNIQUE constraint on
//! (cache_key, source_language, target_language) plus `INSERT OR IGNORE`
//! absorbs concurrent misses on the same content.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::normalize::{normalize_language, CacheKey};
use crate::db::{now_unix, Database, StoreError};

/// One previously computed translation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub cache_key: String,
    pub original_text: String,
    pub source_language: String,
    pub target_language: String,
    pub translated_text: String,
    pub created_at: i64,
}

pub struct SqliteCache {
    db: Arc<Database>,
}

impl SqliteCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Exact-match index lookup on the key triple.
    pub fn get(
        &self,
        key: &CacheKey,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.db.conn();
        let entry = conn
            .query_row(
                "SELECT cache_key, original_text, source_language, target_language,
                        translated_text, created_at
                 FROM translations_cache
                 WHERE cache_key = ?1 AND source_language = ?2 AND target_language = ?3",
                params![
                    key.to_hex(),
                    normalize_language(src_lang),
                    normalize_language(tgt_lang)
                ],
                |row| {
                    Ok(CacheEntry {
                        cache_key: row.get(0)?,
                        original_text: row.get(1)?,
                        source_language: row.get(2)?,
                        target_language: row.get(3)?,
                        translated_text: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;

        if entry.is_some() {
            debug!(?key, "persistent cache hit");
        }
        Ok(entry)
    }

    /// Insert a new entry. Returns `false` when an entry for the key already
    /// existed; the existing row is left untouched.
    pub fn insert(
        &self,
        key: &CacheKey,
        original_text: &str,
        src_lang: &str,
        tgt_lang: &str,
        translated_text: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.db.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO translations_cache
             (cache_key, original_text, source_language, target_language,
              translated_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.to_hex(),
                original_text,
                normalize_language(src_lang),
                normalize_language(tgt_lang),
                translated_text,
                now_unix()
            ],
        )?;

        if inserted == 0 {
            debug!(?key, "cache entry already present, insert ignored");
        }
        Ok(inserted > 0)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.db.conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM translations_cache", [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SqliteCache {
        SqliteCache::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn miss_then_hit_after_insert() {
        let cache = cache();
        let key = CacheKey::derive("Hello World", "English", "German");

        assert!(cache.get(&key, "English", "German").unwrap().is_none());
        assert!(cache
            .insert(&key, "Hello World", "English", "German", "Hallo Welt")
            .unwrap());

        let entry = cache.get(&key, "english", "GERMAN").unwrap().unwrap();
        assert_eq!(entry.translated_text, "Hallo Welt");
        assert_eq!(entry.original_text, "Hello World");
        assert_eq!(entry.source_language, "english");
        assert_eq!(entry.cache_key, key.to_hex());
    }

    #[test]
    fn duplicate_insert_keeps_first_entry() {
        let cache = cache();
        let key = CacheKey::derive("cat", "English", "French");

        assert!(cache.insert(&key, "cat", "English", "French", "chat").unwrap());
        assert!(!cache.insert(&key, "Cat", "English", "French", "le chat").unwrap());

        assert_eq!(cache.count().unwrap(), 1);
        let entry = cache.get(&key, "English", "French").unwrap().unwrap();
        assert_eq!(entry.translated_text, "chat");
    }
}
