//! Text normalization and content-addressed cache keys.
//! Normalized form: surrounding whitespace trimmed, lowercased. Used for
//! glossary term equality and for cache key derivation.

use std::fmt;

pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Language names are compared case-insensitively everywhere they are stored.
pub fn normalize_language(lang: &str) -> String {
    lang.trim().to_lowercase()
}

/// blake3 digest of `normalized_text|source|target`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn derive(text: &str, source_lang: &str, target_lang: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize_text(text).as_bytes());
        hasher.update(b"|");
        hasher.update(normalize_language(source_lang).as_bytes());
        hasher.update(b"|");
        hasher.update(normalize_language(target_lang).as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Lowercase hex, the form persisted in the store.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}
