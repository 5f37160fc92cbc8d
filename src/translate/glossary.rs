//! Per-user glossary: term overrides that take precedence over the cache
//! and the provider. Terms are stored normalized (trimmed, lowercased) and
//! matched exactly, never by substring.
//!
//! Every mutation requires an authenticated caller who owns the row. The
//! connection guard is held across each check-then-write, so ownership and
//! uniqueness checks cannot interleave with another mutation.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::normalize::{normalize_language, normalize_text};
use crate::auth::UserId;
use crate::db::{is_constraint_violation, now_unix, Database, StoreError};

/// One user-specific term override.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryEntry {
    pub id: String,
    pub user_id: UserId,
    /// Normalized term.
    pub term: String,
    pub custom_translation: String,
    pub source_language: String,
    pub target_language: String,
    pub created_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum GlossaryError {
    #[error("User must be logged in to {0} a glossary term.")]
    Unauthenticated(&'static str),
    #[error("User is not authorized to {0} this glossary term.")]
    Forbidden(&'static str),
    #[error("Glossary term not found.")]
    NotFound,
    #[error("An entry for '{0}' already exists in this glossary. Please choose a different term.")]
    Duplicate(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for GlossaryError {
    fn from(e: rusqlite::Error) -> Self {
        GlossaryError::Store(StoreError::Sqlite(e))
    }
}

const ENTRY_COLUMNS: &str = "id, user_id, term, custom_translation, source_language, target_language, created_at";

pub struct Glossary {
    db: Arc<Database>,
}

impl Glossary {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Custom translation for `text` if the user has an exact normalized match
    /// under the language pair.
    pub fn lookup(
        &self,
        user: &UserId,
        text: &str,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.db.conn();
        let hit: Option<String> = conn
            .query_row(
                "SELECT custom_translation FROM user_glossaries
                 WHERE user_id = ?1 AND source_language = ?2
                   AND target_language = ?3 AND term = ?4",
                params![
                    user.as_str(),
                    normalize_language(src_lang),
                    normalize_language(tgt_lang),
                    normalize_text(text)
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit)
    }

    /// Add a term. Returns `Ok(None)` without writing when the normalized term
    /// already exists for this user and language pair.
    pub fn add(
        &self,
        caller: Option<&UserId>,
        term: &str,
        custom_translation: &str,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Result<Option<String>, GlossaryError> {
        let user = caller.ok_or(GlossaryError::Unauthenticated("add"))?;
        let term = normalize_text(term);
        let custom_translation = custom_translation.trim();
        validate(&term, custom_translation)?;
        if src_lang.trim().is_empty() || tgt_lang.trim().is_empty() {
            return Err(GlossaryError::InvalidInput(
                "Source and target language are required.".into(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.db.conn();
        let inserted = conn.execute(
            "INSERT INTO user_glossaries
             (id, user_id, term, custom_translation, source_language, target_language, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (user_id, source_language, target_language, term) DO NOTHING",
            params![
                id,
                user.as_str(),
                term,
                custom_translation,
                normalize_language(src_lang),
                normalize_language(tgt_lang),
                now_unix()
            ],
        )?;

        if inserted == 0 {
            warn!(user = %user, term = %term, "term already exists for this language pair, not adding duplicate");
            return Ok(None);
        }
        info!(user = %user, id = %id, "glossary term added");
        Ok(Some(id))
    }

    /// Change the term text and translation of an entry the caller owns.
    /// Languages are fixed at creation.
    pub fn update(
        &self,
        caller: Option<&UserId>,
        id: &str,
        term: &str,
        custom_translation: &str,
    ) -> Result<(), GlossaryError> {
        let user = caller.ok_or(GlossaryError::Unauthenticated("update"))?;
        let normalized = normalize_text(term);
        let custom_translation = custom_translation.trim();
        validate(&normalized, custom_translation)?;

        let conn = self.db.conn();
        let existing = fetch_by_id(&conn, id)?.ok_or(GlossaryError::NotFound)?;
        if &existing.user_id != user {
            warn!(user = %user, id, "rejected glossary update by non-owner");
            return Err(GlossaryError::Forbidden("update"));
        }

        if normalized != existing.term {
            let duplicate: Option<String> = conn
                .query_row(
                    "SELECT id FROM user_glossaries
                     WHERE user_id = ?1 AND source_language = ?2
                       AND target_language = ?3 AND term = ?4 AND id != ?5",
                    params![
                        user.as_str(),
                        existing.source_language,
                        existing.target_language,
                        normalized,
                        id
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            if duplicate.is_some() {
                return Err(GlossaryError::Duplicate(term.trim().to_string()));
            }
        }

        conn.execute(
            "UPDATE user_glossaries SET term = ?1, custom_translation = ?2 WHERE id = ?3",
            params![normalized, custom_translation, id],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                GlossaryError::Duplicate(term.trim().to_string())
            } else {
                e.into()
            }
        })?;

        debug!(user = %user, id, "glossary term updated");
        Ok(())
    }

    pub fn delete(&self, caller: Option<&UserId>, id: &str) -> Result<(), GlossaryError> {
        let user = caller.ok_or(GlossaryError::Unauthenticated("delete"))?;

        let conn = self.db.conn();
        let existing = fetch_by_id(&conn, id)?.ok_or(GlossaryError::NotFound)?;
        if &existing.user_id != user {
            warn!(user = %user, id, "rejected glossary delete by non-owner");
            return Err(GlossaryError::Forbidden("delete"));
        }

        conn.execute("DELETE FROM user_glossaries WHERE id = ?1", params![id])?;
        info!(user = %user, id, "glossary term deleted");
        Ok(())
    }

    /// All of the caller's entries for a language pair, in insertion order.
    /// Unauthenticated callers get an empty list.
    pub fn list(
        &self,
        caller: Option<&UserId>,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Result<Vec<GlossaryEntry>, StoreError> {
        let Some(user) = caller else {
            return Ok(Vec::new());
        };

        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS} FROM user_glossaries
             WHERE user_id = ?1 AND source_language = ?2 AND target_language = ?3
             ORDER BY seq ASC"
        ))?;
        let rows = stmt.query_map(
            params![
                user.as_str(),
                normalize_language(src_lang),
                normalize_language(tgt_lang)
            ],
            entry_from_row,
        )?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn validate(normalized_term: &str, custom_translation: &str) -> Result<(), GlossaryError> {
    if normalized_term.is_empty() {
        return Err(GlossaryError::InvalidInput("Term must not be empty.".into()));
    }
    if custom_translation.is_empty() {
        return Err(GlossaryError::InvalidInput(
            "Custom translation must not be empty.".into(),
        ));
    }
    Ok(())
}

fn fetch_by_id(conn: &Connection, id: &str) -> Result<Option<GlossaryEntry>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM user_glossaries WHERE id = ?1"),
        params![id],
        entry_from_row,
    )
    .optional()
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<GlossaryEntry> {
    Ok(GlossaryEntry {
        id: row.get(0)?,
        user_id: UserId::new(row.get::<_, String>(1)?),
        term: row.get(2)?,
        custom_translation: row.get(3)?,
        source_language: row.get(4)?,
        target_language: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary() -> Glossary {
        Glossary::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn row_count(g: &Glossary, user: &UserId, term: &str) -> i64 {
        g.db.conn()
            .query_row(
                "SELECT COUNT(*) FROM user_glossaries WHERE user_id = ?1 AND term = ?2",
                params![user.as_str(), term],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn lookup_matches_normalized_variants_only() {
        let g = glossary();
        g.add(Some(&alice()), "  Cloud Run ", " Cloud Run ", "English", "German")
            .unwrap()
            .unwrap();

        for variant in ["cloud run", "CLOUD RUN", "\tCloud Run  "] {
            assert_eq!(
                g.lookup(&alice(), variant, "English", "German").unwrap().as_deref(),
                Some("Cloud Run")
            );
        }
        // exact match only, no substrings
        assert!(g.lookup(&alice(), "deploy to cloud run", "English", "German").unwrap().is_none());
        // per user and per pair
        assert!(g.lookup(&bob(), "cloud run", "English", "German").unwrap().is_none());
        assert!(g.lookup(&alice(), "cloud run", "English", "French").unwrap().is_none());
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let g = glossary();
        let first = g.add(Some(&alice()), "Widget", "Bauteil", "English", "German").unwrap();
        assert!(first.is_some());

        let second = g.add(Some(&alice()), " WIDGET ", "Ding", "English", "German").unwrap();
        assert!(second.is_none());
        assert_eq!(row_count(&g, &alice(), "widget"), 1);
        assert_eq!(
            g.lookup(&alice(), "widget", "English", "German").unwrap().as_deref(),
            Some("Bauteil")
        );

        // another user may hold the same term
        assert!(g.add(Some(&bob()), "widget", "Ding", "English", "German").unwrap().is_some());
    }

    #[test]
    fn mutations_require_identity() {
        let g = glossary();
        assert!(matches!(
            g.add(None, "a", "b", "English", "German"),
            Err(GlossaryError::Unauthenticated("add"))
        ));
        assert!(matches!(
            g.update(None, "id", "a", "b"),
            Err(GlossaryError::Unauthenticated("update"))
        ));
        assert!(matches!(
            g.delete(None, "id"),
            Err(GlossaryError::Unauthenticated("delete"))
        ));
        assert!(g.list(None, "English", "German").unwrap().is_empty());
    }

    #[test]
    fn blank_term_or_translation_is_rejected() {
        let g = glossary();
        assert!(matches!(
            g.add(Some(&alice()), "   ", "x", "English", "German"),
            Err(GlossaryError::InvalidInput(_))
        ));
        assert!(matches!(
            g.add(Some(&alice()), "x", "  ", "English", "German"),
            Err(GlossaryError::InvalidInput(_))
        ));
    }

    #[test]
    fn other_users_cannot_update_or_delete() {
        let g = glossary();
        let id = g
            .add(Some(&alice()), "server", "Server", "English", "German")
            .unwrap()
            .unwrap();

        let err = g.update(Some(&bob()), &id, "server", "Diener").unwrap_err();
        assert!(matches!(err, GlossaryError::Forbidden("update")));
        let err = g.delete(Some(&bob()), &id).unwrap_err();
        assert!(matches!(err, GlossaryError::Forbidden("delete")));

        assert_eq!(
            g.lookup(&alice(), "server", "English", "German").unwrap().as_deref(),
            Some("Server")
        );
    }

    #[test]
    fn update_changes_term_and_translation() {
        let g = glossary();
        let id = g
            .add(Some(&alice()), "colour", "Farbe", "English", "German")
            .unwrap()
            .unwrap();

        g.update(Some(&alice()), &id, " Color ", " Farbton ").unwrap();

        assert!(g.lookup(&alice(), "colour", "English", "German").unwrap().is_none());
        assert_eq!(
            g.lookup(&alice(), "color", "English", "German").unwrap().as_deref(),
            Some("Farbton")
        );
        // same term, new translation
        g.update(Some(&alice()), &id, "color", "Farbe").unwrap();
        assert_eq!(
            g.lookup(&alice(), "COLOR", "English", "German").unwrap().as_deref(),
            Some("Farbe")
        );
    }

    #[test]
    fn update_into_existing_term_is_a_conflict() {
        let g = glossary();
        g.add(Some(&alice()), "file", "Datei", "English", "German").unwrap();
        let id = g
            .add(Some(&alice()), "folder", "Ordner", "English", "German")
            .unwrap()
            .unwrap();

        let err = g.update(Some(&alice()), &id, "File", "Akte").unwrap_err();
        assert!(err.to_string().contains("'File'"));
        assert!(matches!(err, GlossaryError::Duplicate(ref term) if term == "File"));
        assert_eq!(
            g.lookup(&alice(), "folder", "English", "German").unwrap().as_deref(),
            Some("Ordner")
        );
    }

    #[test]
    fn missing_entries_are_not_found() {
        let g = glossary();
        let id = g
            .add(Some(&alice()), "tab", "Reiter", "English", "German")
            .unwrap()
            .unwrap();
        g.delete(Some(&alice()), &id).unwrap();

        assert!(matches!(g.delete(Some(&alice()), &id), Err(GlossaryError::NotFound)));
        assert!(matches!(
            g.update(Some(&alice()), &id, "tab", "Registerkarte"),
            Err(GlossaryError::NotFound)
        ));
    }

    #[test]
    fn list_is_scoped_and_in_insertion_order() {
        let g = glossary();
        for (term, translation) in [("zebra", "Zebra"), ("apple", "Apfel"), ("mango", "Mango")] {
            g.add(Some(&alice()), term, translation, "English", "German").unwrap();
        }
        g.add(Some(&alice()), "apple", "pomme", "English", "French").unwrap();
        g.add(Some(&bob()), "pear", "Birne", "English", "German").unwrap();

        let terms: Vec<String> = g
            .list(Some(&alice()), "english", "german")
            .unwrap()
            .into_iter()
            .map(|e| e.term)
            .collect();
        assert_eq!(terms, vec!["zebra", "apple", "mango"]);
    }
}
