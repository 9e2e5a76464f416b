//! Artist/title search index.
//!
//! The index is a SQLite database with a `tracks` table plus an external-
//! content FTS5 table over the artist and title columns. The FTS tokenizer
//! strips diacritics so "Bjork" finds "Björk"; candidate retrieval is
//! conjunctive over both fields, then candidates are rescored in Rust with
//! the same point scheme for every query and filtered by the caller's
//! threshold.

use crate::models::IndexRecord;
use crate::normalize::{fold_to_ascii, tokenize};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// Database filename inside the index directory.
const INDEX_DB: &str = "index.db";

/// Points per query token found in the matching record.
const TOKEN_POINTS: i64 = 10;

/// Points per field whose folded text equals the folded query exactly.
const EXACT_FIELD_POINTS: i64 = 15;

fn index_db_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_DB)
}

/// Build (or rebuild) the search index database under `dir`.
pub fn create_index(dir: &Path, records: &[IndexRecord]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create index folder {}", dir.display()))?;
    let path = index_db_path(dir);
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove stale index {}", path.display()))?;
    }

    let mut conn = Connection::open(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE tracks (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            artist TEXT NOT NULL,
            title TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE tracks_fts USING fts5(
            artist, title,
            content='tracks', content_rowid='rowid',
            tokenize='unicode61 remove_diacritics 2'
        );",
    )?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO tracks (id, path, artist, title) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for record in records {
            stmt.execute(params![record.id, record.path, record.artist, record.title])?;
        }
    }
    tx.commit()?;

    conn.execute("INSERT INTO tracks_fts(tracks_fts) VALUES('rebuild')", [])?;
    conn.execute_batch("ANALYZE;")?;
    Ok(path)
}

/// One search hit, best score first in the result list.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub score: i64,
}

/// Read handle over an index built by [`create_index`].
pub struct Searcher {
    conn: Connection,
}

impl Searcher {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = index_db_path(dir);
        if !path.exists() {
            bail!("search index {} does not exist", path.display());
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Find records matching every token of both the artist and the title
    /// query, keeping hits whose score exceeds `threshold`.
    pub fn search(&self, artist: &str, title: &str, threshold: i64) -> Result<Vec<SearchHit>> {
        let artist_tokens = tokenize(artist);
        let title_tokens = tokenize(title);
        if artist_tokens.is_empty() || title_tokens.is_empty() {
            return Ok(Vec::new());
        }

        // Conjunctive, column-scoped match; tokens are quoted so FTS query
        // syntax in user input is inert
        let match_query = format!(
            "artist: ({}) AND title: ({})",
            quoted_tokens(&artist_tokens),
            quoted_tokens(&title_tokens)
        );

        let mut stmt = self.conn.prepare_cached(
            "SELECT t.id, t.artist, t.title
             FROM tracks_fts fts
             JOIN tracks t ON t.rowid = fts.rowid
             WHERE tracks_fts MATCH ?1",
        )?;
        let candidates = stmt
            .query_map(params![match_query], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|(id, record_artist, record_title)| {
                let score = score_match(artist, title, &record_artist, &record_title);
                SearchHit {
                    id,
                    artist: record_artist,
                    title: record_title,
                    score,
                }
            })
            .filter(|hit| hit.score > threshold)
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        Ok(hits)
    }
}

fn quoted_tokens(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Integer match score between a query and a record: points per query token
/// present in the record's tokens, plus a bonus per field that matches the
/// query exactly after folding.
fn score_match(
    query_artist: &str,
    query_title: &str,
    record_artist: &str,
    record_title: &str,
) -> i64 {
    let mut score = 0i64;
    for (query, field) in [(query_artist, record_artist), (query_title, record_title)] {
        let field_tokens = tokenize(field);
        for token in tokenize(query) {
            if field_tokens.contains(&token) {
                score += TOKEN_POINTS;
            }
        }
        if fold_to_ascii(query) == fold_to_ascii(field) {
            score += EXACT_FIELD_POINTS;
        }
    }
    score
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, artist: &str, title: &str) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            path: format!("{id}.npz"),
            artist: artist.to_string(),
            title: title.to_string(),
        }
    }

    fn build(records: &[IndexRecord]) -> (tempfile::TempDir, Searcher) {
        let dir = tempfile::tempdir().unwrap();
        create_index(dir.path(), records).unwrap();
        let searcher = Searcher::open(dir.path()).unwrap();
        (dir, searcher)
    }

    #[test]
    fn test_exact_match_clears_threshold() {
        let (_dir, searcher) =
            build(&[record("uspop2002_0", "The Beatles", "Let It Be")]);

        let hits = searcher.search("The Beatles", "Let It Be", 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "uspop2002_0");
        // 5 matched tokens plus two exact fields
        assert_eq!(hits[0].score, 5 * TOKEN_POINTS + 2 * EXACT_FIELD_POINTS);
    }

    #[test]
    fn test_partial_artist_query_still_qualifies() {
        let (_dir, searcher) = build(&[record("1", "The Beatles", "Let It Be")]);

        // Artist query is a subset of the indexed artist: one token match
        // plus the exact title still clears the threshold
        let hits = searcher.search("Beatles", "Let It Be", 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
        assert_eq!(hits[0].artist, "The Beatles");
        assert_eq!(hits[0].title, "Let It Be");

        assert!(searcher.search("Beatles", "Hey Jude", 20).unwrap().is_empty());
    }

    #[test]
    fn test_title_mismatch_returns_nothing() {
        let (_dir, searcher) =
            build(&[record("uspop2002_0", "The Beatles", "Let It Be")]);

        // Conjunctive title match fails even though the artist matches
        let hits = searcher.search("The Beatles", "Yesterday", 20).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_accent_insensitive_both_directions() {
        let (_dir, searcher) = build(&[record("cal10k_3", "Björk", "Jóga")]);

        let hits = searcher.search("Bjork", "Joga", 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].artist, "Björk");

        let (_dir, searcher) = build(&[record("cal10k_4", "Bjork", "Joga")]);
        let hits = searcher.search("Björk", "Jóga", 20).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_threshold_filters_partial_matches() {
        let (_dir, searcher) = build(&[
            record("uspop2002_0", "Beatles", "Let It Be"),
            record("uspop2002_1", "Beatles", "Let It Be Naked"),
        ]);

        let loose = searcher.search("Beatles", "Let It Be", 20).unwrap();
        assert_eq!(loose.len(), 2);
        // Both fields exact: 10 + 15 + 30 + 15
        assert_eq!(loose[0].id, "uspop2002_0");
        assert_eq!(loose[0].score, 70);
        // Superset title loses the exact-title bonus: 10 + 15 + 30
        assert_eq!(loose[1].score, 55);

        let strict = searcher.search("Beatles", "Let It Be", 60).unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].id, "uspop2002_0");
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let (_dir, searcher) =
            build(&[record("uspop2002_0", "The Beatles", "Let It Be")]);
        assert!(searcher.search("", "Let It Be", 0).unwrap().is_empty());
        assert!(searcher.search("The Beatles", "...", 0).unwrap().is_empty());
    }

    #[test]
    fn test_query_syntax_is_inert() {
        let (_dir, searcher) =
            build(&[record("uspop2002_0", "AC/DC", "Back in Black")]);
        let hits = searcher.search("AC/DC", "Back in Black", 20).unwrap();
        assert_eq!(hits.len(), 1);
        // FTS operators in the query never reach the parser unquoted
        assert!(searcher
            .search("NOT OR", "AND NEAR", 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_open_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Searcher::open(dir.path()).is_err());
    }
}
