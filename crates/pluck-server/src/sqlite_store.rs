//! Durable mapping store on SQLite.
//!
//! The database runs in WAL mode with one writer connection and one reader
//! connection, so lookups made during extraction never queue behind a vote.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use pluck::store::{apply_vote, prepare_upsert, reseed, seed_mapping, MappingStore};
use pluck::url_gate::normalize_domain;
use pluck::{
    rank_mappings, PluckError, PluckResult, Selectors, SiteMapping, UpsertOutcome, VoteDirection,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS site_mappings (
    id TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    path_pattern TEXT NOT NULL,
    selectors TEXT NOT NULL,
    confidence REAL NOT NULL,
    upvotes INTEGER NOT NULL,
    downvotes INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_verified_at TEXT NOT NULL,
    UNIQUE (domain, path_pattern)
);
CREATE INDEX IF NOT EXISTS idx_site_mappings_domain ON site_mappings (domain);
";

const COLUMNS: &str = "id, domain, path_pattern, selectors, confidence, upvotes, downvotes, \
                       created_by, created_at, last_verified_at";

pub struct SqliteMappingStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteMappingStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> PluckResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PluckError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let writer = Connection::open(path).map_err(storage)?;
        let mode: String = writer
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(storage)?;
        writer
            .execute_batch("PRAGMA busy_timeout=5000; PRAGMA synchronous=NORMAL;")
            .map_err(storage)?;
        writer.execute_batch(SCHEMA).map_err(storage)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(storage)?;
        reader
            .execute_batch("PRAGMA busy_timeout=5000;")
            .map_err(storage)?;

        tracing::info!(path = %path.display(), journal_mode = %mode, "mapping store opened");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// Number of stored mappings.
    pub fn count(&self) -> PluckResult<usize> {
        let conn = lock(&self.reader)?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM site_mappings", [], |row| row.get(0))
            .map_err(storage)?;
        Ok(n as usize)
    }
}

impl MappingStore for SqliteMappingStore {
    fn lookup(&self, domain: &str) -> PluckResult<Vec<SiteMapping>> {
        let domain = normalize_domain(domain);
        let conn = lock(&self.reader)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM site_mappings WHERE domain = ?1"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![domain], read_row)
            .map_err(storage)?;

        let mut found = Vec::new();
        for row in rows {
            found.push(row.map_err(storage)??);
        }
        rank_mappings(&mut found);
        Ok(found)
    }

    fn upsert(
        &self,
        domain: &str,
        path_pattern: &str,
        selectors: Selectors,
        created_by: &str,
    ) -> PluckResult<(SiteMapping, UpsertOutcome)> {
        let (domain, pattern) = prepare_upsert(domain, path_pattern, &selectors)?;
        let now = Utc::now();

        let mut conn = lock(&self.writer)?;
        let tx = conn.transaction().map_err(storage)?;
        let existing = tx
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM site_mappings WHERE domain = ?1 AND path_pattern = ?2"
                ),
                params![domain, pattern],
                read_row,
            )
            .optional()
            .map_err(storage)?
            .transpose()?;

        let (mapping, outcome) = match existing {
            Some(mut mapping) => {
                reseed(&mut mapping, selectors, created_by, now);
                tx.execute(
                    "UPDATE site_mappings SET selectors = ?2, confidence = ?3, upvotes = ?4, \
                     downvotes = ?5, created_by = ?6, last_verified_at = ?7 WHERE id = ?1",
                    params![
                        mapping.id.to_string(),
                        encode_selectors(&mapping.selectors)?,
                        mapping.confidence,
                        mapping.upvotes,
                        mapping.downvotes,
                        mapping.created_by,
                        mapping.last_verified_at.to_rfc3339(),
                    ],
                )
                .map_err(storage)?;
                (mapping, UpsertOutcome::Updated)
            }
            None => {
                let mapping = seed_mapping(domain, pattern, selectors, created_by, now);
                tx.execute(
                    &format!(
                        "INSERT INTO site_mappings ({COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                    ),
                    params![
                        mapping.id.to_string(),
                        mapping.domain,
                        mapping.path_pattern,
                        encode_selectors(&mapping.selectors)?,
                        mapping.confidence,
                        mapping.upvotes,
                        mapping.downvotes,
                        mapping.created_by,
                        mapping.created_at.to_rfc3339(),
                        mapping.last_verified_at.to_rfc3339(),
                    ],
                )
                .map_err(storage)?;
                (mapping, UpsertOutcome::Created)
            }
        };
        tx.commit().map_err(storage)?;

        tracing::info!(
            id = %mapping.id,
            domain = %mapping.domain,
            pattern = %mapping.path_pattern,
            ?outcome,
            "mapping saved"
        );
        Ok((mapping, outcome))
    }

    fn vote(&self, id: Uuid, direction: VoteDirection) -> PluckResult<SiteMapping> {
        let mut conn = lock(&self.writer)?;
        let tx = conn.transaction().map_err(storage)?;
        let mut mapping = select_by_id(&tx, id)?.ok_or(PluckError::MappingNotFound(id))?;
        apply_vote(&mut mapping, direction, Utc::now());
        tx.execute(
            "UPDATE site_mappings SET confidence = ?2, upvotes = ?3, downvotes = ?4, \
             last_verified_at = ?5 WHERE id = ?1",
            params![
                id.to_string(),
                mapping.confidence,
                mapping.upvotes,
                mapping.downvotes,
                mapping.last_verified_at.to_rfc3339(),
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;
        Ok(mapping)
    }

    fn get(&self, id: Uuid) -> PluckResult<Option<SiteMapping>> {
        let conn = lock(&self.reader)?;
        select_by_id(&conn, id)
    }
}

fn select_by_id(conn: &Connection, id: Uuid) -> PluckResult<Option<SiteMapping>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM site_mappings WHERE id = ?1"),
        params![id.to_string()],
        read_row,
    )
    .optional()
    .map_err(storage)?
    .transpose()
}

/// Decode one row. SQLite errors stay in the outer result; malformed stored
/// values surface as storage errors in the inner one.
fn read_row(row: &Row<'_>) -> rusqlite::Result<PluckResult<SiteMapping>> {
    let raw = RawMapping {
        id: row.get(0)?,
        domain: row.get(1)?,
        path_pattern: row.get(2)?,
        selectors: row.get(3)?,
        confidence: row.get(4)?,
        upvotes: row.get(5)?,
        downvotes: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        last_verified_at: row.get(9)?,
    };
    Ok(raw.decode())
}

/// A row as stored, before the text columns are parsed.
struct RawMapping {
    id: String,
    domain: String,
    path_pattern: String,
    selectors: String,
    confidence: f64,
    upvotes: u32,
    downvotes: u32,
    created_by: String,
    created_at: String,
    last_verified_at: String,
}

impl RawMapping {
    fn decode(self) -> PluckResult<SiteMapping> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| PluckError::Storage(format!("bad id '{}': {e}", self.id)))?;
        let selectors = serde_json::from_str(&self.selectors)
            .map_err(|e| PluckError::Storage(format!("bad selectors for {id}: {e}")))?;
        Ok(SiteMapping {
            id,
            domain: self.domain,
            path_pattern: self.path_pattern,
            selectors,
            confidence: self.confidence,
            upvotes: self.upvotes,
            downvotes: self.downvotes,
            created_by: self.created_by,
            created_at: parse_time(&self.created_at)?,
            last_verified_at: parse_time(&self.last_verified_at)?,
        })
    }
}

fn parse_time(raw: &str) -> PluckResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PluckError::Storage(format!("bad timestamp '{raw}': {e}")))
}

fn encode_selectors(selectors: &Selectors) -> PluckResult<String> {
    serde_json::to_string(selectors).map_err(|e| PluckError::Storage(e.to_string()))
}

fn lock(conn: &Mutex<Connection>) -> PluckResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| PluckError::Storage("connection lock poisoned".into()))
}

fn storage(e: rusqlite::Error) -> PluckError {
    PluckError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluck::{FieldName, SelectorValue};
    use std::sync::Arc;

    fn selectors(title: &str) -> Selectors {
        let mut s = Selectors::new();
        s.insert(FieldName::Title, SelectorValue::Single(title.into()));
        s.insert(
            FieldName::Image,
            SelectorValue::Multiple(vec!["img.a".into(), "img.b".into()]),
        );
        s
    }

    fn open_temp() -> (tempfile::TempDir, SqliteMappingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMappingStore::open(&dir.path().join("nested/mappings.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_upsert_then_lookup_round_trips_selectors() {
        let (_dir, store) = open_temp();
        let (created, outcome) = store
            .upsert("www.Shop.com", "/p/*", selectors("h1"), "alice")
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let found = store.lookup("shop.com").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, created.id);
        assert_eq!(found[0].selectors, created.selectors);
        assert_eq!(found[0].path_pattern, "/p/*");
        assert_eq!(found[0].upvotes, 1);
        assert_eq!(found[0].confidence, 0.5);
    }

    #[test]
    fn test_reteach_replaces_and_resets_votes() {
        let (_dir, store) = open_temp();
        let (first, _) = store.upsert("shop.com", "*", selectors("h1"), "a").unwrap();
        store.vote(first.id, VoteDirection::Down).unwrap();
        store.vote(first.id, VoteDirection::Down).unwrap();

        let (second, outcome) = store
            .upsert("shop.com", "", selectors("h2.title"), "b")
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(second.id, first.id);
        assert_eq!(second.downvotes, 0);
        assert_eq!(second.created_by, "b");
        assert_eq!(store.count().unwrap(), 1);

        let stored = store.get(first.id).unwrap().unwrap();
        assert_eq!(
            stored.selectors[&FieldName::Title],
            SelectorValue::Single("h2.title".into())
        );
    }

    #[test]
    fn test_vote_recomputes_confidence() {
        let (_dir, store) = open_temp();
        let (m, _) = store.upsert("shop.com", "*", selectors("h1"), "a").unwrap();
        let after = store.vote(m.id, VoteDirection::Up).unwrap();
        assert_eq!(after.upvotes, 2);
        assert_eq!(after.confidence, pluck::wilson_lower_bound(2, 0));
        assert_eq!(store.get(m.id).unwrap().unwrap().confidence, after.confidence);
    }

    #[test]
    fn test_vote_on_unknown_id() {
        let (_dir, store) = open_temp();
        let err = store.vote(Uuid::new_v4(), VoteDirection::Up).unwrap_err();
        assert!(matches!(err, PluckError::MappingNotFound(_)));
    }

    #[test]
    fn test_lookup_ranks_best_first() {
        let (_dir, store) = open_temp();
        let (weak, _) = store.upsert("shop.com", "/a/*", selectors("h1"), "a").unwrap();
        let (strong, _) = store.upsert("shop.com", "/b/*", selectors("h1"), "a").unwrap();
        for _ in 0..5 {
            store.vote(strong.id, VoteDirection::Up).unwrap();
        }
        store.vote(weak.id, VoteDirection::Down).unwrap();
        let found = store.lookup("shop.com").unwrap();
        assert_eq!(found[0].id, strong.id);
        assert_eq!(found[1].id, weak.id);
    }

    #[test]
    fn test_invalid_submission_writes_nothing() {
        let (_dir, store) = open_temp();
        assert!(store
            .upsert("https://shop.com", "*", selectors("h1"), "a")
            .is_err());
        assert!(store.upsert("shop.com", "*", Selectors::new(), "a").is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.db");
        let id = {
            let store = SqliteMappingStore::open(&path).unwrap();
            store.upsert("shop.com", "*", selectors("h1"), "a").unwrap().0.id
        };
        let store = SqliteMappingStore::open(&path).unwrap();
        assert!(store.get(id).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_votes_all_land() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);
        let (m, _) = store.upsert("shop.com", "*", selectors("h1"), "a").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.vote(m.id, VoteDirection::Up).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get(m.id).unwrap().unwrap().upvotes, 81);
    }
}
