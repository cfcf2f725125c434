use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::{CandidateEntry, Direction, Entry, ValidState};
use crate::sync::dedupe::plan_merge;
use crate::sync::reconcile::{merge_candidate, MergeAction};

use super::schema::SCHEMA;

const ENTRY_COLUMNS: &str = "id, entry_id, relative_number, day, content, teaser, loaded_at, \
                             read_at, bookmarked_at, updated_since_read, valid_state, uuid";

/// Result of one reconcile batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub created: Vec<Entry>,
    pub updated: usize,
}

/// The persisted entries table and its accessors.
///
/// Every mutating operation runs inside a transaction: a batch either
/// commits whole or rolls back whole, so readers only ever observe committed
/// state. Cancellation observed mid-batch rolls back and surfaces as
/// `StoreError::Cancelled`.
pub struct EntryStore {
    conn: Connection,
}

impl EntryStore {
    pub async fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Lookups

    pub async fn get_by_id(&self, entry_id: i64, include_non_normal: bool) -> Result<Option<Entry>> {
        let entry = self
            .conn
            .call(move |conn| {
                let sql = if include_non_normal {
                    format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE entry_id = ?1 ORDER BY id LIMIT 1")
                } else {
                    format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries \
                         WHERE entry_id = ?1 AND valid_state = 'normal' ORDER BY id LIMIT 1"
                    )
                };
                let mut stmt = conn.prepare(&sql)?;
                let entry = stmt
                    .query_row(params![entry_id], |row| Ok(entry_from_row(row)))
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    /// The entry with the lowest `(day, relative_number)` among normal
    /// entries, optionally skipping bookmarked ones.
    pub async fn get_oldest(&self, include_bookmarked: bool) -> Result<Option<Entry>> {
        let entry = self
            .conn
            .call(move |conn| {
                let sql = if include_bookmarked {
                    format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries WHERE valid_state = 'normal' \
                         ORDER BY day ASC, relative_number ASC LIMIT 1"
                    )
                } else {
                    format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries \
                         WHERE valid_state = 'normal' AND bookmarked_at IS NULL \
                         ORDER BY day ASC, relative_number ASC LIMIT 1"
                    )
                };
                let mut stmt = conn.prepare(&sql)?;
                let entry = stmt.query_row([], |row| Ok(entry_from_row(row))).optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    #[allow(dead_code)]
    pub async fn get_youngest_before(&self, day: NaiveDate) -> Result<Option<Entry>> {
        let day = day.to_string();
        let entry = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries \
                     WHERE valid_state = 'normal' AND day < ?1 \
                     ORDER BY day DESC, relative_number DESC LIMIT 1"
                ))?;
                let entry = stmt
                    .query_row(params![day], |row| Ok(entry_from_row(row)))
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    /// The next entry in `(day, relative_number)` order, with a
    /// direction-aware tie-break on equal days.
    #[allow(dead_code)]
    pub async fn get_neighbor(&self, entry: &Entry, direction: Direction) -> Result<Option<Entry>> {
        let day = entry.day.to_string();
        let relative_number = entry.relative_number;
        let neighbor = self
            .conn
            .call(move |conn| {
                let sql = match direction {
                    Direction::Older => format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries \
                         WHERE valid_state = 'normal' \
                           AND (day < ?1 OR (day = ?1 AND relative_number < ?2)) \
                         ORDER BY day DESC, relative_number DESC LIMIT 1"
                    ),
                    Direction::Newer => format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries \
                         WHERE valid_state = 'normal' \
                           AND (day > ?1 OR (day = ?1 AND relative_number > ?2)) \
                         ORDER BY day ASC, relative_number ASC LIMIT 1"
                    ),
                };
                let mut stmt = conn.prepare(&sql)?;
                let entry = stmt
                    .query_row(params![day, relative_number], |row| Ok(entry_from_row(row)))
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(neighbor)
    }

    /// Newest normal entries first, for list display.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Entry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries WHERE valid_state = 'normal' \
                     ORDER BY day DESC, relative_number DESC LIMIT ?1"
                ))?;
                let entries = stmt
                    .query_map(params![limit as i64], |row| Ok(entry_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    pub async fn count_in_state(&self, state: ValidState) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE valid_state = ?1",
                    params![state.as_str()],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    // Reconciliation

    /// Merge one month's candidates into the store, atomically.
    ///
    /// Each candidate is matched against the existing entry of the target
    /// state with the same id and resolved to create/update/no-op. The whole
    /// batch commits or nothing does; a cancellation signal observed between
    /// items rolls back and returns `StoreError::Cancelled`.
    pub async fn reconcile_batch(
        &self,
        candidates: Vec<CandidateEntry>,
        valid_state: ValidState,
        cancel: CancellationToken,
    ) -> Result<BatchOutcome> {
        let now = Utc::now();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut created = Vec::new();
                let mut updated = 0usize;
                let mut cancelled = false;

                {
                    let mut find = tx.prepare(&format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries \
                         WHERE entry_id = ?1 AND valid_state = ?2 ORDER BY id LIMIT 1"
                    ))?;

                    for candidate in &candidates {
                        if cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }

                        let existing = find
                            .query_row(params![candidate.entry_id, valid_state.as_str()], |row| {
                                Ok(entry_from_row(row))
                            })
                            .optional()?;

                        let action = merge_candidate(existing.as_ref(), candidate);
                        match (action, existing) {
                            (MergeAction::Create, _) => {
                                let uuid = Uuid::new_v4();
                                tx.execute(
                                    "INSERT INTO entries (entry_id, relative_number, day, content, \
                                     teaser, loaded_at, updated_since_read, valid_state, uuid) \
                                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
                                    params![
                                        candidate.entry_id,
                                        candidate.relative_number,
                                        candidate.day.to_string(),
                                        candidate.content,
                                        candidate.teaser,
                                        now.to_rfc3339(),
                                        valid_state.as_str(),
                                        uuid.to_string(),
                                    ],
                                )?;
                                created.push(Entry {
                                    id: tx.last_insert_rowid(),
                                    entry_id: candidate.entry_id,
                                    relative_number: candidate.relative_number,
                                    day: candidate.day,
                                    content: candidate.content.clone(),
                                    teaser: candidate.teaser.clone(),
                                    loaded_at: now,
                                    read_at: None,
                                    bookmarked_at: None,
                                    updated_since_read: false,
                                    valid_state,
                                    uuid,
                                });
                            }
                            (
                                MergeAction::Update {
                                    replace_content,
                                    updated_since_read,
                                },
                                Some(existing),
                            ) => {
                                if replace_content {
                                    tx.execute(
                                        "UPDATE entries SET content = ?2, teaser = ?3, \
                                         relative_number = ?4, updated_since_read = ?5 WHERE id = ?1",
                                        params![
                                            existing.id,
                                            candidate.content,
                                            candidate.teaser,
                                            candidate.relative_number,
                                            updated_since_read,
                                        ],
                                    )?;
                                } else {
                                    tx.execute(
                                        "UPDATE entries SET relative_number = ?2 WHERE id = ?1",
                                        params![existing.id, candidate.relative_number],
                                    )?;
                                }
                                updated += 1;
                            }
                            _ => {}
                        }
                    }
                }

                if cancelled {
                    tx.rollback()?;
                    return Ok(None);
                }
                tx.commit()?;
                Ok(Some(BatchOutcome { created, updated }))
            })
            .await?;

        outcome.ok_or_else(|| StoreError::Cancelled.into())
    }

    // Deduplication

    /// Collapse duplicate rows per id, one transaction per id-group.
    ///
    /// Copies are read in row-id order; the merge plan comes from
    /// `sync::dedupe`. Returns the number of rows deleted. Re-running after
    /// convergence is a no-op.
    pub async fn dedupe(&self, entry_ids: Vec<i64>) -> Result<usize> {
        let removed = self
            .conn
            .call(move |conn| {
                let mut removed = 0usize;
                for entry_id in entry_ids {
                    let tx = conn.transaction()?;
                    let copies = {
                        let mut stmt = tx.prepare(&format!(
                            "SELECT {ENTRY_COLUMNS} FROM entries \
                             WHERE entry_id = ?1 AND valid_state = 'normal' ORDER BY id ASC"
                        ))?;
                        let rows = stmt
                            .query_map(params![entry_id], |row| Ok(entry_from_row(row)))?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    };

                    if let Some(plan) = plan_merge(&copies) {
                        tx.execute(
                            "UPDATE entries SET bookmarked_at = ?2, read_at = ?3 WHERE id = ?1",
                            params![
                                plan.canonical,
                                plan.bookmarked_at.map(|t| t.to_rfc3339()),
                                plan.read_at.map(|t| t.to_rfc3339()),
                            ],
                        )?;
                        for row_id in &plan.remove {
                            tx.execute("DELETE FROM entries WHERE id = ?1", params![row_id])?;
                        }
                        tracing::debug!(
                            "deduplicated entry {}: kept row {}, removed {}",
                            entry_id,
                            plan.canonical,
                            plan.remove.len()
                        );
                        removed += plan.remove.len();
                    }
                    tx.commit()?;
                }
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    // User flags

    /// Marking read records the first-read time (an already-set timestamp is
    /// kept) and acknowledges any pending content update. Marking unread
    /// clears both.
    pub async fn mark_read(&self, row_id: i64, read: bool) -> Result<()> {
        self.conn
            .call(move |conn| {
                if read {
                    conn.execute(
                        "UPDATE entries SET read_at = COALESCE(read_at, ?2), \
                         updated_since_read = 0 WHERE id = ?1",
                        params![row_id, Utc::now().to_rfc3339()],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE entries SET read_at = NULL, updated_since_read = 0 WHERE id = ?1",
                        params![row_id],
                    )?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn toggle_bookmark(&self, row_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE entries SET bookmarked_at = \
                     CASE WHEN bookmarked_at IS NULL THEN ?2 ELSE NULL END WHERE id = ?1",
                    params![row_id, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Retention

    /// Drop all temporary and search entries. They carry no durable user
    /// intent and are always safe to discard.
    pub async fn delete_non_normal(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count =
                    conn.execute("DELETE FROM entries WHERE valid_state != 'normal'", [])?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Delete normal entries posted before `cutoff_day`; bookmarked entries
    /// survive when `keep_bookmarked` is set.
    pub async fn delete_older_than(
        &self,
        cutoff_day: NaiveDate,
        keep_bookmarked: bool,
    ) -> Result<usize> {
        let cutoff = cutoff_day.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count = if keep_bookmarked {
                    conn.execute(
                        "DELETE FROM entries WHERE valid_state = 'normal' \
                         AND day < ?1 AND bookmarked_at IS NULL",
                        params![cutoff],
                    )?
                } else {
                    conn.execute(
                        "DELETE FROM entries WHERE valid_state = 'normal' AND day < ?1",
                        params![cutoff],
                    )?
                };
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    #[allow(dead_code)]
    pub async fn clear_all(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM entries", [])?;
                conn.execute("DELETE FROM sync_tokens", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Search and preview snapshots

    /// Replace the previous search session's scratch entries with fresh
    /// snapshots of the normal entries matching `query`.
    pub async fn search_snapshot(
        &self,
        query: String,
        cancel: CancellationToken,
    ) -> Result<Vec<Entry>> {
        let now = Utc::now();
        let snapshots = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM entries WHERE valid_state = 'search'", [])?;

                let pattern = format!("%{query}%");
                let matches = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries \
                         WHERE valid_state = 'normal' AND (content LIKE ?1 OR teaser LIKE ?1) \
                         ORDER BY day DESC, relative_number DESC"
                    ))?;
                    let rows = stmt
                        .query_map(params![pattern], |row| Ok(entry_from_row(row)))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                };

                let mut snapshots = Vec::with_capacity(matches.len());
                for entry in matches {
                    if cancel.is_cancelled() {
                        tx.rollback()?;
                        return Ok(None);
                    }
                    let uuid = Uuid::new_v4();
                    tx.execute(
                        "INSERT INTO entries (entry_id, relative_number, day, content, teaser, \
                         loaded_at, read_at, bookmarked_at, updated_since_read, valid_state, uuid) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'search', ?10)",
                        params![
                            entry.entry_id,
                            entry.relative_number,
                            entry.day.to_string(),
                            entry.content,
                            entry.teaser,
                            now.to_rfc3339(),
                            entry.read_at.map(|t| t.to_rfc3339()),
                            entry.bookmarked_at.map(|t| t.to_rfc3339()),
                            entry.updated_since_read,
                            uuid.to_string(),
                        ],
                    )?;
                    snapshots.push(Entry {
                        id: tx.last_insert_rowid(),
                        loaded_at: now,
                        valid_state: ValidState::Search,
                        uuid,
                        ..entry
                    });
                }

                tx.commit()?;
                Ok(Some(snapshots))
            })
            .await?;

        snapshots.ok_or_else(|| StoreError::Cancelled.into())
    }

    /// Persist a single-permalink preview, replacing any earlier preview of
    /// the same entry. Previews never pass through reconciliation.
    pub async fn insert_temporary(&self, candidate: CandidateEntry) -> Result<Entry> {
        let now = Utc::now();
        let entry = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM entries WHERE entry_id = ?1 AND valid_state = 'temporary'",
                    params![candidate.entry_id],
                )?;
                let uuid = Uuid::new_v4();
                tx.execute(
                    "INSERT INTO entries (entry_id, relative_number, day, content, teaser, \
                     loaded_at, updated_since_read, valid_state, uuid) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 'temporary', ?7)",
                    params![
                        candidate.entry_id,
                        candidate.relative_number,
                        candidate.day.to_string(),
                        candidate.content,
                        candidate.teaser,
                        now.to_rfc3339(),
                        uuid.to_string(),
                    ],
                )?;
                let entry = Entry {
                    id: tx.last_insert_rowid(),
                    entry_id: candidate.entry_id,
                    relative_number: candidate.relative_number,
                    day: candidate.day,
                    content: candidate.content,
                    teaser: candidate.teaser,
                    loaded_at: now,
                    read_at: None,
                    bookmarked_at: None,
                    updated_since_read: false,
                    valid_state: ValidState::Temporary,
                    uuid,
                };
                tx.commit()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    // Change cursors

    #[allow(dead_code)]
    pub async fn get_sync_token(&self, location: String) -> Result<Option<Vec<u8>>> {
        let token = self
            .conn
            .call(move |conn| {
                let token = conn
                    .query_row(
                        "SELECT token FROM sync_tokens WHERE location = ?1",
                        params![location],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(token)
            })
            .await?;
        Ok(token)
    }

    #[allow(dead_code)]
    pub async fn put_sync_token(&self, location: String, token: Vec<u8>) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO sync_tokens (location, token) VALUES (?1, ?2)",
                    params![location, token],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn entry_from_row(row: &Row) -> Entry {
    Entry {
        id: row.get(0).unwrap(),
        entry_id: row.get(1).unwrap(),
        relative_number: row.get(2).unwrap(),
        day: row
            .get::<_, String>(3)
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            .unwrap_or(NaiveDate::MIN),
        content: row.get(4).unwrap(),
        teaser: row.get(5).unwrap(),
        loaded_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        read_at: row
            .get::<_, Option<String>>(7)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        bookmarked_at: row
            .get::<_, Option<String>>(8)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        updated_since_read: row.get::<_, i64>(9).unwrap() != 0,
        valid_state: ValidState::parse(&row.get::<_, String>(10).unwrap()),
        uuid: row
            .get::<_, String>(11)
            .ok()
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(Uuid::nil),
    }
}
