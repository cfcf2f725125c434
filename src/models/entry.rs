use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Durability class of a stored entry.
///
/// `Normal` entries are the archive mirror proper. `Temporary` entries are
/// single-permalink previews and `Search` entries are scratch copies for an
/// active search session; both are safe to discard at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidState {
    Normal,
    Temporary,
    Search,
}

impl ValidState {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidState::Normal => "normal",
            ValidState::Temporary => "temporary",
            ValidState::Search => "search",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "temporary" => ValidState::Temporary,
            "search" => ValidState::Search,
            _ => ValidState::Normal,
        }
    }
}

/// One mirrored blog entry as persisted.
///
/// `id` is the internal row identity; `entry_id` is the archive's own
/// timestamp-derived identifier (hex `ts` in permalinks). Duplicates per
/// `entry_id` can transiently coexist until deduplication runs, which is why
/// the row id, not `entry_id`, is the storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub entry_id: i64,
    /// Ordinal among entries posted on the same day, starting at 1.
    pub relative_number: i64,
    /// Calendar day of the post (UTC, day granularity).
    pub day: NaiveDate,
    pub content: String,
    pub teaser: String,
    pub loaded_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub bookmarked_at: Option<DateTime<Utc>>,
    pub updated_since_read: bool,
    pub valid_state: ValidState,
    pub uuid: Uuid,
}

impl Entry {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn is_bookmarked(&self) -> bool {
        self.bookmarked_at.is_some()
    }

    /// Reconstruct the entry's permalink on the remote archive.
    pub fn permalink(&self, archive_url: &Url) -> Url {
        let mut url = archive_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("ts", &format!("{:x}", self.entry_id));
        url
    }
}

/// A parsed-but-not-yet-persisted record extracted from one archive page.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    pub entry_id: i64,
    pub day: NaiveDate,
    pub relative_number: i64,
    pub content: String,
    pub teaser: String,
}

/// Neighbor lookup direction in `(day, relative_number)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Older,
    Newer,
}
