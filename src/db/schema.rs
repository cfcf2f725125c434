pub const SCHEMA: &str = r#"
-- entries table: the archive mirror. Rows are keyed by internal row id, not
-- by entry_id, because duplicate copies of one entry_id can transiently
-- coexist until deduplication collapses them.
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id INTEGER NOT NULL,
    relative_number INTEGER NOT NULL DEFAULT 1,
    day TEXT NOT NULL,
    content TEXT NOT NULL,
    teaser TEXT NOT NULL DEFAULT '',
    loaded_at TEXT NOT NULL DEFAULT (datetime('now')),
    read_at TEXT,
    bookmarked_at TEXT,
    updated_since_read INTEGER NOT NULL DEFAULT 0,
    valid_state TEXT NOT NULL DEFAULT 'normal',
    uuid TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_entry_id ON entries(entry_id);
CREATE INDEX IF NOT EXISTS idx_entries_day ON entries(day, relative_number);
CREATE INDEX IF NOT EXISTS idx_entries_valid_state ON entries(valid_state);

-- sync_tokens table: opaque change cursors external collaborators persist
-- to resume incremental change processing.
CREATE TABLE IF NOT EXISTS sync_tokens (
    location TEXT PRIMARY KEY,
    token BLOB NOT NULL
);
"#;
