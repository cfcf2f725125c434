use crate::models::{CandidateEntry, Entry};

/// What the store should do with one candidate during a reconcile batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// Unseen id: insert a fresh entry with no read/bookmark state.
    Create,
    /// Existing entry needs changes. `updated_since_read` carries the flag's
    /// final value, not a delta.
    Update {
        replace_content: bool,
        updated_since_read: bool,
    },
    Unchanged,
}

/// Decide create vs. update vs. no-op for one candidate.
///
/// Content is compared byte-for-byte. A content change on an already-read
/// entry marks it updated-since-read but never touches the read timestamp
/// itself. Identical content with a shifted `relative_number` still updates
/// the number, since edits to earlier items on the same day can move an
/// entry's position. Running the same batch twice is a no-op the second
/// time.
pub fn merge_candidate(existing: Option<&Entry>, candidate: &CandidateEntry) -> MergeAction {
    let Some(existing) = existing else {
        return MergeAction::Create;
    };

    if existing.content != candidate.content {
        MergeAction::Update {
            replace_content: true,
            updated_since_read: existing.updated_since_read || existing.read_at.is_some(),
        }
    } else if existing.relative_number != candidate.relative_number {
        MergeAction::Update {
            replace_content: false,
            updated_since_read: existing.updated_since_read,
        }
    } else {
        MergeAction::Unchanged
    }
}
