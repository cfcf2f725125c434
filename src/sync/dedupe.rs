use chrono::{DateTime, Utc};

use crate::models::Entry;

/// How to collapse one id's duplicate rows into a single canonical entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// Row id of the surviving entry.
    pub canonical: i64,
    pub bookmarked_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    /// Row ids to delete.
    pub remove: Vec<i64>,
}

/// Plan the merge for one id's copies, or `None` if there is nothing to do.
///
/// `copies` must be ordered by row id; that order is the deterministic
/// tiebreak for the "first non-null" flag merge. The earliest-fetched copy
/// wins as canonical so the oldest local discovery time is preserved, with
/// the lowest row id breaking `loaded_at` ties. Re-running the plan after it
/// has been applied yields `None`.
pub fn plan_merge(copies: &[Entry]) -> Option<MergePlan> {
    if copies.len() <= 1 {
        return None;
    }

    let canonical = copies
        .iter()
        .min_by(|a, b| a.loaded_at.cmp(&b.loaded_at).then(a.id.cmp(&b.id)))?;

    Some(MergePlan {
        canonical: canonical.id,
        bookmarked_at: copies.iter().find_map(|e| e.bookmarked_at),
        read_at: copies.iter().find_map(|e| e.read_at),
        remove: copies
            .iter()
            .filter(|e| e.id != canonical.id)
            .map(|e| e.id)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use uuid::Uuid;

    use super::*;
    use crate::models::ValidState;

    fn copy(id: i64, loaded_minute: u32) -> Entry {
        Entry {
            id,
            entry_id: 7,
            relative_number: 1,
            day: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            content: "body".to_string(),
            teaser: "body".to_string(),
            loaded_at: Utc.with_ymd_and_hms(2021, 3, 1, 12, loaded_minute, 0).unwrap(),
            read_at: None,
            bookmarked_at: None,
            updated_since_read: false,
            valid_state: ValidState::Normal,
            uuid: Uuid::nil(),
        }
    }

    #[test]
    fn single_copy_needs_no_merge() {
        assert_eq!(plan_merge(&[copy(1, 0)]), None);
        assert_eq!(plan_merge(&[]), None);
    }

    #[test]
    fn earliest_fetched_copy_wins_and_collects_flags() {
        let t1 = copy(1, 0);
        let mut t2 = copy(2, 5);
        let bookmark = Utc.with_ymd_and_hms(2021, 3, 2, 9, 0, 0).unwrap();
        t2.bookmarked_at = Some(bookmark);

        let plan = plan_merge(&[t1, t2]).unwrap();
        assert_eq!(plan.canonical, 1);
        assert_eq!(plan.bookmarked_at, Some(bookmark));
        assert_eq!(plan.read_at, None);
        assert_eq!(plan.remove, vec![2]);
    }

    #[test]
    fn first_non_null_flag_in_row_order_wins() {
        let mut a = copy(1, 3);
        let mut b = copy(2, 1);
        let mut c = copy(3, 2);
        let first = Utc.with_ymd_and_hms(2021, 3, 2, 9, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2021, 3, 3, 9, 0, 0).unwrap();
        a.read_at = Some(first);
        c.read_at = Some(second);
        b.bookmarked_at = Some(second);

        let plan = plan_merge(&[a, b, c]).unwrap();
        // Canonical is the earliest loaded copy, row 2.
        assert_eq!(plan.canonical, 2);
        assert_eq!(plan.read_at, Some(first));
        assert_eq!(plan.bookmarked_at, Some(second));
        assert_eq!(plan.remove, vec![1, 3]);
    }

    #[test]
    fn loaded_at_ties_break_on_lowest_row_id() {
        let plan = plan_merge(&[copy(4, 0), copy(9, 0)]).unwrap();
        assert_eq!(plan.canonical, 4);
        assert_eq!(plan.remove, vec![9]);
    }
}
