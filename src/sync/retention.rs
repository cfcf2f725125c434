use chrono::{Datelike, Months, NaiveDate, Utc};

use crate::db::EntryStore;
use crate::error::Result;
use crate::models::ValidState;

/// How `cleanup` should prune. `keep_months` feeds the default cutoff when
/// `delete_old` is set.
#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    pub delete_old: bool,
    pub keep_bookmarks: bool,
    pub keep_months: u32,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            delete_old: false,
            keep_bookmarks: true,
            keep_months: 6,
        }
    }
}

pub fn start_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).expect("day 1 exists in every month")
}

/// The default age cutoff: `keep_months` calendar months before `today`.
pub fn default_cutoff(today: NaiveDate, keep_months: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(keep_months))
        .unwrap_or(today)
}

/// Prune the store. Scratch entries (temporary previews, stale search
/// snapshots) always go; old normal entries only when `delete_old` is set,
/// and bookmarked ones survive unless `keep_bookmarks` is off. Returns the
/// number of deleted rows.
pub async fn cleanup(store: &EntryStore, opts: &CleanupOptions) -> Result<usize> {
    let mut removed = store.delete_non_normal().await?;

    if opts.delete_old {
        let cutoff = default_cutoff(Utc::now().date_naive(), opts.keep_months);
        removed += store
            .delete_older_than(start_of_month(cutoff), opts.keep_bookmarks)
            .await?;
    }

    let remaining = store.count_in_state(ValidState::Normal).await?;
    tracing::info!("cleanup removed {} entries, {} remain", removed, remaining);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_of_month_floors_the_day() {
        let day = NaiveDate::from_ymd_opt(2021, 3, 17).unwrap();
        assert_eq!(start_of_month(day), NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
    }

    #[test]
    fn default_cutoff_walks_calendar_months() {
        let today = NaiveDate::from_ymd_opt(2021, 3, 17).unwrap();
        assert_eq!(
            default_cutoff(today, 6),
            NaiveDate::from_ymd_opt(2020, 9, 17).unwrap()
        );
    }

    #[test]
    fn default_cutoff_clamps_month_length() {
        // Six months before Aug 31 lands in February, which is shorter.
        let today = NaiveDate::from_ymd_opt(2021, 8, 31).unwrap();
        assert_eq!(
            default_cutoff(today, 6),
            NaiveDate::from_ymd_opt(2021, 2, 28).unwrap()
        );
    }
}
