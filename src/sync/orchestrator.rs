use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::archive::{parse_month_page, MonthSource};
use crate::db::{BatchOutcome, EntryStore};
use crate::error::Result;
use crate::models::{ArchiveMonth, Entry, ValidState};

/// Where a sync operation currently is. Published on a watch channel so a
/// presentation layer can show progress without being called back into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Reconciling,
    Failed,
}

/// What a refresh/load-older run produced. `cancelled` means the run was
/// superseded and stopped cleanly; nothing was committed by the interrupted
/// part.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub created: Vec<Entry>,
    pub cancelled: bool,
}

impl SyncOutcome {
    fn interrupted() -> Self {
        Self {
            created: Vec::new(),
            cancelled: true,
        }
    }
}

/// At most one in-flight operation per class; starting a new one cancels
/// the previous token.
struct SingleFlight {
    current: Mutex<CancellationToken>,
}

impl SingleFlight {
    fn new() -> Self {
        Self {
            current: Mutex::new(CancellationToken::new()),
        }
    }

    fn begin(&self) -> CancellationToken {
        let mut current = self.current.lock().expect("single-flight lock poisoned");
        current.cancel();
        let token = CancellationToken::new();
        *current = token.clone();
        token
    }
}

/// Drives the fetch → parse → reconcile pipeline against the store.
///
/// Owns its collaborators outright; refresh/load-older share one
/// single-flight class, search has its own, and all dedup work funnels
/// through a single gate so merges of shared rows never interleave.
pub struct SyncService<S: MonthSource> {
    store: EntryStore,
    source: S,
    epoch: ArchiveMonth,
    can_load_more: AtomicBool,
    sync_flight: SingleFlight,
    search_flight: SingleFlight,
    dedupe_gate: tokio::sync::Mutex<()>,
    phase_tx: watch::Sender<SyncPhase>,
}

impl<S: MonthSource> SyncService<S> {
    pub fn new(store: EntryStore, source: S, epoch: ArchiveMonth) -> Self {
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            source,
            epoch,
            can_load_more: AtomicBool::new(true),
            sync_flight: SingleFlight::new(),
            search_flight: SingleFlight::new(),
            dedupe_gate: tokio::sync::Mutex::new(()),
            phase_tx,
        }
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn can_load_more(&self) -> bool {
        self.can_load_more.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn phases(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&self, phase: SyncPhase) {
        let _ = self.phase_tx.send(phase);
    }

    /// Load the current calendar month. Always runs, even once the archive
    /// boundary has been reached going backward.
    pub async fn refresh(&self) -> Result<SyncOutcome> {
        let cancel = self.sync_flight.begin();
        self.load_current_month(&cancel).await
    }

    /// Step backward one month at a time until a month yields new entries
    /// or the archive epoch is reached. An empty store degenerates to
    /// `refresh`.
    pub async fn load_older(&self) -> Result<SyncOutcome> {
        let cancel = self.sync_flight.begin();

        let anchor = match self.store.get_oldest(false).await? {
            Some(entry) => Some(entry),
            // Everything is bookmarked; anchor on the oldest entry outright.
            None => self.store.get_oldest(true).await?,
        };
        let Some(anchor) = anchor else {
            return self.load_current_month(&cancel).await;
        };

        let mut month = ArchiveMonth::of(anchor.day).pred();
        loop {
            if month < self.epoch {
                self.can_load_more.store(false, Ordering::SeqCst);
                tracing::debug!("reached archive epoch {}", self.epoch);
                return Ok(SyncOutcome::default());
            }
            if cancel.is_cancelled() {
                return Ok(SyncOutcome::interrupted());
            }

            match self.sync_month(month, &cancel).await {
                Ok(batch) if !batch.created.is_empty() => {
                    let created = self.dedupe_created(batch.created).await?;
                    return Ok(SyncOutcome {
                        created,
                        cancelled: false,
                    });
                }
                // Nothing new in this month; keep walking.
                Ok(_) => month = month.pred(),
                Err(e) if e.is_cancelled() => return Ok(SyncOutcome::interrupted()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn load_current_month(&self, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let month = ArchiveMonth::of(Utc::now().date_naive());
        match self.sync_month(month, cancel).await {
            Ok(batch) => {
                let created = self.dedupe_created(batch.created).await?;
                Ok(SyncOutcome {
                    created,
                    cancelled: false,
                })
            }
            Err(e) if e.is_cancelled() => Ok(SyncOutcome::interrupted()),
            Err(e) => Err(e),
        }
    }

    async fn sync_month(&self, month: ArchiveMonth, cancel: &CancellationToken) -> Result<BatchOutcome> {
        self.set_phase(SyncPhase::Fetching);
        let (page_url, html) = match self.source.fetch_month(month).await {
            Ok(page) => page,
            Err(e) => {
                self.set_phase(SyncPhase::Failed);
                return Err(e.into());
            }
        };

        let candidates = match parse_month_page(&html, &page_url) {
            Ok(candidates) => candidates,
            Err(e) => {
                self.set_phase(SyncPhase::Failed);
                return Err(e.into());
            }
        };
        tracing::debug!("month {} parsed into {} candidates", month, candidates.len());

        self.set_phase(SyncPhase::Reconciling);
        match self
            .store
            .reconcile_batch(candidates, ValidState::Normal, cancel.clone())
            .await
        {
            Ok(batch) => {
                self.set_phase(SyncPhase::Idle);
                Ok(batch)
            }
            Err(e) if e.is_cancelled() => {
                self.set_phase(SyncPhase::Idle);
                Err(e)
            }
            Err(e) => {
                self.set_phase(SyncPhase::Failed);
                Err(e)
            }
        }
    }

    /// Restore the one-normal-entry-per-id invariant for freshly created
    /// ids, then drop creations that lost the merge: their id already
    /// existed via another write path, so they are not new to the caller.
    async fn dedupe_created(&self, created: Vec<Entry>) -> Result<Vec<Entry>> {
        if created.is_empty() {
            return Ok(created);
        }
        let _gate = self.dedupe_gate.lock().await;
        self.store
            .dedupe(created.iter().map(|e| e.entry_id).collect())
            .await?;

        let mut survivors = Vec::with_capacity(created.len());
        for entry in created {
            if let Some(current) = self.store.get_by_id(entry.entry_id, false).await? {
                if current.uuid == entry.uuid {
                    survivors.push(current);
                }
            }
        }
        Ok(survivors)
    }

    /// Materialize search-state snapshots of stored entries matching
    /// `query`, superseding the previous search session.
    pub async fn search(&self, query: &str) -> Result<Vec<Entry>> {
        let cancel = self.search_flight.begin();
        match self.store.search_snapshot(query.to_string(), cancel).await {
            Ok(hits) => Ok(hits),
            Err(e) if e.is_cancelled() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Fetch one entry's permalink page and persist it as a disposable
    /// temporary snapshot, bypassing reconciliation.
    pub async fn preview(&self, entry_id: i64) -> Result<Option<Entry>> {
        let (page_url, html) = self.source.fetch_entry(entry_id).await?;
        let candidate = parse_month_page(&html, &page_url)?
            .into_iter()
            .find(|c| c.entry_id == entry_id);

        let Some(candidate) = candidate else {
            tracing::warn!("permalink page for {:x} held no matching entry", entry_id);
            return Ok(None);
        };
        Ok(Some(self.store.insert_temporary(candidate).await?))
    }

    pub async fn toggle_read(&self, entry: &Entry) -> Result<()> {
        self.store.mark_read(entry.id, entry.read_at.is_none()).await
    }

    pub async fn toggle_bookmark(&self, entry: &Entry) -> Result<()> {
        self.store.toggle_bookmark(entry.id).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use url::Url;

    use super::*;
    use crate::error::FetchError;
    use crate::models::CandidateEntry;

    struct StubSource {
        pages: HashMap<String, String>,
        entry_pages: HashMap<i64, String>,
        log: Arc<StdMutex<Vec<String>>>,
        fail: bool,
    }

    impl StubSource {
        fn new(pages: Vec<(ArchiveMonth, String)>) -> Self {
            Self {
                pages: pages.into_iter().map(|(m, html)| (m.key(), html)).collect(),
                entry_pages: HashMap::new(),
                log: Arc::new(StdMutex::new(Vec::new())),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl MonthSource for StubSource {
        async fn fetch_month(
            &self,
            month: ArchiveMonth,
        ) -> std::result::Result<(Url, String), FetchError> {
            if self.fail {
                return Err(FetchError::Http(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
            }
            self.log.lock().unwrap().push(month.key());
            let html = self
                .pages
                .get(&month.key())
                .cloned()
                .unwrap_or_else(|| "<html><body></body></html>".to_string());
            Ok((Url::parse("https://archive.test/archive.cgi").unwrap(), html))
        }

        async fn fetch_entry(
            &self,
            entry_id: i64,
        ) -> std::result::Result<(Url, String), FetchError> {
            let html = self
                .entry_pages
                .get(&entry_id)
                .cloned()
                .unwrap_or_else(|| "<html><body></body></html>".to_string());
            Ok((Url::parse("https://archive.test/archive.cgi").unwrap(), html))
        }
    }

    fn month_page(days: &[(NaiveDate, Vec<i64>)]) -> String {
        let mut body = String::new();
        for (day, ids) in days {
            body.push_str(&format!("<h2>{}</h2>", day.format("%a %b %d %Y")));
            for id in ids {
                body.push_str(&format!(
                    r##"<li><a href="?ts={id:x}">#</a> entry {id:x}</li>"##
                ));
            }
        }
        format!("<html><body><ul>{body}</ul></body></html>")
    }

    async fn build(
        source: StubSource,
        epoch: ArchiveMonth,
    ) -> (
        tempfile::TempDir,
        SyncService<StubSource>,
        Arc<StdMutex<Vec<String>>>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::open(dir.path().join("entries.db").to_str().unwrap())
            .await
            .unwrap();
        let log = source.log.clone();
        (dir, SyncService::new(store, source, epoch), log)
    }

    fn this_month() -> ArchiveMonth {
        ArchiveMonth::of(Utc::now().date_naive())
    }

    fn epoch() -> ArchiveMonth {
        ArchiveMonth::new(2000, 1).unwrap()
    }

    async fn seed_entry(service: &SyncService<StubSource>, entry_id: i64, day: NaiveDate) {
        service
            .store()
            .reconcile_batch(
                vec![CandidateEntry {
                    entry_id,
                    day,
                    relative_number: 1,
                    content: "seeded".to_string(),
                    teaser: "seeded".to_string(),
                }],
                ValidState::Normal,
                CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_persists_the_current_month_once() {
        let month = this_month();
        let page = month_page(&[(month.first_day(), vec![0x1, 0x2])]);
        let (_dir, service, _log) = build(StubSource::new(vec![(month, page)]), epoch()).await;

        let first = service.refresh().await.unwrap();
        assert_eq!(first.created.len(), 2);
        assert!(!first.cancelled);

        let second = service.refresh().await.unwrap();
        assert!(second.created.is_empty());
    }

    #[tokio::test]
    async fn load_older_on_an_empty_store_behaves_like_refresh() {
        let month = this_month();
        let page = month_page(&[(month.first_day(), vec![0xaa])]);
        let (_dir, service, log) = build(StubSource::new(vec![(month, page)]), epoch()).await;

        let outcome = service.load_older().await.unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec![this_month().key()]);
    }

    #[tokio::test]
    async fn load_older_walks_back_until_a_month_yields_entries() {
        let month = this_month();
        let m1 = month.pred();
        let m2 = m1.pred();
        let m3 = m2.pred();
        // m1 and m2 are historically empty; m3 has content.
        let pages = vec![(m3, month_page(&[(m3.first_day(), vec![0x5, 0x6])]))];
        let (_dir, service, log) = build(StubSource::new(pages), epoch()).await;
        seed_entry(&service, 0x1, month.first_day()).await;

        let outcome = service.load_older().await.unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(*log.lock().unwrap(), vec![m1.key(), m2.key(), m3.key()]);
        assert!(service.can_load_more());
    }

    #[tokio::test]
    async fn load_older_stops_cleanly_at_the_archive_epoch() {
        let month = this_month();
        let (_dir, service, log) = build(StubSource::new(Vec::new()), month).await;
        seed_entry(&service, 0x1, month.first_day()).await;

        let outcome = service.load_older().await.unwrap();
        assert!(outcome.created.is_empty());
        assert!(!outcome.cancelled);
        assert!(!service.can_load_more());
        // The month before the epoch was never requested.
        assert!(log.lock().unwrap().is_empty());

        // refresh still runs once the boundary is reached.
        service.refresh().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![month.key()]);
    }

    #[tokio::test]
    async fn load_older_anchors_past_bookmarked_entries() {
        let month = this_month();
        let m1 = month.pred();
        let (_dir, service, log) = build(StubSource::new(Vec::new()), m1.pred()).await;

        // Oldest entry is bookmarked, so the walk anchors on the younger one.
        seed_entry(&service, 0x1, m1.first_day()).await;
        seed_entry(&service, 0x2, month.first_day()).await;
        let oldest = service.store().get_by_id(0x1, false).await.unwrap().unwrap();
        service.toggle_bookmark(&oldest).await.unwrap();

        let outcome = service.load_older().await.unwrap();
        assert!(outcome.created.is_empty());
        assert_eq!(log.lock().unwrap().first(), Some(&m1.key()));
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_as_an_error_and_failed_phase() {
        let mut source = StubSource::new(Vec::new());
        source.fail = true;
        let (_dir, service, _log) = build(source, epoch()).await;
        let phases = service.phases();

        let result = service.refresh().await;
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_cancelled());
        assert_eq!(*phases.borrow(), SyncPhase::Failed);
    }

    #[tokio::test]
    async fn preview_materializes_a_temporary_snapshot() {
        let month = this_month();
        let mut source = StubSource::new(Vec::new());
        source.entry_pages.insert(
            0x2a,
            month_page(&[(month.first_day(), vec![0x2a])]),
        );
        let (_dir, service, _log) = build(source, epoch()).await;

        let entry = service.preview(0x2a).await.unwrap().unwrap();
        assert_eq!(entry.valid_state, ValidState::Temporary);
        assert_eq!(entry.entry_id, 0x2a);

        // An id the permalink page does not actually contain yields nothing.
        assert!(service.preview(0x99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_supersedes_the_previous_session() {
        let month = this_month();
        let page = month_page(&[(month.first_day(), vec![0x1, 0x2])]);
        let (_dir, service, _log) = build(StubSource::new(vec![(month, page)]), epoch()).await;
        service.refresh().await.unwrap();

        let hits = service.search("entry 1").await.unwrap();
        assert_eq!(hits.len(), 1);
        let hits = service.search("entry 2").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            service.store().count_in_state(ValidState::Search).await.unwrap(),
            1
        );
    }

    #[test]
    fn single_flight_cancels_the_previous_operation() {
        let flight = SingleFlight::new();
        let first = flight.begin();
        let second = flight.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!flight.begin().is_cancelled());
        assert!(second.is_cancelled());
    }
}
