//! Pagination driver: walks extraction pages and feeds the accumulator.
//!
//! ```text
//! Idle -> FetchingPage -> Enqueueing -> FetchingPage ...
//!                      \-> Exhausted | Aborted | Interrupted
//! ```
//!
//! A failed page is logged and skipped, never retried; only a run of
//! consecutive failures reaching the configured threshold aborts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::accumulator::BatchAccumulator;
use crate::config::PipelineConfig;
use crate::entity::{ScrapeMeta, ScrapedEntity};
use crate::error::ExtractionError;
use crate::progress::fmt_num;
use crate::shutdown::shutdown_flag;
use crate::source::{ExtractionSource, Page};
use crate::store::PersistenceStore;

/// Why the driver stopped requesting pages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum DriveOutcome {
    /// `max_pages` pages were requested
    MaxPages,
    /// Source reported no further pages
    SourceEnd,
    /// A page came back with no records
    EmptyPage,
    /// Too many consecutive page failures
    Aborted {
        consecutive_failures: u32,
        last_error: String,
    },
    /// Shutdown requested between pages
    Interrupted,
}

impl DriveOutcome {
    /// Exhausted outcomes are successful ends of the listing.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::MaxPages | Self::SourceEnd | Self::EmptyPage)
    }
}

impl std::fmt::Display for DriveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxPages => write!(f, "exhausted (page limit)"),
            Self::SourceEnd => write!(f, "exhausted (no more pages)"),
            Self::EmptyPage => write!(f, "exhausted (empty page)"),
            Self::Aborted {
                consecutive_failures,
                last_error,
            } => write!(
                f,
                "aborted after {consecutive_failures} consecutive page failures ({last_error})"
            ),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Result of one driver run.
#[derive(Clone, Debug, Serialize)]
pub struct DriveSummary {
    pub pages_fetched: u32,
    pub pages_failed: u32,
    /// Entities accepted by the accumulator
    pub total_enqueued: u64,
    /// Entities refused by validation
    pub rejected: u64,
    pub last_page: Option<u32>,
    pub outcome: DriveOutcome,
}

/// Per-run paging options.
#[derive(Clone, Debug)]
pub struct DriveOptions {
    pub start_page: u32,
    pub page_timeout: Duration,
    pub page_delay: Duration,
    pub failure_threshold: u32,
    pub stop_on_empty_page: bool,
    pub run_started_at: DateTime<Utc>,
}

impl DriveOptions {
    pub fn from_config(config: &PipelineConfig, run_started_at: DateTime<Utc>) -> Self {
        Self {
            start_page: config.start_page,
            page_timeout: config.page_timeout(),
            page_delay: config.page_delay(),
            failure_threshold: config.consecutive_page_failure_threshold,
            stop_on_empty_page: config.stop_on_empty_page,
            run_started_at,
        }
    }
}

pub struct PaginationDriver<'a, X, S> {
    source: &'a X,
    accumulator: &'a BatchAccumulator<S>,
    shutdown: &'a AtomicBool,
}

impl<'a, X: ExtractionSource, S: PersistenceStore> PaginationDriver<'a, X, S> {
    pub fn new(source: &'a X, accumulator: &'a BatchAccumulator<S>) -> Self {
        Self {
            source,
            accumulator,
            shutdown: shutdown_flag(),
        }
    }

    /// Watch `flag` instead of the process-wide shutdown flag.
    pub fn with_shutdown_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = flag;
        self
    }

    /// Request pages `start_page..start_page + max_pages`, enqueueing every
    /// record in produced order. Does not wait for persistence.
    pub async fn run(&self, max_pages: u32, opts: &DriveOptions, pb: &ProgressBar) -> DriveSummary {
        let mut summary = DriveSummary {
            pages_fetched: 0,
            pages_failed: 0,
            total_enqueued: 0,
            rejected: 0,
            last_page: None,
            outcome: DriveOutcome::MaxPages,
        };
        let mut consecutive_failures = 0u32;
        let end = opts.start_page.saturating_add(max_pages);

        for page in opts.start_page..end {
            if self.shutdown.load(Ordering::Relaxed) {
                log::warn!("shutdown requested, stopping before page {page}");
                summary.outcome = DriveOutcome::Interrupted;
                break;
            }
            if page != opts.start_page && !opts.page_delay.is_zero() {
                tokio::time::sleep(opts.page_delay).await;
            }
            summary.last_page = Some(page);
            pb.set_message(format!(
                "page {page} | {} enqueued",
                fmt_num(summary.total_enqueued as usize)
            ));

            let records = match self.fetch(page, opts.page_timeout).await {
                Ok(Page::Records(records)) => records,
                Ok(Page::End) => {
                    log::info!("page {page}: source reports no further pages");
                    summary.outcome = DriveOutcome::SourceEnd;
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    summary.pages_failed += 1;
                    log::warn!(
                        "page {page}: {e} ({consecutive_failures}/{} consecutive failures)",
                        opts.failure_threshold
                    );
                    if consecutive_failures >= opts.failure_threshold {
                        log::error!("aborting run at page {page}");
                        summary.outcome = DriveOutcome::Aborted {
                            consecutive_failures,
                            last_error: e.to_string(),
                        };
                        break;
                    }
                    continue;
                }
            };

            consecutive_failures = 0;
            summary.pages_fetched += 1;
            if records.is_empty() && opts.stop_on_empty_page {
                log::info!("page {page}: empty, treating as end of listing");
                summary.outcome = DriveOutcome::EmptyPage;
                break;
            }

            let count = records.len();
            let meta = ScrapeMeta {
                page,
                run_started_at: opts.run_started_at,
            };
            for raw in records {
                match self
                    .accumulator
                    .add(ScrapedEntity::from_raw(raw, meta.clone()))
                    .await
                {
                    Ok(_) => summary.total_enqueued += 1,
                    Err(_) => summary.rejected += 1,
                }
            }
            log::debug!("page {page}: {count} records");
            pb.inc(1);
        }

        log::info!(
            "pagination {}: {} pages, {} enqueued, {} rejected, {} failed pages",
            summary.outcome,
            summary.pages_fetched,
            fmt_num(summary.total_enqueued as usize),
            summary.rejected,
            summary.pages_failed
        );
        summary
    }

    async fn fetch(&self, page: u32, timeout: Duration) -> Result<Page, ExtractionError> {
        match tokio::time::timeout(timeout, self.source.fetch_page(page)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::Timeout {
                page,
                after: timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RawEntity;
    use crate::error::StoreError;
    use crate::identity::IdentityKey;
    use crate::store::{EntityId, StoredEntity};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct NullStore {
        inserted: Mutex<Vec<String>>,
    }

    impl PersistenceStore for NullStore {
        async fn find_by_identity(
            &self,
            _key: &IdentityKey,
        ) -> Result<Option<StoredEntity>, StoreError> {
            Ok(None)
        }
        async fn insert(
            &self,
            key: &IdentityKey,
            _entity: &ScrapedEntity,
        ) -> Result<EntityId, StoreError> {
            let mut inserted = self.inserted.lock().unwrap();
            inserted.push(key.to_string());
            Ok(inserted.len() as EntityId)
        }
        async fn update(&self, _id: EntityId, _entity: &ScrapedEntity) -> Result<(), StoreError> {
            Ok(())
        }
    }

    enum Scripted {
        Records(Vec<&'static str>),
        Fail,
        Hang,
        End,
    }

    /// Source replaying a fixed script; pages past the script end the listing.
    struct ScriptSource {
        pages: HashMap<u32, Scripted>,
        calls: Mutex<Vec<u32>>,
    }

    impl ScriptSource {
        fn new(pages: Vec<(u32, Scripted)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ExtractionSource for ScriptSource {
        async fn fetch_page(&self, page: u32) -> Result<Page, ExtractionError> {
            self.calls.lock().unwrap().push(page);
            match self.pages.get(&page) {
                Some(Scripted::Records(ids)) => Ok(Page::Records(
                    ids.iter().map(|id| RawEntity::new(*id)).collect(),
                )),
                Some(Scripted::Fail) => Err(ExtractionError::Parse("bad page".into())),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Page::End)
                }
                Some(Scripted::End) | None => Ok(Page::End),
            }
        }
    }

    fn opts(threshold: u32) -> DriveOptions {
        DriveOptions {
            start_page: 1,
            page_timeout: Duration::from_secs(5),
            page_delay: Duration::ZERO,
            failure_threshold: threshold,
            stop_on_empty_page: true,
            run_started_at: Utc::now(),
        }
    }

    fn accumulator() -> BatchAccumulator<NullStore> {
        let config = PipelineConfig {
            batch_size: 100,
            flush_interval_ms: 0,
            ..Default::default()
        };
        BatchAccumulator::new(NullStore::default(), &config)
    }

    static NEVER: AtomicBool = AtomicBool::new(false);

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_pages() {
        let source = ScriptSource::new(vec![
            (1, Scripted::Records(vec!["a.example", "b.example"])),
            (2, Scripted::Records(vec!["c.example"])),
            (3, Scripted::Records(vec!["d.example"])),
        ]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let summary = driver.run(2, &opts(3), &ProgressBar::hidden()).await;
        assert_eq!(summary.outcome, DriveOutcome::MaxPages);
        assert_eq!(summary.total_enqueued, 3);
        assert_eq!(*source.calls.lock().unwrap(), vec![1, 2]);
        assert_eq!(acc.queue_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_source_ends() {
        let source = ScriptSource::new(vec![
            (1, Scripted::Records(vec!["a.example"])),
            (2, Scripted::End),
        ]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let summary = driver.run(10, &opts(3), &ProgressBar::hidden()).await;
        assert_eq!(summary.outcome, DriveOutcome::SourceEnd);
        assert!(summary.outcome.is_success());
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.last_page, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_ends_listing() {
        let source = ScriptSource::new(vec![
            (1, Scripted::Records(vec!["a.example"])),
            (2, Scripted::Records(vec![])),
            (3, Scripted::Records(vec!["b.example"])),
        ]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let summary = driver.run(10, &opts(3), &ProgressBar::hidden()).await;
        assert_eq!(summary.outcome, DriveOutcome::EmptyPage);
        assert_eq!(summary.total_enqueued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn isolated_failures_are_skipped() {
        let source = ScriptSource::new(vec![
            (1, Scripted::Fail),
            (2, Scripted::Records(vec!["a.example"])),
            (3, Scripted::Fail),
            (4, Scripted::Fail),
            (5, Scripted::Records(vec!["b.example"])),
        ]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let summary = driver.run(5, &opts(3), &ProgressBar::hidden()).await;
        assert_eq!(summary.outcome, DriveOutcome::MaxPages);
        assert_eq!(summary.pages_failed, 3);
        assert_eq!(summary.total_enqueued, 2);
        // each page requested exactly once
        assert_eq!(*source.calls.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_abort() {
        let source = ScriptSource::new(vec![
            (1, Scripted::Records(vec!["a.example"])),
            (2, Scripted::Fail),
            (3, Scripted::Fail),
            (4, Scripted::Records(vec!["b.example"])),
        ]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let summary = driver.run(10, &opts(2), &ProgressBar::hidden()).await;
        assert!(matches!(
            summary.outcome,
            DriveOutcome::Aborted {
                consecutive_failures: 2,
                ..
            }
        ));
        assert!(!summary.outcome.is_success());
        assert_eq!(summary.total_enqueued, 1);
        assert_eq!(*source.calls.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let source = ScriptSource::new(vec![
            (1, Scripted::Hang),
            (2, Scripted::Records(vec!["a.example"])),
        ]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let summary = driver.run(2, &opts(1), &ProgressBar::hidden()).await;
        match summary.outcome {
            DriveOutcome::Aborted { last_error, .. } => {
                assert!(last_error.contains("timed out"), "{last_error}")
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn politeness_delay_between_pages() {
        let source = ScriptSource::new(vec![
            (1, Scripted::Records(vec!["a.example"])),
            (2, Scripted::Records(vec!["b.example"])),
            (3, Scripted::Records(vec!["c.example"])),
        ]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let options = DriveOptions {
            page_delay: Duration::from_millis(500),
            ..opts(3)
        };
        let started = tokio::time::Instant::now();
        driver.run(3, &options, &ProgressBar::hidden()).await;
        // two gaps, no delay before the first page
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flag_interrupts() {
        static STOP: AtomicBool = AtomicBool::new(true);
        let source = ScriptSource::new(vec![(1, Scripted::Records(vec!["a.example"]))]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&STOP);
        let summary = driver.run(5, &opts(3), &ProgressBar::hidden()).await;
        assert_eq!(summary.outcome, DriveOutcome::Interrupted);
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_records_not_enqueued() {
        let source = ScriptSource::new(vec![(
            1,
            Scripted::Records(vec!["a.example", "", "https://"]),
        )]);
        let acc = accumulator();
        let driver = PaginationDriver::new(&source, &acc).with_shutdown_flag(&NEVER);
        let summary = driver.run(1, &opts(3), &ProgressBar::hidden()).await;
        assert_eq!(summary.total_enqueued, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(acc.stats().errors, 2);
    }
}
