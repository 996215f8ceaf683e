//! Pipeline lifecycle: `init` -> `run` -> `close`

use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::accumulator::BatchAccumulator;
use crate::config::PipelineConfig;
use crate::driver::{DriveOptions, DriveSummary, PaginationDriver};
use crate::error::PipelineError;
use crate::queue::ErrorRecord;
use crate::source::ExtractionSource;
use crate::stats::StatsSnapshot;
use crate::store::PersistenceStore;

/// Final state of a closed pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct CloseReport {
    pub stats: StatsSnapshot,
    pub error_records: Vec<ErrorRecord>,
}

/// Everything one [`execute`] call produced.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_started_at: DateTime<Utc>,
    pub drive: DriveSummary,
    pub stats: StatsSnapshot,
    pub error_records: Vec<ErrorRecord>,
}

/// One pipeline instance: a validated config, an accumulator bound to a
/// store, and a running flush timer.
pub struct Pipeline<S> {
    config: PipelineConfig,
    accumulator: BatchAccumulator<S>,
    run_started_at: DateTime<Utc>,
}

impl<S: PersistenceStore> Pipeline<S> {
    /// Validate `config`, check the store and start the flush timer.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn init(config: PipelineConfig, store: S) -> Result<Self, PipelineError> {
        config.validate()?;
        store.check().await.map_err(PipelineError::StoreUnavailable)?;

        let accumulator = BatchAccumulator::new(store, &config);
        accumulator.start_timer();
        log::debug!(
            "pipeline ready: batch {}, interval {}ms, policy {}",
            config.batch_size,
            config.flush_interval_ms,
            config.duplicate_policy
        );
        Ok(Self {
            config,
            accumulator,
            run_started_at: Utc::now(),
        })
    }

    /// Drive the source for `max_pages` pages. Persistence continues in the
    /// background; call [`Pipeline::close`] to drain.
    pub async fn run<X: ExtractionSource>(&self, source: &X, pb: &ProgressBar) -> DriveSummary {
        let driver = PaginationDriver::new(source, &self.accumulator);
        self.drive(driver, pb).await
    }

    /// Like [`Pipeline::run`] but stops when `shutdown` is raised instead of
    /// the process-wide flag.
    pub async fn run_until<X: ExtractionSource>(
        &self,
        source: &X,
        shutdown: &AtomicBool,
        pb: &ProgressBar,
    ) -> DriveSummary {
        let driver = PaginationDriver::new(source, &self.accumulator).with_shutdown_flag(shutdown);
        self.drive(driver, pb).await
    }

    async fn drive<X: ExtractionSource>(
        &self,
        driver: PaginationDriver<'_, X, S>,
        pb: &ProgressBar,
    ) -> DriveSummary {
        let opts = DriveOptions::from_config(&self.config, self.run_started_at);
        driver.run(self.config.max_pages, &opts, pb).await
    }

    pub fn accumulator(&self) -> &BatchAccumulator<S> {
        &self.accumulator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_started_at(&self) -> DateTime<Utc> {
        self.run_started_at
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.accumulator.stats()
    }

    /// Stop the timer and drain the queue.
    pub async fn close(self) -> CloseReport {
        let stats = self.accumulator.close().await;
        stats.log();
        CloseReport {
            stats,
            error_records: self.accumulator.error_records(),
        }
    }
}

/// `init`, `run` and `close` in one call.
pub async fn execute<S, X>(
    config: PipelineConfig,
    store: S,
    source: &X,
    pb: &ProgressBar,
) -> Result<RunReport, PipelineError>
where
    S: PersistenceStore,
    X: ExtractionSource,
{
    let pipeline = Pipeline::init(config, store).await?;
    let run_started_at = pipeline.run_started_at();
    let drive = pipeline.run(source, pb).await;
    pb.set_message(format!("draining {} queued", pipeline.accumulator().queue_len()));
    let CloseReport {
        stats,
        error_records,
    } = pipeline.close().await;
    Ok(RunReport {
        run_started_at,
        drive,
        stats,
        error_records,
    })
}
