//! Scrapeline Core - incremental batch persistence of paginated extractions
//!
//! A [`Pipeline`] pulls pages from an [`ExtractionSource`], queues every
//! entity in a [`BatchAccumulator`] and writes batches through a
//! [`FlushExecutor`] into a [`PersistenceStore`], deduplicating by
//! [`IdentityKey`].

pub mod accumulator;
pub mod config;
pub mod driver;
pub mod entity;
pub mod error;
pub mod executor;
pub mod hash;
pub mod identity;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod source;
pub mod stats;
pub mod store;

// Re-exports for convenience
pub use accumulator::{BatchAccumulator, FlushOutcome};
pub use config::{DuplicatePolicy, PipelineConfig};
pub use driver::{DriveOptions, DriveOutcome, DriveSummary, PaginationDriver};
pub use entity::{AttrValue, Attributes, RawEntity, ScrapeMeta, ScrapedEntity, merge_attributes};
pub use error::{ConfigError, ExtractionError, PipelineError, StoreError, ValidationError};
pub use executor::{FlushExecutor, FlushReport, UpsertOutcome};
pub use hash::{content_hash, short_hash};
pub use identity::{IdentityKey, normalize_identity};
pub use logging::{IndicatifLogger, init_logging};
pub use pipeline::{CloseReport, Pipeline, RunReport, execute};
pub use progress::{ProgressContext, fmt_duration, fmt_num};
pub use queue::{DropReason, ErrorRecord, QueueItem};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use source::{ExtractionSource, Page};
pub use stats::StatsSnapshot;
pub use store::{EntityId, PersistenceStore, StoredEntity};
