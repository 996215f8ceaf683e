//! scrapeline-store: persistence store implementations
//!
//! - [`JournalStore`]: durable, append-only JSON-lines journal replayed into
//!   memory on open
//! - [`MemoryStore`]: in-process rows for dry runs and tests
//!
//! Also home of the error-record export written next to the journal.

pub mod dead_letter;
pub mod journal;
pub mod memory;

pub use dead_letter::{export_error_records, list_error_exports};
pub use journal::{CompactStats, JOURNAL_FILE, JournalStore};
pub use memory::MemoryStore;
