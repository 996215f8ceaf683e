//! Extraction source contract

use std::future::Future;
use std::sync::Arc;

use crate::entity::RawEntity;
use crate::error::ExtractionError;

/// Result of extracting one page.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    /// Records in the order the source produced them
    Records(Vec<RawEntity>),
    /// No further pages are available
    End,
}

/// Yields raw records page by page.
///
/// Each call re-extracts the page; there is no resumable cursor.
pub trait ExtractionSource: Send + Sync {
    fn fetch_page(&self, page: u32) -> impl Future<Output = Result<Page, ExtractionError>> + Send;
}

impl<S: ExtractionSource> ExtractionSource for Arc<S> {
    fn fetch_page(&self, page: u32) -> impl Future<Output = Result<Page, ExtractionError>> + Send {
        (**self).fetch_page(page)
    }
}
