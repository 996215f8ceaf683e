//! scrapeline-sources: extraction sources feeding the pipeline
//!
//! - [`DirectorySource`]: pages pre-extracted to `page-NNNN.json` files
//! - [`HttpJsonSource`]: a paginated JSON listing endpoint

pub mod directory;
pub mod http;
pub mod record;

pub use directory::DirectorySource;
pub use http::HttpJsonSource;
pub use record::{DEFAULT_IDENTITY_FIELD, raw_entity_from_json};
