//! Pages stored as files: `{dir}/page-0001.json`, `page-0002.json`, ...
//!
//! A page file holds either a JSON array of record objects or one object per
//! line. The first missing page file ends the listing.

use std::path::{Path, PathBuf};

use scrapeline_core::{ExtractionError, ExtractionSource, Page, RawEntity};

use crate::record::{DEFAULT_IDENTITY_FIELD, raw_entity_from_json};

pub struct DirectorySource {
    dir: PathBuf,
    identity_field: String,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
        }
    }

    /// Read each record's identity from `field` instead of `url`.
    pub fn identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory must exist and be readable.
    pub fn check(&self) -> Result<(), ExtractionError> {
        std::fs::read_dir(&self.dir)?;
        Ok(())
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        self.dir.join(format!("page-{page:04}.json"))
    }

    fn parse_page(&self, text: &str) -> Result<Vec<RawEntity>, ExtractionError> {
        if text.trim_start().starts_with('[') {
            let values: Vec<serde_json::Value> = serde_json::from_str(text)?;
            return values
                .into_iter()
                .map(|v| raw_entity_from_json(v, &self.identity_field))
                .collect();
        }
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                let value: serde_json::Value = serde_json::from_str(line)
                    .map_err(|e| ExtractionError::Parse(format!("line {}: {e}", i + 1)))?;
                raw_entity_from_json(value, &self.identity_field)
            })
            .collect()
    }
}

impl ExtractionSource for DirectorySource {
    async fn fetch_page(&self, page: u32) -> Result<Page, ExtractionError> {
        let path = self.page_path(page);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Page::End),
            Err(e) => return Err(e.into()),
        };
        let records = self
            .parse_page(&text)
            .map_err(|e| ExtractionError::Parse(format!("{}: {e}", path.display())))?;
        log::debug!("{}: {} records", path.display(), records.len());
        Ok(Page::Records(records))
    }
}
