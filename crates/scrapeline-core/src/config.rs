//! Pipeline configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do when an entity's identity key already exists in the store.
///
/// Chosen once per pipeline instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Leave the stored row untouched
    #[default]
    #[serde(alias = "skip")]
    SkipIfExists,
    /// Replace the stored attributes with the incoming ones
    #[serde(alias = "overwrite")]
    OverwriteExisting,
    /// Overlay incoming non-null attributes onto the stored ones
    #[serde(alias = "merge")]
    MergeFields,
}

impl DuplicatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SkipIfExists => "skip-if-exists",
            Self::OverwriteExisting => "overwrite-existing",
            Self::MergeFields => "merge-fields",
        }
    }
}

impl std::fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" | "skip-if-exists" => Ok(Self::SkipIfExists),
            "overwrite" | "overwrite-existing" => Ok(Self::OverwriteExisting),
            "merge" | "merge-fields" => Ok(Self::MergeFields),
            other => Err(ConfigError {
                field: "duplicate_policy",
                message: format!("unknown policy {other:?} (expected skip, overwrite or merge)"),
            }),
        }
    }
}

const MAX_RETRY_DELAY_MS: u64 = 3_600_000;

/// Tunables for one pipeline instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Items per flush; reaching it triggers a flush
    pub batch_size: usize,
    /// Timer flush period; 0 disables the timer
    pub flush_interval_ms: u64,
    /// Pages to request before stopping
    pub max_pages: u32,
    /// Retries per item before it becomes a permanent error
    pub max_retries: u32,
    /// Backoff unit; a retried item waits `retry_delay_ms * retry_count`.
    /// At most one hour.
    pub retry_delay_ms: u64,
    /// Consecutive page failures that abort the run
    pub consecutive_page_failure_threshold: u32,
    pub duplicate_policy: DuplicatePolicy,
    /// Upper bound for a single page fetch
    pub page_timeout_ms: u64,
    /// Politeness delay between pages
    pub page_delay_ms: u64,
    /// Consecutive `close()` flushes that resolve no item before the rest
    /// of the queue is given up on
    pub max_drain_attempts: u32,
    /// First page number (resume support)
    pub start_page: u32,
    /// Treat a page with zero records as the end of the listing
    pub stop_on_empty_page: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_ms: 5_000,
            max_pages: 100,
            max_retries: 3,
            retry_delay_ms: 1_000,
            consecutive_page_failure_threshold: 3,
            duplicate_policy: DuplicatePolicy::SkipIfExists,
            page_timeout_ms: 30_000,
            page_delay_ms: 1_000,
            max_drain_attempts: 50,
            start_page: 1,
            stop_on_empty_page: true,
        }
    }
}

impl PipelineConfig {
    /// Reject values outside their documented ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError {
                    field,
                    message: "must be > 0".to_string(),
                });
            }
            Ok(())
        }
        positive("batch_size", self.batch_size as u64)?;
        positive("max_pages", self.max_pages.into())?;
        positive(
            "consecutive_page_failure_threshold",
            self.consecutive_page_failure_threshold.into(),
        )?;
        positive("page_timeout_ms", self.page_timeout_ms)?;
        positive("max_drain_attempts", self.max_drain_attempts.into())?;
        positive("start_page", self.start_page.into())?;
        if self.retry_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(ConfigError {
                field: "retry_delay_ms",
                message: format!("must be <= {MAX_RETRY_DELAY_MS}"),
            });
        }
        if self.start_page.checked_add(self.max_pages).is_none() {
            return Err(ConfigError {
                field: "max_pages",
                message: format!(
                    "start_page {} + max_pages {} overflows",
                    self.start_page, self.max_pages
                ),
            });
        }
        Ok(())
    }

    /// `None` when the timer is disabled
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.duplicate_policy, DuplicatePolicy::SkipIfExists);
        assert_eq!(config.flush_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "batch_size");
    }

    #[test]
    fn zero_threshold_rejected() {
        let config = PipelineConfig {
            consecutive_page_failure_threshold: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().field,
            "consecutive_page_failure_threshold"
        );
    }

    #[test]
    fn zero_interval_disables_timer() {
        let config = PipelineConfig {
            flush_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_interval(), None);
    }

    #[test]
    fn zero_retries_allowed() {
        let config = PipelineConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn huge_retry_delay_rejected() {
        let config = PipelineConfig {
            retry_delay_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "retry_delay_ms");
        let config = PipelineConfig {
            retry_delay_ms: MAX_RETRY_DELAY_MS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn page_range_overflow_rejected() {
        let config = PipelineConfig {
            start_page: u32::MAX,
            max_pages: 2,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "max_pages");
    }

    #[test]
    fn policy_from_str() {
        assert_eq!("skip".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::SkipIfExists));
        assert_eq!(
            "overwrite-existing".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::OverwriteExisting)
        );
        assert_eq!("merge".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::MergeFields));
        assert!("upsert".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn policy_serde_aliases() {
        #[derive(Deserialize)]
        struct Wrap {
            p: DuplicatePolicy,
        }
        let w: Wrap = serde_json::from_str(r#"{"p":"merge"}"#).unwrap();
        assert_eq!(w.p, DuplicatePolicy::MergeFields);
        let w: Wrap = serde_json::from_str(r#"{"p":"overwrite-existing"}"#).unwrap();
        assert_eq!(w.p, DuplicatePolicy::OverwriteExisting);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"batch_size": 10, "duplicate_policy": "merge-fields"}"#)
                .unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::MergeFields);
        assert_eq!(config.max_retries, 3);
    }
}
