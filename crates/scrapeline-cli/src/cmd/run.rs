//! `scrapeline run` - paginate a source into the store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use scrapeline_core::{
    DuplicatePolicy, ExtractionError, ExtractionSource, Page, PersistenceStore, PipelineConfig,
    ProgressContext, RunReport, execute, fmt_duration, fmt_num,
};
use scrapeline_sources::{DirectorySource, HttpJsonSource};
use scrapeline_store::{JournalStore, MemoryStore, export_error_records};

use crate::config::Config;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Directory of page-NNNN.json files
    #[arg(long, conflicts_with = "source_url")]
    pub source_dir: Option<PathBuf>,

    /// Paginated JSON endpoint
    #[arg(long)]
    pub source_url: Option<String>,

    /// Store directory (journal + error exports)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Items per flush
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pages to request
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// First page to request
    #[arg(long)]
    pub start_page: Option<u32>,

    /// Timer flush period in ms (0 disables)
    #[arg(long)]
    pub flush_interval_ms: Option<u64>,

    /// What to do with identities already in the store: skip, overwrite or merge
    #[arg(long)]
    pub policy: Option<DuplicatePolicy>,

    /// Persist into memory only; nothing is written
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Config file values with command-line overrides applied.
    fn pipeline_config(&self, base: &PipelineConfig) -> PipelineConfig {
        let mut config = base.clone();
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(n) = self.max_pages {
            config.max_pages = n;
        }
        if let Some(n) = self.start_page {
            config.start_page = n;
        }
        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval_ms = ms;
        }
        if let Some(policy) = self.policy {
            config.duplicate_policy = policy;
        }
        config
    }
}

/// Source selected from flags or config.
enum Source {
    Directory(DirectorySource),
    Http(HttpJsonSource),
}

impl Source {
    fn from_args(args: &RunArgs, config: &Config) -> Result<Self> {
        let cfg = &config.source;
        // a flag replaces the configured source entirely
        let (dir, url) = match (&args.source_dir, &args.source_url) {
            (None, None) => (cfg.dir.clone(), cfg.url.clone()),
            (dir, url) => (dir.clone(), url.clone()),
        };
        match (dir, url) {
            (Some(dir), None) => {
                let source = DirectorySource::new(dir).identity_field(&cfg.identity_field);
                source
                    .check()
                    .with_context(|| format!("cannot read {}", source.dir().display()))?;
                Ok(Self::Directory(source))
            }
            (None, Some(url)) => {
                let source = HttpJsonSource::new(url)
                    .context("cannot build HTTP client")?
                    .page_param(&cfg.page_param)
                    .items_field(&cfg.items_field)
                    .identity_field(&cfg.identity_field)
                    .bearer_token(cfg.token.clone());
                Ok(Self::Http(source))
            }
            (Some(_), Some(_)) => anyhow::bail!("[source] sets both dir and url; pick one"),
            (None, None) => {
                anyhow::bail!("no source configured (use --source-dir or --source-url)")
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Directory(s) => s.dir().display().to_string(),
            Self::Http(s) => s.base_url().to_string(),
        }
    }
}

impl ExtractionSource for Source {
    async fn fetch_page(&self, page: u32) -> Result<Page, ExtractionError> {
        match self {
            Self::Directory(s) => s.fetch_page(page).await,
            Self::Http(s) => s.fetch_page(page).await,
        }
    }
}

pub fn run(args: RunArgs, config: &Config, progress: &ProgressContext) -> Result<()> {
    let pipeline_config = args.pipeline_config(&config.pipeline);
    pipeline_config.validate()?;
    let source = Source::from_args(&args, config)?;
    let store_dir = args.store.clone().unwrap_or_else(|| config.store.dir.clone());

    scrapeline_core::install_signal_handlers().context("failed to install signal handlers")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    log::info!(
        "{} -> {}{}",
        source.describe(),
        store_dir.display(),
        if args.dry_run { " (dry run)" } else { "" }
    );

    let pb = progress.stage_line("pages");
    let report = rt.block_on(async {
        if args.dry_run {
            run_with(pipeline_config, MemoryStore::new(), &source, &pb).await
        } else {
            let store = JournalStore::open(&store_dir)
                .with_context(|| format!("cannot open store at {}", store_dir.display()))?;
            let store = Arc::new(store);
            let report = run_with(pipeline_config, Arc::clone(&store), &source, &pb).await?;
            log::info!("store holds {} rows", fmt_num(store.len()));
            Ok(report)
        }
    })?;
    pb.finish_and_clear();

    if !args.dry_run {
        export_errors(&store_dir, &report);
    }

    if args.json {
        let json = serde_json::json!({
            "drive": report.drive,
            "stats": report.stats,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        progress.println(format!("\n{}", format_report(&report)));
    }
    Ok(())
}

/// Write the run's error records next to the journal. The run has already
/// finished, so a failed export is logged rather than returned.
fn export_errors(dir: &Path, report: &RunReport) -> Option<PathBuf> {
    match export_error_records(dir, &report.error_records, report.run_started_at) {
        Ok(Some(path)) => {
            log::warn!(
                "{} items could not be saved; payloads in {}",
                report.error_records.len(),
                path.display()
            );
            Some(path)
        }
        Ok(None) => None,
        Err(e) => {
            log::error!(
                "failed to export {} error records to {}: {e}",
                report.error_records.len(),
                dir.display()
            );
            None
        }
    }
}

async fn run_with<S: PersistenceStore>(
    config: PipelineConfig,
    store: S,
    source: &Source,
    pb: &indicatif::ProgressBar,
) -> Result<RunReport> {
    Ok(execute(config, store, source, pb).await?)
}

/// Final stats as a table.
fn format_report(report: &RunReport) -> String {
    let s = &report.stats;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Run")
                .fg(Color::Cyan)
                .add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let errors = if s.errors > 0 {
        Cell::new(fmt_num(s.errors as usize)).fg(Color::Red)
    } else {
        Cell::new("0")
    };

    table.add_row(vec![Cell::new("Pagination"), Cell::new(&report.drive.outcome)]);
    table.add_row(vec![
        Cell::new("Pages"),
        Cell::new(format!(
            "{} fetched, {} failed",
            report.drive.pages_fetched, report.drive.pages_failed
        )),
    ]);
    table.add_row(vec![Cell::new("Added"), Cell::new(fmt_num(s.added as usize))]);
    table.add_row(vec![
        Cell::new("Saved"),
        Cell::new(format!(
            "{} ({} new, {} updated, {} skipped, {} unchanged)",
            fmt_num(s.saved as usize),
            fmt_num(s.inserted as usize),
            fmt_num(s.updated as usize),
            fmt_num(s.skipped as usize),
            fmt_num(s.unchanged as usize)
        )),
    ]);
    table.add_row(vec![Cell::new("Errors"), errors]);
    table.add_row(vec![
        Cell::new("  rejected / dropped"),
        Cell::new(format!("{} / {}", s.rejected, s.dropped)),
    ]);
    table.add_row(vec![Cell::new("Retries"), Cell::new(s.retried)]);
    table.add_row(vec![Cell::new("Batches"), Cell::new(s.batches_processed)]);
    table.add_row(vec![
        Cell::new("Avg flush"),
        Cell::new(format!("{:.1}ms", s.avg_flush_latency_ms)),
    ]);
    table.add_row(vec![
        Cell::new("Elapsed"),
        Cell::new(format!(
            "{} ({:.1} saved/s)",
            fmt_duration(std::time::Duration::from_millis(s.elapsed_ms)),
            s.save_rate
        )),
    ]);
    table.to_string()
}
