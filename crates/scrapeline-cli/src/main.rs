//! scrapeline - incremental batch persistence for paginated listings
//!
//! Walks a paginated source page by page and upserts every record into a
//! local journal store in size- and time-triggered batches.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "scrapeline")]
#[command(about = "Incremental batch persistence for paginated listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./scrapeline.toml or ~/.config/scrapeline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Paginate a source into the store
    Run(cmd::run::RunArgs),
    /// List stored rows and error exports, or compact the journal
    Inspect(cmd::inspect::InspectArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(scrapeline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, the spinner shows activity
    //   non-TTY: info unless --debug
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    scrapeline_core::init_logging(quiet, cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Inspect(args) => cmd::inspect::run(args, &config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let p = &config.pipeline;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            let source = match (&config.source.dir, &config.source.url) {
                (Some(dir), _) => dir.display().to_string(),
                (None, Some(url)) => url.clone(),
                (None, None) => "not set".to_string(),
            };
            table.add_row(vec!["Source", &source]);
            table.add_row(vec!["Identity field", &config.source.identity_field]);
            table.add_row(vec![
                "Source token",
                if config.source.token.is_some() {
                    "configured"
                } else {
                    "not set"
                },
            ]);
            table.add_row(vec![
                "Store directory",
                &config.store.dir.display().to_string(),
            ]);
            table.add_row(vec!["Batch size", &p.batch_size.to_string()]);
            table.add_row(vec![
                "Flush interval",
                &match p.flush_interval() {
                    Some(_) => format!("{}ms", p.flush_interval_ms),
                    None => "disabled".to_string(),
                },
            ]);
            table.add_row(vec![
                "Pages",
                &format!("{} from page {}", p.max_pages, p.start_page),
            ]);
            table.add_row(vec![
                "Retries",
                &format!("{} ({}ms backoff step)", p.max_retries, p.retry_delay_ms),
            ]);
            table.add_row(vec!["Duplicate policy", p.duplicate_policy.as_str()]);
            table.add_row(vec![
                "Page timeout / delay",
                &format!("{}ms / {}ms", p.page_timeout_ms, p.page_delay_ms),
            ]);
            table.add_row(vec![
                "Abort after",
                &format!(
                    "{} consecutive page failures",
                    p.consecutive_page_failure_threshold
                ),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
