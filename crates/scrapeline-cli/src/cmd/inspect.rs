//! `scrapeline inspect` - look inside a store directory

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use scrapeline_core::{fmt_num, short_hash};
use scrapeline_store::{JournalStore, list_error_exports};

use crate::config::Config;

/// Rows shown before eliding the rest
const DEFAULT_LIMIT: usize = 20;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Store directory (default: [store] dir from config)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    /// Rows to list
    #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
    pub limit: usize,

    /// Rewrite the journal with one line per row
    #[arg(long)]
    pub compact: bool,
}

pub fn run(args: InspectArgs, config: &Config) -> Result<()> {
    let dir = args.store.unwrap_or_else(|| config.store.dir.clone());
    if !dir.is_dir() {
        anyhow::bail!("no store at {}", dir.display());
    }
    let store =
        JournalStore::open(&dir).with_context(|| format!("cannot open {}", dir.display()))?;

    if args.compact {
        let stats = store.compact()?;
        eprintln!(
            "Compacted {}: {} -> {} lines",
            store.journal_path().display(),
            fmt_num(stats.lines_before as usize),
            fmt_num(stats.lines_after as usize)
        );
        return Ok(());
    }

    let rows = store.rows();
    if rows.is_empty() {
        eprintln!("Store is empty.");
    } else {
        eprintln!("\n{}", rows_table(&rows[..rows.len().min(args.limit)]));
        if rows.len() > args.limit {
            eprintln!("... {} more", fmt_num(rows.len() - args.limit));
        }
    }
    eprintln!(
        "{} rows in {} journal lines",
        fmt_num(rows.len()),
        fmt_num(store.journal_lines() as usize)
    );

    print_exports(&dir)
}

fn rows_table(rows: &[scrapeline_core::StoredEntity]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Key").fg(Color::Cyan),
            Cell::new("Fields").fg(Color::Cyan),
            Cell::new("Page").fg(Color::Cyan),
            Cell::new("Run").fg(Color::Cyan),
            Cell::new("Hash").fg(Color::Cyan),
        ]);
    for row in rows {
        table.add_row(vec![
            Cell::new(row.id),
            Cell::new(&row.key),
            Cell::new(row.attributes.len()),
            Cell::new(row.meta.page),
            Cell::new(row.meta.run_started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(short_hash(&row.content_hash)).fg(Color::DarkGrey),
        ]);
    }
    table
}

fn print_exports(dir: &Path) -> Result<()> {
    let exports = list_error_exports(dir)?;
    if exports.is_empty() {
        return Ok(());
    }
    eprintln!("\nError exports:");
    for path in &exports {
        let lines = std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0);
        eprintln!("  {} ({} items)", path.display(), lines);
    }
    Ok(())
}
