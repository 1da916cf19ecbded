//! `salesline store` - manage the staging store

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};

use salesline_runner::PipelineConfig;
use salesline_store::{FileCheck, Store};

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Data directory (default: [store] dir)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub action: StoreAction,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// List staged stage outputs
    List,
    /// List recorded runs
    Runs,
    /// Remove entries no run references
    Gc {
        /// Actually delete (otherwise dry-run)
        #[arg(long)]
        confirm: bool,
    },
    /// Verify content hashes
    Verify {
        /// Specific input hash to verify (default: all)
        hash: Option<String>,
    },
}

pub fn run(args: StoreArgs, config: &PipelineConfig) -> Result<()> {
    let dir = args.dir.unwrap_or_else(|| config.store.dir.clone());
    let store = Store::open(&dir)?;
    match args.action {
        StoreAction::List => list(&store),
        StoreAction::Runs => runs(&store),
        StoreAction::Gc { confirm } => gc(&store, confirm),
        StoreAction::Verify { hash } => verify(&store, hash.as_deref()),
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

fn counts_text(counts: &std::collections::BTreeMap<String, u64>) -> String {
    counts
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn list(store: &Store) -> Result<()> {
    let entries = store.list()?;
    if entries.is_empty() {
        eprintln!("No staged entries.");
        return Ok(());
    }

    let mut table = super::table(&["Hash", "Stage", "Files", "Content", "Counts", "Created", "Ref"]);
    for entry in &entries {
        let ref_cell = if entry.referenced {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&entry.input_hash),
            Cell::new(entry.stage),
            Cell::new(entry.files),
            Cell::new(short(&entry.content_hash)),
            Cell::new(counts_text(&entry.counts)),
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
            ref_cell,
        ]);
    }

    eprintln!("\n{table}");
    eprintln!("{} entries total", entries.len());
    Ok(())
}

fn runs(store: &Store) -> Result<()> {
    let runs = store.runs()?;
    if runs.is_empty() {
        eprintln!("No recorded runs.");
        return Ok(());
    }

    let mut table = super::table(&["Run", "Run at", "Stages", "Counts", "Target"]);
    for run in &runs {
        let stages: Vec<_> = run.stages.keys().map(|s| s.as_str()).collect();
        table.add_row(vec![
            Cell::new(&run.run_hash),
            Cell::new(run.run_at.to_rfc3339()),
            Cell::new(stages.join(", ")),
            Cell::new(counts_text(&run.counts)),
            Cell::new(run.target.as_deref().unwrap_or("-")),
        ]);
    }
    eprintln!("\n{table}");
    Ok(())
}

fn gc(store: &Store, confirm: bool) -> Result<()> {
    if !confirm {
        let planned = store.gc(true)?;
        if planned.is_empty() {
            eprintln!("No unreferenced entries to remove.");
        } else {
            eprintln!("\nWould remove {} entries:", planned.len());
            for name in &planned {
                eprintln!("  {name}");
            }
            eprintln!("Run with --confirm to actually delete.");
        }
        return Ok(());
    }

    let removed = store.gc(false)?;
    if removed.is_empty() {
        eprintln!("Nothing to clean up.");
    } else {
        eprintln!("Removed {} entries:", removed.len());
        for name in &removed {
            eprintln!("  {name}");
        }
    }
    Ok(())
}

fn verify(store: &Store, hash: Option<&str>) -> Result<()> {
    let all = match hash {
        Some(h) => std::collections::BTreeMap::from([(h.to_string(), store.verify(h)?)]),
        None => store.verify_all()?,
    };
    if all.is_empty() {
        eprintln!("No entries to verify.");
        return Ok(());
    }

    let mut table = super::table(&["Hash", "Files", "Status"]);
    for (h, checks) in &all {
        let status = if checks.iter().all(FileCheck::ok) {
            Cell::new("OK").fg(Color::Green)
        } else {
            Cell::new("FAIL").fg(Color::Red)
        };
        table.add_row(vec![Cell::new(h), Cell::new(checks.len()), status]);
    }
    eprintln!("\n{table}");

    let mut bad = 0;
    for (h, checks) in &all {
        for check in checks.iter().filter(|c| !c.ok()) {
            bad += 1;
            eprintln!("  MISMATCH in {h}: {}", check.file);
            eprintln!("    expected: {}", short(&check.expected));
            eprintln!("    actual:   {}", check.actual.as_deref().map_or("missing", short));
        }
    }

    if bad == 0 {
        eprintln!("All entries verified OK.");
        Ok(())
    } else {
        anyhow::bail!("{bad} staged file(s) failed verification")
    }
}
