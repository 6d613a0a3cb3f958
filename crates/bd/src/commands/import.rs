//! `bd import` -- import issues from `.beads/issues.jsonl`.

use anyhow::{bail, Context, Result};

use beads_query::{import, ImportOptions, OrphanHandling};
use beads_storage::sqlite::SqliteStore;

use crate::cli::ImportArgs;
use crate::context::RuntimeContext;
use crate::output::output_json;

/// Execute the `bd import` command.
pub fn run(ctx: &RuntimeContext, args: &ImportArgs) -> Result<()> {
    if ctx.readonly {
        bail!("cannot import in read-only mode");
    }

    let beads_dir = ctx
        .resolve_db_path()
        .context("no beads database found. Run 'bd init' to create one.")?;
    let db_path = beads_dir.join("beads.db");
    let jsonl_path = beads_dir.join("issues.jsonl");

    if !jsonl_path.exists() {
        bail!("no issues.jsonl found at {}", jsonl_path.display());
    }

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;

    let orphan_handling = match args.orphan_handling.as_str() {
        "skip" => OrphanHandling::Skip,
        "strict" => OrphanHandling::Strict,
        "resurrect" => OrphanHandling::Resurrect,
        _ => OrphanHandling::Allow,
    };
    let options = ImportOptions {
        orphan_handling,
        ..ImportOptions::default()
    };

    let report = import(&store, &jsonl_path, &options)?;

    if ctx.json {
        output_json(&serde_json::json!({
            "inserted": report.inserted,
            "updated": report.updated,
            "renamed": report.renamed,
            "skipped": report.skipped,
            "tombstoned": report.tombstoned,
            "already_up_to_date": report.already_up_to_date,
        }));
    } else if report.already_up_to_date {
        if !ctx.quiet {
            println!("Already up to date.");
        }
    } else if !ctx.quiet {
        println!(
            "Inserted {}, updated {}, renamed {}, skipped {}, tombstoned {}",
            report.inserted.len(),
            report.updated.len(),
            report.renamed.len(),
            report.skipped.len(),
            report.tombstoned.len(),
        );
    }

    Ok(())
}
