//! `bd export` -- export dirty issues to `.beads/issues.jsonl`.

use anyhow::{Context, Result};

use beads_query::{export, ErrorPolicy, ExportOptions};
use beads_storage::sqlite::SqliteStore;

use crate::cli::ExportArgs;
use crate::context::RuntimeContext;
use crate::output::output_json;

/// Execute the `bd export` command.
pub fn run(ctx: &RuntimeContext, args: &ExportArgs) -> Result<()> {
    let beads_dir = ctx
        .resolve_db_path()
        .context("no beads database found. Run 'bd init' to create one.")?;
    let db_path = beads_dir.join("beads.db");
    let jsonl_path = beads_dir.join("issues.jsonl");

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;

    let error_policy = match args.error_policy.as_str() {
        "best-effort" => ErrorPolicy::BestEffort,
        "partial" => ErrorPolicy::Partial,
        "required-core" => ErrorPolicy::RequiredCore,
        _ => ErrorPolicy::Strict,
    };
    let options = ExportOptions {
        error_policy,
        ..ExportOptions::default()
    };

    let report = export(&store, &jsonl_path, &options)?;

    if ctx.json {
        output_json(&serde_json::json!({
            "exported": report.exported,
            "skipped": report.skipped,
            "failed": report.failed,
            "file_written": report.file_written,
        }));
    } else if !ctx.quiet {
        println!(
            "Exported {} issue(s), skipped {}, failed {}",
            report.exported.len(),
            report.skipped.len(),
            report.failed.len(),
        );
    }

    Ok(())
}
