//! `bd show` -- display issue details.

use anyhow::{Context, Result};

use beads_storage::sqlite::SqliteStore;
use beads_storage::traits::Storage;

use crate::cli::ShowArgs;
use crate::context::RuntimeContext;
use crate::output::{format_issue_detail, output_json, BeadView};

/// Execute the `bd show` command.
pub fn run(ctx: &RuntimeContext, args: &ShowArgs) -> Result<()> {
    let beads_dir = ctx
        .resolve_db_path()
        .context("no beads database found. Run 'bd init' to create one.")?;
    let db_path = beads_dir.join("beads.db");
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;

    let id = store.resolve_id(&args.id)?;
    let mut issue = store.get_issue(&id)?;
    issue.labels = store.get_labels(&id)?;

    if ctx.json {
        output_json(&BeadView::from_issue_with_own_labels(&issue));
    } else {
        println!("{}", format_issue_detail(&issue));
    }

    Ok(())
}
