//! `bd close` -- close an issue.

use anyhow::{bail, Context, Result};

use beads_storage::error::StorageError;
use beads_storage::sqlite::SqliteStore;
use beads_storage::traits::Storage;

use crate::cli::CloseArgs;
use crate::context::RuntimeContext;

/// Execute the `bd close` command.
pub fn run(ctx: &RuntimeContext, args: &CloseArgs) -> Result<()> {
    if ctx.readonly {
        bail!("cannot close issues in read-only mode");
    }

    let beads_dir = ctx
        .resolve_db_path()
        .context("no beads database found. Run 'bd init' to create one.")?;
    let db_path = beads_dir.join("beads.db");
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;

    let id = store.resolve_id(&args.id)?;
    match store.close_issue(&id, &args.reason, &ctx.actor, "", args.force) {
        Ok(()) => {}
        Err(StorageError::Blocked { blockers }) => {
            bail!(
                "cannot close {id}: blocked by {}\nHint: use --force to close anyway",
                blockers.join(", ")
            );
        }
        Err(e) => return Err(e.into()),
    }

    if !ctx.quiet {
        println!("Closed {id}");
    }

    Ok(())
}
