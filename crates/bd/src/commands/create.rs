//! `bd create` -- create a new issue.

use anyhow::{bail, Context, Result};
use chrono::Utc;

use beads_core::enums::IssueType;
use beads_core::idgen;
use beads_core::issue::IssueBuilder;
use beads_storage::error::StorageError;
use beads_storage::sqlite::SqliteStore;
use beads_storage::traits::Storage;

use crate::cli::CreateArgs;
use crate::context::RuntimeContext;
use crate::output::{output_json, BeadView};

/// Execute the `bd create` command.
pub fn run(ctx: &RuntimeContext, args: &CreateArgs) -> Result<()> {
    if ctx.readonly {
        bail!("cannot create issues in read-only mode");
    }

    let beads_dir = ctx
        .resolve_db_path()
        .context("no beads database found. Run 'bd init' to create one.")?;
    let db_path = beads_dir.join("beads.db");
    if !db_path.exists() {
        bail!(
            "no beads database found at {}\nHint: run 'bd init' to create a database",
            db_path.display()
        );
    }

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;

    let prefix = store.get_config("issue_prefix").unwrap_or_else(|_| "bd".to_string());
    let issue_type = IssueType::from(args.issue_type.as_str()).normalize();
    let description = args.description.as_deref().unwrap_or("");
    let now = Utc::now();

    let stats = store.get_statistics().context("failed to read statistics")?;
    let hash_length = idgen::compute_adaptive_length(
        stats.total_issues as usize,
        idgen::adaptive_defaults::MIN_LENGTH,
        idgen::adaptive_defaults::MAX_LENGTH,
        idgen::adaptive_defaults::MAX_COLLISION_PROB,
    );

    let id = idgen::generate_unique_hash_id(
        &prefix,
        &args.title,
        description,
        &ctx.actor,
        now,
        "",
        hash_length,
        idgen::adaptive_defaults::MAX_LENGTH,
        |candidate| matches!(store.get_issue(candidate), Ok(_)),
    );

    let mut builder = IssueBuilder::new(args.title.clone())
        .id(id)
        .description(description)
        .priority(args.priority)
        .issue_type(issue_type)
        .created_by(ctx.actor.clone())
        .created_at(now)
        .updated_at(now);
    if let Some(ref assignee) = args.assignee {
        builder = builder.assignee(assignee.clone());
    }
    let issue = builder.build();

    match store.create_issue(&issue, &ctx.actor) {
        Ok(()) => {}
        Err(StorageError::Validation { field, reason }) => {
            bail!("invalid {field}: {reason}");
        }
        Err(e) => return Err(e.into()),
    }

    if ctx.json {
        output_json(&BeadView::from_issue(&issue, Vec::new()));
    } else if !ctx.quiet {
        println!("Created {}: {}", issue.id, issue.title);
    }

    Ok(())
}
