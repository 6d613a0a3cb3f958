//! `bd ready` -- show ready work items (open, no active blockers).

use anyhow::{Context, Result};

use beads_core::enums::SortPolicy;
use beads_core::filter::WorkFilter;
use beads_storage::sqlite::SqliteStore;
use beads_storage::traits::Storage;

use crate::cli::ReadyArgs;
use crate::context::RuntimeContext;
use crate::output::{format_issue_row, output_json, output_table, BeadView};

/// Execute the `bd ready` command.
pub fn run(ctx: &RuntimeContext, args: &ReadyArgs) -> Result<()> {
    let beads_dir = ctx
        .resolve_db_path()
        .context("no beads database found. Run 'bd init' to create one.")?;
    let db_path = beads_dir.join("beads.db");
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;

    let filter = WorkFilter {
        sort_policy: SortPolicy::from(args.sort.as_str()),
        limit: Some(args.limit),
        ..Default::default()
    };

    let mut issues = store.get_ready_work(&filter)?;
    for issue in &mut issues {
        issue.labels = store.get_labels(&issue.id)?;
    }

    if ctx.json {
        let views: Vec<BeadView> = issues
            .iter()
            .map(BeadView::from_issue_with_own_labels)
            .collect();
        output_json(&views);
    } else if issues.is_empty() {
        println!("No ready work.");
    } else {
        let headers = ["ID", "Priority", "Type", "Status", "Title", "Assignee"];
        let rows: Vec<Vec<String>> = issues.iter().map(format_issue_row).collect();
        output_table(&headers, &rows);
    }

    Ok(())
}
