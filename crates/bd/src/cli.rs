//! Clap CLI definitions for the `bd` command.
//!
//! `bd` is a thin embedding example over the `beads-storage`/`beads-query`
//! engine crates: it owns no storage logic of its own, only argument
//! parsing and terminal output.

use clap::{Args, Parser, Subcommand};

/// bd -- Dependency-aware issue tracker.
#[derive(Parser, Debug)]
#[command(
    name = "bd",
    about = "Dependency-aware issue tracker",
    long_about = "Issues chained together like beads. A lightweight issue tracker with first-class dependency support.",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Global flags available to all subcommands.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Database path (default: auto-discover .beads/*.db).
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Actor name for audit trail (default: $BD_ACTOR, git user.name, $USER).
    #[arg(long, global = true, env = "BD_ACTOR")]
    pub actor: Option<String>,

    /// Output in JSON format.
    #[arg(long, global = true)]
    pub json: bool,

    /// Read-only mode: block write operations.
    #[arg(long, global = true)]
    pub readonly: bool,

    /// Enable verbose/debug output.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output (errors only).
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// All available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a beads database in the current directory.
    Init(InitArgs),

    /// Create a new issue.
    #[command(alias = "new")]
    Create(CreateArgs),

    /// Show issue details.
    #[command(alias = "view")]
    Show(ShowArgs),

    /// List issues.
    List(ListArgs),

    /// Close an issue.
    Close(CloseArgs),

    /// Show ready work (open, no active blockers).
    Ready(ReadyArgs),

    /// Export dirty issues to `.beads/issues.jsonl`.
    Export(ExportArgs),

    /// Import issues from `.beads/issues.jsonl`.
    Import(ImportArgs),
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Arguments for `bd init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Issue prefix (default: current directory name).
    #[arg(short = 'p', long)]
    pub prefix: Option<String>,

    /// Force re-initialization even if data already exists.
    #[arg(long)]
    pub force: bool,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Arguments for `bd create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Issue title.
    pub title: String,

    /// Issue description.
    #[arg(short = 'd', long)]
    pub description: Option<String>,

    /// Issue type (bug|feature|task|epic|chore).
    #[arg(short = 't', long = "type", default_value = "task")]
    pub issue_type: String,

    /// Priority (0-4).
    #[arg(short = 'p', long, default_value = "2")]
    pub priority: i32,

    /// Assignee.
    #[arg(short = 'a', long)]
    pub assignee: Option<String>,
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

/// Arguments for `bd show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Issue ID to display.
    pub id: String,
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Arguments for `bd list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by status (open, in_progress, deferred, closed, tombstone).
    #[arg(short = 's', long)]
    pub status: Option<String>,

    /// Filter by issue type.
    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

/// Arguments for `bd close`.
#[derive(Args, Debug)]
pub struct CloseArgs {
    /// Issue ID to close.
    pub id: String,

    /// Reason for closing.
    #[arg(short = 'r', long, default_value = "")]
    pub reason: String,

    /// Force close despite unsatisfied blockers.
    #[arg(short = 'f', long)]
    pub force: bool,
}

// ---------------------------------------------------------------------------
// Ready
// ---------------------------------------------------------------------------

/// Arguments for `bd ready`.
#[derive(Args, Debug)]
pub struct ReadyArgs {
    /// Sort policy: priority, hybrid (default), oldest.
    #[arg(short = 's', long, default_value = "hybrid")]
    pub sort: String,

    /// Maximum issues to show.
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: i32,
}

// ---------------------------------------------------------------------------
// Export / Import
// ---------------------------------------------------------------------------

/// Arguments for `bd export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Error policy: strict (default), best-effort, partial, required-core.
    #[arg(long, default_value = "strict")]
    pub error_policy: String,
}

/// Arguments for `bd import`.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Orphan-dependency handling: allow (default), skip, strict, resurrect.
    #[arg(long, default_value = "allow")]
    pub orphan_handling: String,
}
