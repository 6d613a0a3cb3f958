//! Command handlers for the `bd` CLI.
//!
//! Each module implements one subcommand, driving the engine entirely
//! through `beads-storage`'s `Storage` trait and `beads-query`'s
//! export/import pipeline.

pub mod close;
pub mod create;
pub mod export;
pub mod import;
pub mod init;
pub mod list;
pub mod ready;
pub mod show;
