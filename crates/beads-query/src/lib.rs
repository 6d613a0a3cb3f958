//! Export and import pipeline for `.beads/issues.jsonl`.
//!
//! This crate sits on top of [`beads_storage`] and knows nothing about the
//! database internals: it drives the store through its public [`Storage`]
//! and [`Transaction`] traits, using the dirty-mark and export-hash
//! bookkeeping those traits expose to stay incremental.

pub mod export;
pub mod import;

pub use beads_storage::error::{Result, StorageError};
pub use export::{export, ErrorPolicy, ExportOptions, ExportReport};
pub use import::{import, ImportOptions, ImportReport, OrphanHandling};
