//! `bd` -- a minimal CLI embedding the beads engine.
//!
//! Parses arguments with clap, resolves the runtime context, and dispatches
//! to command handlers that drive the engine entirely through
//! `beads-storage`'s `Storage` trait and `beads-query`'s export/import
//! pipeline. No storage or business logic lives in this crate.

mod cli;
mod commands;
mod context;
mod output;

use clap::Parser;

use cli::{Cli, Commands};
use context::RuntimeContext;

fn main() {
    let cli = Cli::parse();
    let ctx = RuntimeContext::from_global_args(&cli.global);

    if ctx.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("bd=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match &cli.command {
        Commands::Init(args) => commands::init::run(&ctx, args),
        Commands::Create(args) => commands::create::run(&ctx, args),
        Commands::Show(args) => commands::show::run(&ctx, args),
        Commands::List(args) => commands::list::run(&ctx, args),
        Commands::Close(args) => commands::close::run(&ctx, args),
        Commands::Ready(args) => commands::ready::run(&ctx, args),
        Commands::Export(args) => commands::export::run(&ctx, args),
        Commands::Import(args) => commands::import::run(&ctx, args),
    };

    if let Err(e) = result {
        if cli.global.json {
            let err_json = serde_json::json!({ "error": format!("{:#}", e) });
            if let Ok(s) = serde_json::to_string_pretty(&err_json) {
                eprintln!("{}", s);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}
