//! Stackforge CLI - container build plans from layered declarations

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use stackforge::GlobalContext;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("stackforge=debug")
    } else {
        EnvFilter::new("stackforge=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let mut ctx = GlobalContext::new()?;
    if let Some(root) = &cli.root {
        ctx = ctx.with_root(root);
    }
    ctx.set_verbose(cli.verbose);
    ctx.set_color(!cli.no_color && std::io::stderr().is_terminal());

    // Execute command
    match cli.command {
        Commands::Resolve(args) => commands::resolve::execute(args, &ctx),
        Commands::Combine(args) => commands::combine::execute(args, &ctx),
        Commands::Check(args) => commands::check::execute(args, &ctx),
        Commands::List(args) => commands::list::execute(args, &ctx),
        Commands::Build(args) => commands::build::execute(args, &ctx),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
