//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use stackforge::Tier;

/// Stackforge - container build plans from layered declarations
#[derive(Parser)]
#[command(name = "stackforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Declarations root (directory containing base.yaml)
    #[arg(long, global = true, env = "STACKFORGE_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve one entity and print its Dockerfile
    Resolve(ResolveArgs),

    /// Resolve several tools into one combined image
    Combine(CombineArgs),

    /// Check declared versions against synthesized build steps
    Check(CheckArgs),

    /// List declared entities
    List(ListArgs),

    /// Write the Dockerfile and build every stage
    Build(BuildArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Output format for resolved plans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Dockerfile text
    #[default]
    Text,
    /// Plan, discrepancies and fingerprint as JSON
    Json,
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Tier of the entity (base, tool, application)
    pub tier: Tier,

    /// Entity name
    pub name: String,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Runtime image for the final stage
    #[arg(long)]
    pub runtime_image: Option<String>,
}

#[derive(Args)]
pub struct CombineArgs {
    /// Tools to combine
    #[arg(required = true)]
    pub tools: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Runtime image for the final stage
    #[arg(long)]
    pub runtime_image: Option<String>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Entities to check (defaults to all tools and applications)
    pub names: Vec<String>,

    /// Exit non-zero if any discrepancy is found
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only list this tier
    pub tier: Option<Tier>,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Tier of the entity (base, tool, application)
    pub tier: Tier,

    /// Entity name (several tools build one combined image)
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Write the Dockerfile and print the schedule without building
    #[arg(long)]
    pub dry_run: bool,

    /// Number of stages to build in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Container engine to invoke
    #[arg(long)]
    pub program: Option<String>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
