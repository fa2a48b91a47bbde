use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "steward")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Apply a catalog of declared resources in dependency order", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a catalog: bring every resource to its desired state
    Apply(ApplyArgs),

    /// Show the order resources would be applied in, without applying
    Graph(GraphArgs),

    /// Check a catalog for dependency cycles and failing pre-run checks
    Check(CheckArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Catalog document (.toml or .json)
    pub catalog: PathBuf,

    /// Report what would change without changing anything
    #[arg(short, long)]
    pub noop: bool,

    /// Only apply resources with one of these tags (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Never apply resources with any of these tags (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub skip_tags: Vec<String>,

    /// Apply resources regardless of their schedule
    #[arg(long)]
    pub ignore_schedules: bool,

    /// Log one warning per container instead of one per skipped resource
    #[arg(long)]
    pub merge_dependency_warnings: bool,

    /// Apply as a network device: only device resources run
    #[arg(long)]
    pub device: bool,

    /// Exit with 2 when there were changes, 4 on failures, 6 for both
    #[arg(long)]
    pub detailed_exitcodes: bool,

    /// Print the report as JSON instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Transaction store to use instead of the one in the state directory
    #[arg(long, env = "STEWARD_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

// ============================================================================
// Graph / Check
// ============================================================================

#[derive(Args)]
pub struct GraphArgs {
    /// Catalog document (.toml or .json)
    pub catalog: PathBuf,

    /// Print the relationship graph in Graphviz dot format
    #[arg(long)]
    pub dot: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Catalog document (.toml or .json)
    pub catalog: PathBuf,

    /// Paths to show per dependency cycle
    #[arg(long, default_value = "1")]
    pub max_paths: usize,

    /// Print the dependency cycles as a Graphviz dot graph
    #[arg(long)]
    pub dot: bool,
}
