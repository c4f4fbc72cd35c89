// ============================================================================
// options.rs — Command-line arguments (CLI)
// ============================================================================

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Update targets from a project manifest (the default if no subcommand is given)
    Update {
        /// Target key strings to update (default: every target the project declares)
        targets: Vec<String>,

        /// Variable override in `[qualifier]name<op>value` form, e.g. `!config.cxx.coptions+=-O2`
        #[arg(short = 'o', long = "override", value_name = "OVERRIDE")]
        overrides: Vec<String>,

        /// Simulate the update: report what would change without touching the out tree
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Keep building independent targets after one fails
        #[arg(short = 'k', long)]
        keep_going: bool,

        /// Maximum number of targets to update concurrently (default: number of CPUs)
        #[arg(short = 'j', long = "jobs")]
        jobs: Option<usize>,

        /// Stream child diagnostics immediately instead of buffering per target
        #[arg(long)]
        no_diag_buffer: bool,
    },

    /// Remove the recorded output of targets without rebuilding them
    Clean {
        /// Target key strings to clean (default: every target the project declares)
        targets: Vec<String>,
    },
}

#[derive(Parser, Debug)]
#[command(name = "kl")]
#[command(about = "kiln - a graph-oriented, incremental, parallel build engine core", long_about = None)]
pub struct BuildOptions {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Project manifest path
    #[arg(short, long, value_name = "FILE", default_value = "project.toml", global = true)]
    pub config: PathBuf,

    /// Persisted config.build path (default: alongside the manifest)
    #[arg(long, value_name = "FILE", global = true)]
    pub config_build: Option<PathBuf>,

    /// Verbose output (debug-level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode: only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl BuildOptions {
    /// The log level filter implied by `-v`/`-q`, used when the project's
    /// own `RUST_LOG`-style environment variable isn't set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}
