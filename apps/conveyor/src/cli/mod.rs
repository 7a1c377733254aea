//! # Conveyor CLI Module
//!
//! This module implements the CLI interface for Conveyor.
//!
//! ## Available Commands
//!
//! - `plan` - Plan the data movement of a workflow
//! - `inspect` - Show the summary of a persisted plan
//! - `hash` - Compute BLAKE3 cryptographic hash of a persisted plan

mod commands;

use clap::{Parser, Subcommand};
use conveyor_core::PlannerError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Conveyor - data-staging planner
///
/// Decides which files move where before, between and after the jobs of a
/// workflow.
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan transfers for a workflow
    Plan {
        /// Planning request (JSON)
        #[arg(short, long)]
        request: PathBuf,

        /// Planner configuration (TOML), overrides the request's own
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the binary plan to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the refined workflow (JSON) to this file
        #[arg(long)]
        refined: Option<PathBuf>,
    },

    /// Show the summary of a persisted plan
    Inspect {
        /// Persisted plan file
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Compute BLAKE3 cryptographic hash of a persisted plan
    Hash {
        /// Persisted plan file
        #[arg(short, long)]
        plan: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), PlannerError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Plan {
            request,
            config,
            output,
            refined,
        } => cmd_plan(
            &request,
            config.as_deref(),
            output.as_deref(),
            refined.as_deref(),
            json_mode,
        )
        .map(|_| ()),
        Commands::Inspect { plan } => cmd_inspect(&plan, json_mode),
        Commands::Hash { plan } => cmd_hash(&plan, json_mode),
    }
}
