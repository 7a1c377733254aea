//! # Conveyor - Data-Staging Planner
//!
//! The main binary for the Conveyor transfer planner.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            apps/conveyor (THE BINARY)         │
//! │                                               │
//! │  ┌──────────────┐      ┌──────────────────┐   │
//! │  │     CLI      │      │  Request Loader  │   │
//! │  │   (clap)     │      │  (JSON + TOML)   │   │
//! │  └──────┬───────┘      └────────┬─────────┘   │
//! │         └───────────┬───────────┘             │
//! │                     ▼                         │
//! │             ┌───────────────┐                 │
//! │             │ conveyor-core │                 │
//! │             │  (THE LOGIC)  │                 │
//! │             └───────────────┘                 │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! conveyor plan --request request.json --config conveyor.toml --output plan.bin
//! conveyor inspect --plan plan.bin
//! conveyor hash --plan plan.bin
//! ```

use clap::Parser;
use conveyor::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // CONVEYOR_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("CONVEYOR_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "conveyor=debug,conveyor_core=debug"
    } else {
        "conveyor=info,conveyor_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Conveyor startup banner.
fn print_banner() {
    println!(
        r#"
  conveyor v{}
  deterministic data staging for workflows
"#,
        env!("CARGO_PKG_VERSION")
    );
}
