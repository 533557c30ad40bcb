//! # FreshPress - Content Server
//!
//! The main binary for FreshPress.
//!
//! This application provides:
//! - HTTP REST API server (axum-based, WordPress-compatible routes)
//! - CLI interface for site administration
//! - Snapshot persistence of the in-memory store
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                apps/freshpress (THE BINARY)           │
//! │                                                       │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐  │
//! │  │    CLI      │   │  HTTP API   │   │   oEmbed    │  │
//! │  │   (clap)    │   │   (axum)    │   │  (reqwest)  │  │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬──────┘  │
//! │         └─────────────────┼─────────────────┘         │
//! │                           ▼                           │
//! │                 ┌──────────────────┐                  │
//! │                 │  freshpress-core │                  │
//! │                 │  (THE PIPELINE)  │                  │
//! │                 └──────────────────┘                  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! freshpress init
//! freshpress serve --host 0.0.0.0 --port 8080
//! freshpress status --json-mode
//! freshpress export -o site.json -t json
//! ```

use clap::Parser;
use freshpress::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // FRESHPRESS_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("FRESHPRESS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "freshpress=debug,freshpress_core=debug,tower_http=debug"
    } else {
        "freshpress=info,freshpress_core=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  FreshPress v{}
  WordPress-compatible REST API
"#,
        env!("CARGO_PKG_VERSION")
    );
}
