//! # FreshPress CLI Module
//!
//! ## Available Commands
//!
//! - `serve` - Start the HTTP server
//! - `init` - Write a starter configuration and an empty snapshot
//! - `status` - Show store contents
//! - `export` - Write the store as a snapshot or JSON
//! - `import` - Replace the store from a snapshot or JSON file

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use freshpress_core::FreshPressError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// FreshPress - content server with a WordPress-compatible REST API
#[derive(Parser, Debug)]
#[command(name = "freshpress")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the site configuration
    #[arg(short = 'c', long, global = true, default_value = "freshpress.toml")]
    pub config: PathBuf,

    /// Snapshot file (overrides `storage.snapshot`)
    #[arg(short = 'D', long, global = true)]
    pub data: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// File format for export and import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DataFormat {
    /// Binary snapshot (header + postcard)
    Snapshot,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Write a starter configuration and an empty snapshot
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Show store contents
    Status,

    /// Export the store
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short = 't', long, value_enum, default_value = "snapshot")]
        format: DataFormat,
    },

    /// Replace the store with the contents of a file
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short = 't', long, value_enum, default_value = "snapshot")]
        format: DataFormat,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

pub async fn execute(cli: Cli) -> Result<(), FreshPressError> {
    let paths = Paths {
        config: cli.config,
        data: cli.data,
    };
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Serve { host, port }) => cmd_serve(&paths, &host, port).await,
        Some(Commands::Init { force }) => cmd_init(&paths, force),
        Some(Commands::Export { output, format }) => cmd_export(&paths, &output, format),
        Some(Commands::Import { input, format }) => cmd_import(&paths, &input, format),
        Some(Commands::Status) | None => cmd_status(&paths, json_mode),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["freshpress", "export", "-o", "out.json", "-t", "json", "--config", "site.toml"]);
        assert_eq!(cli.config, PathBuf::from("site.toml"));
        match cli.command {
            Some(Commands::Export { output, format }) => {
                assert_eq!(output, PathBuf::from("out.json"));
                assert_eq!(format, DataFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["freshpress", "serve"]);
        match cli.command {
            Some(Commands::Serve { host, port }) => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8080);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
