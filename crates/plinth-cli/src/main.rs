#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use plinth_core::{Config, Mode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "plinth")]
#[command(author, version, about = "Configurable asset pipeline", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Config file to use instead of discovering one
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Build mode (defaults to NODE_ENV, then production)
    #[arg(long, global = true, value_name = "MODE")]
    mode: Option<Mode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the project into the output directory
    Build {
        /// Build in memory without writing files
        #[arg(long)]
        dry_run: bool,
    },

    /// Serve the project with incremental rebuilds and live reload
    Dev {
        /// Port to listen on (overrides devServer.port and PORT)
        #[arg(long, short)]
        port: Option<u16>,

        /// Host to bind to (overrides devServer.host)
        #[arg(long)]
        host: Option<String>,

        /// Open the browser once the server is up
        #[arg(long)]
        open: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_config_file(cli.config)
        .with_mode(cli.mode);

    if matches!(cli.command, Commands::Version) {
        return commands::version::run(cli.json);
    }

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Commands::Version => Ok(()),
        Commands::Build { dry_run } => commands::build::run(
            commands::build::BuildAction {
                config,
                write: !dry_run,
            },
            cli.json,
        ),
        Commands::Dev { port, host, open } => commands::dev::run(commands::dev::DevAction {
            config,
            port,
            host,
            open,
        }),
    }
}
