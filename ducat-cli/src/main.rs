//! Ducat CLI - companion tool for operating a Ducat TAXII 2.1 server.
//!
//! Everything here works on local files. Hash passwords for the auth
//! table, generate a starter data tree for the memory backend, and
//! sanity-check a server configuration before deploying it.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "Exit codes:
  0   success
  1   general error
  65  invalid data (configuration or seed file did not parse)
  66  an input file could not be read
  73  refused to overwrite an existing file
  74  an output file could not be written";

#[derive(Parser)]
#[command(name = "ducat")]
#[command(author, version, about = "Companion tool for the Ducat TAXII 2.1 server")]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Suppress decorative output, print bare results only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// When to use colored output
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash a password for the server's user table
    HashPassword {
        /// The password to hash
        #[arg(value_name = "PASSWORD")]
        password: String,
    },

    /// Write a starter data tree for the memory backend
    InitData {
        /// Where to write the seed file
        #[arg(value_name = "FILE", default_value = "ducat-data.json")]
        output: PathBuf,

        /// Title for the generated collection
        #[arg(long, default_value = "High Value Indicator Collection")]
        collection_title: String,

        /// Overwrite the output file if it already exists
        #[arg(long)]
        force: bool,
    },

    /// Validate a server configuration file and report what it selects
    CheckConfig {
        /// Path to the JSON configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
        ColorChoice::Auto => {}
    }

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::HashPassword { password } => {
            commands::hash_password::execute(&password, cli.quiet)
        }
        Commands::InitData {
            output,
            collection_title,
            force,
        } => commands::init_data::execute(&output, &collection_title, force, cli.quiet),
        Commands::CheckConfig { config } => commands::check_config::execute(&config, cli.quiet),
    };

    if let Err(err) = result {
        let exit = ExitCode::from_anyhow(&err);
        if let Some(message) = &exit.message {
            eprintln!("{} {message}", "error:".red().bold());
        }
        std::process::exit(exit.code);
    }
}
