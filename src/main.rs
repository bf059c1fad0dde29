use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fnug::check::{self, CheckOptions};
use fnug::config::{Config, ConfigError};
use fnug::{logging, tui};

#[derive(Parser)]
#[command(
    name = "fnug",
    about = "Run lint/test commands based on git changes",
    version = env!("FNUG_VERSION")
)]
struct Cli {
    /// Config file (default: ./.fnug.json, ./.fnug.yaml, ./.fnug.yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(long, global = true)]
    verbose: bool,

    /// Quiet output
    #[arg(long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the TUI (default)
    Run,
    /// Print the effective merged configuration as YAML
    Config,
    /// Run all auto-selected commands headlessly; exit 0 iff all succeed
    Check {
        /// Stop on the first failure
        #[arg(long)]
        fail_fast: bool,
        /// Never prompt to open the TUI on failure
        #[arg(long)]
        no_tui: bool,
        /// Suppress output for commands that pass
        #[arg(long)]
        mute_success: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::setup(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        eprintln!("fnug: {e:#}");
        return ExitCode::from(2);
    }

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("fnug: {e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli) -> Result<u8> {
    let (config, root_dir) = load_config(cli.config.as_ref())?;

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            tui::run(&config, root_dir)?;
            Ok(0)
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
            Ok(0)
        }
        Commands::Check {
            fail_fast,
            no_tui,
            mute_success,
        } => {
            let options = CheckOptions {
                fail_fast: *fail_fast,
                no_tui: *no_tui,
                mute_success: *mute_success,
            };
            Ok(check::run(&config, root_dir, options))
        }
    }
}

/// Load the config from `--config` or the default file names in the
/// current directory. The directory holding the file becomes the root
/// that command cwds and auto paths resolve against.
fn load_config(explicit: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    let cwd = std::env::current_dir().context("failed to determine working directory")?;

    let path = match explicit {
        Some(path) => path.clone(),
        None => Config::discover(&cwd).ok_or_else(|| {
            ConfigError::Io {
                path: cwd.join(".fnug.json"),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no .fnug.json, .fnug.yaml, or .fnug.yml found",
                ),
            }
        })?,
    };

    let config = Config::load(&path)?;
    let root_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| cwd.clone(), PathBuf::from);
    let root_dir = root_dir.canonicalize().unwrap_or(root_dir);
    Ok((config, root_dir))
}
