//! dyject - insert and check dylib load commands in Mach-O binaries.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use dyject::{has_load_dylib, insert_load_dylib_with, InsertOptions, LoadKind, SliceOutcome};

/// Insert and check dylib load commands in Mach-O binaries.
#[derive(Parser, Debug)]
#[command(name = "dyject")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, global = true, default_value = "1")]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert a dylib load command into every architecture slice
    Insert {
        /// Path to the Mach-O executable to patch
        binary: PathBuf,

        /// Dylib install name to insert
        /// (e.g. "@executable_path/Frameworks/Foo.framework/Foo")
        install_name: String,

        /// Insert LC_LOAD_WEAK_DYLIB so the library may be missing at load time
        #[arg(long)]
        weak: bool,
    },

    /// Check whether a binary already references a dylib
    Check {
        /// Path to the Mach-O executable to inspect
        binary: PathBuf,

        /// Dylib install name to look for
        install_name: String,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    match cli.command {
        Commands::Insert {
            binary,
            install_name,
            weak,
        } => cmd_insert(binary, &install_name, weak),
        Commands::Check {
            binary,
            install_name,
        } => cmd_check(binary, &install_name),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

fn cmd_insert(binary: PathBuf, install_name: &str, weak: bool) -> Result<ExitCode> {
    let options = InsertOptions {
        kind: if weak { LoadKind::Weak } else { LoadKind::Load },
    };

    let report = insert_load_dylib_with(&binary, install_name, options)
        .with_context(|| format!("failed to patch {}", binary.display()))?;

    for slice in &report.slices {
        match slice.outcome {
            SliceOutcome::Inserted => println!("{}: inserted {}", slice.arch, install_name),
            SliceOutcome::AlreadyPresent => println!("{}: already present", slice.arch),
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_check(binary: PathBuf, install_name: &str) -> Result<ExitCode> {
    let present = has_load_dylib(&binary, install_name)
        .with_context(|| format!("failed to read {}", binary.display()))?;

    if present {
        println!("{}: references {}", binary.display(), install_name);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}: does not reference {}", binary.display(), install_name);
        Ok(ExitCode::FAILURE)
    }
}
