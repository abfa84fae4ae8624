// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod host;
mod script;

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use counterfs_core::{FaultPolicy, FilesystemSession, FsConfig, DEFAULT_SCRATCH_CAPACITY};
use counterfs_logging::{CliLogLevel, CliLoggingArgs};
use tracing::debug;

use crate::host::{errno_of, Host};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mount an in-process counterfs and drive it with shell-like commands",
    long_about = "Mount an in-process counterfs and drive it with shell-like commands.\n\n\
        Commands: cat PATH, write PATH VALUE, touch PATH, mkdir PATH, ls [PATH], \
        stat PATH, tree, statfs. Lines starting with '#' are ignored."
)]
struct Cli {
    #[command(flatten)]
    logging: CliLoggingArgs,

    /// TOML configuration file for the mount
    #[arg(long)]
    config: Option<PathBuf>,

    /// Created files share one counter and lookups never match
    #[arg(long, conflicts_with = "config")]
    legacy: bool,

    /// JSON fault-injection policy, replacing the configured one
    #[arg(long)]
    fault_policy: Option<PathBuf>,

    /// Buffer length for each read call issued by `cat`
    #[arg(long, default_value_t = DEFAULT_SCRATCH_CAPACITY)]
    chunk_size: usize,

    /// Run this command instead of reading a script (repeatable)
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Script file to run; stdin when omitted
    script: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = cli.logging.clone().init("counterfs-shell", CliLogLevel::Warn) {
        eprintln!("warning: failed to initialize logging: {e:#}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(errno = errno_of(&e), "command failed: {e:#}");
            eprintln!("counterfs-shell: {e:#}");
            // errno values are small positive integers
            let code = errno_of(&e).and_then(|n| u8::try_from(n).ok()).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match (&cli.config, cli.legacy) {
        (Some(path), _) => FsConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        (None, true) => FsConfig::legacy_compatible(),
        (None, false) => FsConfig::default(),
    };
    if let Some(path) = &cli.fault_policy {
        config.fault = load_fault_policy(path)?;
    }
    let fs = FilesystemSession::mount(config).context("mounting counterfs")?;
    let host = Host::new(fs, cli.chunk_size)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = if !cli.commands.is_empty() {
        host.run_script(cli.commands.join("\n").as_bytes(), &mut out)
    } else if let Some(path) = &cli.script {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        host.run_script(BufReader::new(file), &mut out)
    } else {
        host.run_script(io::stdin().lock(), &mut out)
    };
    out.flush()?;

    host.into_session().unmount();
    result
}

fn load_fault_policy(path: &Path) -> Result<FaultPolicy> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    FaultPolicy::from_json_bytes(&bytes)
        .with_context(|| format!("parsing fault policy {}", path.display()))
}
