use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use cmdsock_transport::DEFAULT_SOCKET_PATH;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command server and print received commands.
    Listen(ListenArgs),
    /// Connect as a client and send a single command.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    #[arg(env = "CMDSOCK_PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub path: PathBuf,
    /// Exit after receiving N commands.
    #[arg(long)]
    pub count: Option<usize>,
    /// Re-broadcast every received command to all connected clients.
    #[arg(long)]
    pub echo: bool,
    /// Skip a client whose socket stays full this long (e.g. 2s, 500ms).
    #[arg(long)]
    pub write_timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    #[arg(env = "CMDSOCK_PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub path: PathBuf,
    /// Command id to send.
    #[arg(long, short = 'c')]
    pub command: u32,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one broadcast command and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
