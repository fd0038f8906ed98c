use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum TransportKind {
    Plain,
    Encrypted,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a SQLite database through a single-writer queue")]
pub(crate) struct Args {
    /// Database file to open (created if missing).
    pub(crate) db: PathBuf,
    #[arg(long, value_enum, default_value = "encrypted")]
    pub(crate) transport: TransportKind,
    /// Bind address; defaults to the transport's loopback port.
    #[arg(long)]
    pub(crate) addr: Option<SocketAddr>,
    /// PKCS#8 file holding the server identity; generated on first run.
    #[arg(long)]
    pub(crate) key_file: Option<PathBuf>,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub(crate) commit_after_idle: Duration,
    /// Back up a changed database after this much idle time.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) backup_after_idle: Option<Duration>,
    #[arg(long)]
    pub(crate) backup_dir: Option<PathBuf>,
    #[arg(long)]
    pub(crate) backup_on_start: bool,
    #[arg(long)]
    pub(crate) no_backup_on_stop: bool,
    /// Also append log output to this file.
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long, short)]
    pub(crate) verbose: bool,
}
