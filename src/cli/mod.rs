//! Command-line interface definitions for the `netbackup` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `netbackup` binary.
#[derive(Debug, Parser)]
#[command(
    name = "netbackup",
    version,
    about = "Scheduled configuration backups for network device fleets over SSH"
)]
pub(crate) struct Cli {
    /// Action to perform.
    #[arg(value_enum, default_value_t = Action::Schedule)]
    pub(crate) action: Action,
}

/// Actions accepted on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum Action {
    /// Run the scheduler loop until interrupted.
    Schedule,
    /// Back up every device once and exit.
    Backup,
    /// Delete expired artifacts once and exit.
    Cleanup,
}
