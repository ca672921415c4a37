//! Device session contract.
//!
//! A [`Connector`] opens one [`DeviceSession`] per device. Sessions run
//! commands and must be released with [`DeviceSession::close`]; callers own
//! the session for exactly one backup job and never share it.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::inventory::DeviceRecord;

mod ssh;
mod types;

pub use ssh::{SshConnector, SshInvocation, SshSession, SshSettings};
pub use types::CommandOutput;

/// Future returned by session operations.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

/// Future returned by [`DeviceSession::close`].
pub type CloseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Errors raised while opening a session or running a command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when a helper program cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the device refuses or drops the connection.
    #[error("connection to {host} failed: {message}")]
    Connect {
        /// Device host.
        host: String,
        /// Diagnostic captured from the transport.
        message: String,
    },
    /// Raised when the connection is not established in time.
    #[error("connection to {host} timed out after {seconds}s")]
    ConnectTimeout {
        /// Device host.
        host: String,
        /// Timeout that elapsed.
        seconds: u64,
    },
    /// Raised when a command does not finish in time.
    #[error("command {command:?} timed out after {seconds}s")]
    CommandTimeout {
        /// Command that was running.
        command: String,
        /// Timeout that elapsed.
        seconds: u64,
    },
}

/// Opens sessions to devices.
pub trait Connector: Send + Sync {
    /// Session type produced by this connector.
    type Session: DeviceSession + 'static;

    /// Opens a session to `device`.
    fn open<'a>(&'a self, device: &'a DeviceRecord) -> SessionFuture<'a, Self::Session>;
}

/// An open command channel to one device.
pub trait DeviceSession: Send {
    /// Runs `command` and captures its output.
    fn exec<'a>(&'a mut self, command: &'a str) -> SessionFuture<'a, CommandOutput>;

    /// Releases the session. Implementations must also release resources
    /// when dropped without calling this.
    fn close(self) -> CloseFuture;
}
