//! OpenSSH-backed sessions.
//!
//! A session is an OpenSSH control master (`ssh -M -N -S <socket>`) started
//! through `sshpass` so static passwords work without a TTY. Commands are
//! multiplexed over the control socket, and closing the session asks the
//! master to exit. The master is spawned with kill-on-drop, so a session that
//! is dropped without [`DeviceSession::close`] is still torn down.

use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CloseFuture, CommandOutput, Connector, DeviceSession, SessionError, SessionFuture};
use crate::config::BackupConfig;
use crate::inventory::DeviceRecord;

const MASTER_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable `sshpass -e` reads the password from.
const SSHPASS_ENV: &str = "SSHPASS";

/// Programs and timeouts used by [`SshConnector`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `sshpass` executable.
    pub sshpass_bin: String,
    /// Time allowed for the master connection to come up.
    pub connect_timeout: Duration,
    /// Time allowed for each command.
    pub command_timeout: Duration,
    /// Directory holding control sockets.
    pub control_dir: Utf8PathBuf,
}

impl SshSettings {
    /// Derives settings from the process configuration. Control sockets go
    /// to the system temporary directory.
    #[must_use]
    pub fn from_config(config: &BackupConfig) -> Self {
        let control_dir = Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
        Self {
            ssh_bin: config.ssh_bin.clone(),
            sshpass_bin: config.sshpass_bin.clone(),
            connect_timeout: config.ssh_timeout(),
            command_timeout: config.command_timeout(),
            control_dir,
        }
    }
}

/// Argument builder for one device's master, control, and exec calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshInvocation {
    settings: SshSettings,
    destination: String,
    host: String,
    port: u16,
    control_path: Utf8PathBuf,
}

impl SshInvocation {
    /// Builds an invocation for `device` with a fresh control socket path.
    #[must_use]
    pub fn new(settings: SshSettings, device: &DeviceRecord) -> Self {
        let socket = format!("netbackup-{}.sock", Uuid::new_v4().simple());
        let control_path = settings.control_dir.join(socket);
        Self {
            destination: format!("{}@{}", device.username, device.host),
            host: device.host.clone(),
            port: device.port,
            control_path,
            settings,
        }
    }

    /// Control socket used by this invocation.
    #[must_use]
    pub fn control_path(&self) -> &Utf8Path {
        &self.control_path
    }

    /// Arguments passed to `sshpass` to start the control master.
    #[must_use]
    pub fn master_args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-e"),
            OsString::from(&self.settings.ssh_bin),
            OsString::from("-M"),
            OsString::from("-N"),
        ];
        args.extend(self.control_options());
        for option in [
            String::from("ControlPersist=no"),
            format!(
                "ConnectTimeout={}",
                self.settings.connect_timeout.as_secs().max(1)
            ),
            String::from("StrictHostKeyChecking=no"),
            String::from("UserKnownHostsFile=/dev/null"),
            String::from("NumberOfPasswordPrompts=1"),
            String::from("PubkeyAuthentication=no"),
            String::from("PreferredAuthentications=password,keyboard-interactive"),
        ] {
            args.push(OsString::from("-o"));
            args.push(OsString::from(option));
        }
        args.push(OsString::from(&self.destination));
        args
    }

    /// Arguments asking the master whether it is ready.
    #[must_use]
    pub fn check_args(&self) -> Vec<OsString> {
        self.control_command("check")
    }

    /// Arguments asking the master to exit.
    #[must_use]
    pub fn exit_args(&self) -> Vec<OsString> {
        self.control_command("exit")
    }

    /// Arguments running `command` over the control socket.
    #[must_use]
    pub fn exec_args(&self, command: &str) -> Vec<OsString> {
        let mut args = self.control_options();
        args.push(OsString::from("-o"));
        args.push(OsString::from("BatchMode=yes"));
        args.push(OsString::from(&self.destination));
        args.push(OsString::from(command));
        args
    }

    fn control_options(&self) -> Vec<OsString> {
        vec![
            OsString::from("-S"),
            OsString::from(self.control_path.as_str()),
            OsString::from("-p"),
            OsString::from(self.port.to_string()),
        ]
    }

    fn control_command(&self, operation: &str) -> Vec<OsString> {
        let mut args = self.control_options();
        args.push(OsString::from("-O"));
        args.push(OsString::from(operation));
        args.push(OsString::from(&self.destination));
        args
    }

    fn remove_control_socket(&self) {
        match std::fs::remove_file(&self.control_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.control_path, error = %err, "failed to remove control socket");
            }
        }
    }
}

/// Opens OpenSSH control-master sessions.
#[derive(Clone, Debug)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    /// Creates a connector using the given settings.
    #[must_use]
    pub const fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Returns the connector settings.
    #[must_use]
    pub const fn settings(&self) -> &SshSettings {
        &self.settings
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    fn open<'a>(&'a self, device: &'a DeviceRecord) -> SessionFuture<'a, SshSession> {
        Box::pin(open_session(&self.settings, device))
    }
}

/// A live control-master connection to one device.
#[derive(Debug)]
pub struct SshSession {
    invocation: SshInvocation,
    master: Child,
}

impl DeviceSession for SshSession {
    fn exec<'a>(&'a mut self, command: &'a str) -> SessionFuture<'a, CommandOutput> {
        Box::pin(async move {
            let args = self.invocation.exec_args(command);
            let limit = self.invocation.settings.command_timeout;
            run_bounded(&self.invocation.settings.ssh_bin, &args, limit)
                .await?
                .ok_or_else(|| SessionError::CommandTimeout {
                    command: command.to_owned(),
                    seconds: limit.as_secs(),
                })
        })
    }

    fn close(self) -> CloseFuture {
        Box::pin(async move {
            let Self {
                invocation,
                mut master,
            } = self;
            let args = invocation.exit_args();
            match run_bounded(&invocation.settings.ssh_bin, &args, CONTROL_TIMEOUT).await {
                Ok(Some(output)) if output.is_success() => {}
                Ok(Some(output)) => {
                    debug!(host = %invocation.host, stderr = %output.stderr.trim(), "control master refused exit");
                }
                Ok(None) => debug!(host = %invocation.host, "control master exit timed out"),
                Err(err) => debug!(host = %invocation.host, error = %err, "control master exit failed"),
            }

            if timeout(CONTROL_TIMEOUT, master.wait()).await.is_err() {
                master.kill().await.ok();
            }
            invocation.remove_control_socket();
        })
    }
}

async fn open_session(
    settings: &SshSettings,
    device: &DeviceRecord,
) -> Result<SshSession, SessionError> {
    let invocation = SshInvocation::new(settings.clone(), device);
    let mut command = Command::new(&settings.sshpass_bin);
    command
        .args(invocation.master_args())
        .env(SSHPASS_ENV, &device.password)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut master = command
        .spawn()
        .map_err(|err| SessionError::Spawn {
            program: settings.sshpass_bin.clone(),
            message: err.to_string(),
        })?;

    let deadline = Instant::now() + settings.connect_timeout;
    loop {
        if master.try_wait().ok().flatten().is_some() {
            let message = master_failure_message(master).await;
            invocation.remove_control_socket();
            return Err(SessionError::Connect {
                host: device.host.clone(),
                message,
            });
        }

        let ready = matches!(
            run_bounded(&settings.ssh_bin, &invocation.check_args(), CONTROL_TIMEOUT).await,
            Ok(Some(ref output)) if output.is_success()
        );
        if ready {
            debug!(device = %device.name, host = %device.host, "session established");
            return Ok(SshSession { invocation, master });
        }

        if Instant::now() >= deadline {
            master.kill().await.ok();
            invocation.remove_control_socket();
            return Err(SessionError::ConnectTimeout {
                host: device.host.clone(),
                seconds: settings.connect_timeout.as_secs(),
            });
        }
        sleep(MASTER_POLL_INTERVAL).await;
    }
}

async fn master_failure_message(master: Child) -> String {
    let stderr = match master.wait_with_output().await {
        Ok(output) => String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        Err(err) => err.to_string(),
    };
    if stderr.is_empty() {
        String::from("ssh exited before the session was established")
    } else {
        stderr
    }
}

/// Runs `program`, returning `Ok(None)` when `limit` elapses first.
async fn run_bounded(
    program: &str,
    args: &[OsString],
    limit: Duration,
) -> Result<Option<CommandOutput>, SessionError> {
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    match timeout(limit, command.output()).await {
        Ok(Ok(output)) => Ok(Some(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })),
        Ok(Err(err)) => Err(SessionError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        }),
        Err(_) => Ok(None),
    }
}
