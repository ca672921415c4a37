//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::backup::DEFAULT_CONFIG_COMMAND;
use crate::config::BackupConfig;
use crate::inventory::DeviceRecord;
use crate::notify::{Message, Notifier, NotifyFuture};
use crate::session::{
    CloseFuture, CommandOutput, Connector, DeviceSession, SessionError, SessionFuture,
};

/// Configuration populated with the documented defaults and no Telegram
/// credentials.
#[must_use]
pub fn baseline_config() -> BackupConfig {
    BackupConfig {
        telegram_bot_token: None,
        telegram_chat_id: None,
        telegram_api_base: String::from("https://api.telegram.org"),
        retention_days: 30,
        collect_system_info: true,
        ssh_timeout_secs: 30,
        command_timeout_secs: 120,
        max_workers: 5,
        inventory_path: String::from("config/devices.json"),
        backup_dir: String::from("backups"),
        log_dir: String::from("logs"),
        utc_offset: String::from("-03:00"),
        ssh_bin: String::from("ssh"),
        sshpass_bin: String::from("sshpass"),
        daily_backup_at: String::from("02:00"),
        weekly_backup_day: String::from("sunday"),
        weekly_backup_at: String::from("01:00"),
        cleanup_day: String::from("monday"),
        cleanup_at: String::from("03:00"),
        poll_interval_secs: 60,
    }
}

/// Builds a device record pointing at a documentation address.
#[must_use]
pub fn device(name: &str) -> DeviceRecord {
    DeviceRecord::new(name, format!("192.0.2.{}", name.len()), "backup", "secret")
}

/// Scripted behaviour for one device behind [`ScriptedConnector`].
///
/// Commands without a scripted response succeed with empty output.
#[derive(Clone, Debug, Default)]
pub struct DeviceScript {
    connect_error: Option<SessionError>,
    responses: HashMap<String, Result<CommandOutput, SessionError>>,
    open_delay: Duration,
    panic_on_open: bool,
}

impl DeviceScript {
    /// Device whose configuration export prints `config`.
    #[must_use]
    pub fn healthy(config: &str) -> Self {
        Self::default().with_output(DEFAULT_CONFIG_COMMAND, CommandOutput::success(config))
    }

    /// Device that refuses connections with `message`.
    #[must_use]
    pub fn unreachable(message: &str) -> Self {
        Self {
            connect_error: Some(SessionError::Connect {
                host: String::from("scripted"),
                message: message.to_owned(),
            }),
            ..Self::default()
        }
    }

    /// Device that connects but prints nothing for any command.
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    /// Device whose connector panics while opening the session.
    #[must_use]
    pub fn panicking() -> Self {
        Self {
            panic_on_open: true,
            ..Self::default()
        }
    }

    /// Scripts `command` to return `output`.
    #[must_use]
    pub fn with_output(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses.insert(command.to_owned(), Ok(output));
        self
    }

    /// Scripts `command` to fail with `error`.
    #[must_use]
    pub fn with_exec_error(mut self, command: &str, error: SessionError) -> Self {
        self.responses.insert(command.to_owned(), Err(error));
        self
    }

    /// Holds the session open for `delay` before it becomes usable.
    #[must_use]
    pub const fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct SessionStats {
    open: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    commands: std::sync::Mutex<Vec<(String, String)>>,
}

impl SessionStats {
    fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_open, Ordering::SeqCst);
    }

    fn record_command(&self, device: &str, command: &str) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((device.to_owned(), command.to_owned()));
    }
}

/// Connector returning scripted sessions and counting open sessions.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    scripts: HashMap<String, DeviceScript>,
    stats: Arc<SessionStats>,
}

impl ScriptedConnector {
    /// Creates a connector where every device is [`DeviceScript::silent`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `script` to the device called `name`.
    #[must_use]
    pub fn with_device(mut self, name: &str, script: DeviceScript) -> Self {
        self.scripts.insert(name.to_owned(), script);
        self
    }

    /// Largest number of sessions that were open at the same time.
    #[must_use]
    pub fn peak_open(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Sessions currently open.
    #[must_use]
    pub fn open_now(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    /// Sessions successfully opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    /// Sessions released through [`DeviceSession::close`].
    #[must_use]
    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// `(device, command)` pairs in execution order.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, String)> {
        self.stats
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn open<'a>(&'a self, device: &'a DeviceRecord) -> SessionFuture<'a, ScriptedSession> {
        Box::pin(async move {
            let script = self.scripts.get(&device.name).cloned().unwrap_or_default();
            if script.panic_on_open {
                panic!("scripted panic while connecting to {}", device.name);
            }
            if let Some(err) = script.connect_error {
                return Err(err);
            }

            self.stats.record_open();
            let session = ScriptedSession {
                device: device.name.clone(),
                responses: script.responses,
                stats: Arc::clone(&self.stats),
            };
            if !script.open_delay.is_zero() {
                tokio::time::sleep(script.open_delay).await;
            }
            Ok(session)
        })
    }
}

/// Session produced by [`ScriptedConnector`].
#[derive(Debug)]
pub struct ScriptedSession {
    device: String,
    responses: HashMap<String, Result<CommandOutput, SessionError>>,
    stats: Arc<SessionStats>,
}

impl DeviceSession for ScriptedSession {
    fn exec<'a>(&'a mut self, command: &'a str) -> SessionFuture<'a, CommandOutput> {
        Box::pin(async move {
            self.stats.record_command(&self.device, command);
            self.responses
                .get(command)
                .cloned()
                .unwrap_or_else(|| Ok(CommandOutput::success("")))
        })
    }

    fn close(self) -> CloseFuture {
        Box::pin(async move {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
            drop(self);
        })
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.stats.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Notifier that records every message and returns a fixed delivery flag.
#[derive(Clone, Debug)]
pub struct RecordingNotifier {
    messages: Arc<std::sync::Mutex<Vec<Message>>>,
    delivered: bool,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RecordingNotifier {
    /// Creates a notifier that reports `delivered` for every message.
    #[must_use]
    pub fn new(delivered: bool) -> Self {
        Self {
            messages: Arc::new(std::sync::Mutex::new(Vec::new())),
            delivered,
        }
    }

    /// Messages received so far.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, message: &'a Message) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.messages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.clone());
            self.delivered
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
