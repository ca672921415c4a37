//! Device inventory loading.
//!
//! The inventory is a JSON document of the form `{"devices": [...]}`. Each
//! entry is validated into a [`DeviceRecord`] at load time so the rest of the
//! crate never sees a partially-specified device.

use std::collections::BTreeSet;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use thiserror::Error;

/// Default SSH port used when an inventory entry omits `port`.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Errors raised while loading the inventory file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum InventoryError {
    /// Raised when the inventory file cannot be read.
    #[error("failed to read inventory {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the inventory is not valid JSON or has the wrong shape.
    #[error("failed to parse inventory {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a device entry is missing a required value.
    #[error("device #{index} is missing {field}")]
    MissingField {
        /// Zero-based position of the entry in the `devices` array.
        index: usize,
        /// Field that was blank or absent.
        field: &'static str,
    },
    /// Raised when a device name cannot be used as a directory name.
    #[error(
        "device name {name:?} is not filesystem-safe: use ASCII letters, digits, '-', '_' or '.' and do not start with '.'"
    )]
    UnsafeName {
        /// Offending device name.
        name: String,
    },
    /// Raised when two entries share a name.
    #[error("device name {name:?} appears more than once")]
    DuplicateName {
        /// Repeated device name.
        name: String,
    },
    /// Raised when a device specifies port zero.
    #[error("device {name:?} has invalid port 0")]
    InvalidPort {
        /// Device whose port is invalid.
        name: String,
    },
}

/// Labelled diagnostic command.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct InfoCommand {
    /// Section heading written to the diagnostics artifact.
    pub label: String,
    /// Command executed on the device.
    pub command: String,
}

impl InfoCommand {
    /// Builds a labelled command.
    #[must_use]
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
        }
    }
}

/// Per-device replacements for the default command set.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct CommandOverrides {
    /// Replacement for the configuration-export command.
    #[serde(default)]
    pub config: Option<String>,
    /// Replacement for the diagnostic command list.
    #[serde(default)]
    pub system_info: Option<Vec<InfoCommand>>,
}

/// Validated, immutable description of one device.
#[derive(Clone, Eq, PartialEq)]
pub struct DeviceRecord {
    /// Unique, filesystem-safe device name.
    pub name: String,
    /// Hostname or address reachable over SSH.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Static password for the login user.
    pub password: String,
    /// Optional command overrides.
    pub commands: CommandOverrides,
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("commands", &self.commands)
            .finish()
    }
}

impl DeviceRecord {
    /// Builds a record with the default port and no overrides.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: password.into(),
            commands: CommandOverrides::default(),
        }
    }

    /// Overrides the SSH port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the command set.
    #[must_use]
    pub fn with_commands(mut self, commands: CommandOverrides) -> Self {
        self.commands = commands;
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawInventory {
    #[serde(default)]
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    commands: Option<CommandOverrides>,
}

impl RawDevice {
    fn into_record(self, index: usize) -> Result<DeviceRecord, InventoryError> {
        let name = required(self.name, index, "name")?;
        if !is_safe_name(&name) {
            return Err(InventoryError::UnsafeName { name });
        }
        let port = self.port.unwrap_or(DEFAULT_SSH_PORT);
        if port == 0 {
            return Err(InventoryError::InvalidPort { name });
        }
        Ok(DeviceRecord {
            host: required(self.host, index, "host")?,
            username: required(self.username, index, "username")?,
            password: required_raw(self.password, index, "password")?,
            port,
            commands: self.commands.unwrap_or_default(),
            name,
        })
    }
}

fn required(
    value: Option<String>,
    index: usize,
    field: &'static str,
) -> Result<String, InventoryError> {
    required_raw(value, index, field).map(|text| text.trim().to_owned())
}

// Passwords keep surrounding whitespace; only emptiness is rejected.
fn required_raw(
    value: Option<String>,
    index: usize,
    field: &'static str,
) -> Result<String, InventoryError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(InventoryError::MissingField { index, field }),
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

/// Parses inventory JSON already read into memory.
///
/// # Errors
///
/// Returns [`InventoryError`] when the document is malformed or any entry
/// fails validation.
pub fn parse_inventory(path: &Utf8Path, contents: &str) -> Result<Vec<DeviceRecord>, InventoryError> {
    let raw: RawInventory =
        serde_json::from_str(contents).map_err(|err| InventoryError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    let mut seen = BTreeSet::new();
    let mut devices = Vec::with_capacity(raw.devices.len());
    for (index, entry) in raw.devices.into_iter().enumerate() {
        let record = entry.into_record(index)?;
        if !seen.insert(record.name.clone()) {
            return Err(InventoryError::DuplicateName { name: record.name });
        }
        devices.push(record);
    }
    Ok(devices)
}

/// Reads and validates the inventory file at `path`.
///
/// # Errors
///
/// Returns [`InventoryError::Io`] when the file is missing or unreadable,
/// otherwise any error from [`parse_inventory`].
pub fn load_inventory(path: &Utf8Path) -> Result<Vec<DeviceRecord>, InventoryError> {
    let contents = read_inventory(path)?;
    parse_inventory(path, &contents)
}

fn read_inventory(path: &Utf8Path) -> Result<String, InventoryError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| InventoryError::Io {
        path: path.to_path_buf(),
        message: String::from("inventory path is missing a filename"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        InventoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;

    dir.read_to_string(file_name)
        .map_err(|err| InventoryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}
