//! Diagnostic command set and rendering of the `_info` artifact.

use chrono::{DateTime, FixedOffset};

use crate::clock::display_stamp;
use crate::inventory::{DeviceRecord, InfoCommand};

/// Command exporting the running configuration when a device has no override.
pub const DEFAULT_CONFIG_COMMAND: &str = "show running-config";

/// Placeholder used when a diagnostic command produced no output and no
/// error text.
pub const UNSUPPORTED_COMMAND: &str = "command not supported";

const DEFAULT_INFO_COMMANDS: [(&str, &str); 7] = [
    ("System version", "show version"),
    ("Hardware", "show system"),
    ("Interface status", "show interface brief"),
    ("Routing summary", "show ip route summary"),
    ("Uptime", "show uptime"),
    ("Memory", "show memory"),
    ("CPU", "show cpu"),
];

/// Diagnostic commands run when a device has no override, in order.
#[must_use]
pub fn default_info_commands() -> Vec<InfoCommand> {
    DEFAULT_INFO_COMMANDS
        .iter()
        .map(|(label, command)| InfoCommand::new(*label, *command))
        .collect()
}

/// Configuration-export command for `device`.
#[must_use]
pub fn config_command(device: &DeviceRecord) -> &str {
    device
        .commands
        .config
        .as_deref()
        .unwrap_or(DEFAULT_CONFIG_COMMAND)
}

/// Diagnostic commands for `device`.
#[must_use]
pub fn info_commands(device: &DeviceRecord) -> Vec<InfoCommand> {
    device
        .commands
        .system_info
        .clone()
        .unwrap_or_else(default_info_commands)
}

/// Outcome of one diagnostic command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InfoSection {
    /// Section label.
    pub label: String,
    /// Trimmed output on success, error text on failure.
    pub outcome: Result<String, String>,
}

impl InfoSection {
    /// Successful section with trimmed `output`.
    #[must_use]
    pub fn captured(label: impl Into<String>, output: &str) -> Self {
        Self {
            label: label.into(),
            outcome: Ok(output.trim().to_owned()),
        }
    }

    /// Failed section. Blank error text becomes [`UNSUPPORTED_COMMAND`].
    #[must_use]
    pub fn failed(label: impl Into<String>, error: &str) -> Self {
        let trimmed = error.trim();
        let message = if trimmed.is_empty() {
            UNSUPPORTED_COMMAND
        } else {
            trimmed
        };
        Self {
            label: label.into(),
            outcome: Err(message.to_owned()),
        }
    }
}

/// Renders the diagnostic document for `device`.
#[must_use]
pub fn render_info(
    device: &DeviceRecord,
    captured_at: &DateTime<FixedOffset>,
    sections: &[InfoSection],
) -> String {
    let mut lines = vec![
        format!("=== Device information: {} ===", device.name),
        format!("Host: {}", device.host),
        format!("Captured at: {}", display_stamp(captured_at)),
        String::new(),
    ];
    for section in sections {
        match &section.outcome {
            Ok(output) => {
                lines.push(format!("=== {} ===", section.label));
                lines.push(output.clone());
            }
            Err(error) => {
                lines.push(format!("=== {} (error) ===", section.label));
                lines.push(format!("Error: {error}"));
            }
        }
        lines.push(String::new());
    }
    lines.join("\n")
}
