//! Tests for the device backup job.

use super::*;
use crate::clock::Clock;
use crate::inventory::{CommandOverrides, InfoCommand};
use crate::session::{CommandOutput, SessionError};
use crate::test_support::{DeviceScript, ScriptedConnector, device};
use camino::Utf8PathBuf;
use chrono::TimeZone;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct JobFixture {
    _tmp: TempDir,
    root: Utf8PathBuf,
    clock: Clock,
}

impl JobFixture {
    fn job(&self, connector: ScriptedConnector) -> BackupJob<ScriptedConnector> {
        BackupJob::new(connector, ArtifactWriter::new(self.root.clone()), self.clock)
    }

    fn files(&self, name: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.root.join(name))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn read(&self, name: &str, file: &str) -> String {
        std::fs::read_to_string(self.root.join(name).join(file)).expect("read artifact")
    }
}

#[fixture]
fn env() -> JobFixture {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("backups")).expect("utf8 path");
    ArtifactWriter::new(root.clone()).ensure_root().expect("backup root");
    JobFixture {
        _tmp: tmp,
        root,
        clock: Clock::from_offset_str("-03:00").expect("clock"),
    }
}

#[rstest]
#[tokio::test]
async fn healthy_device_produces_config_and_info_artifacts(env: JobFixture) {
    let connector = ScriptedConnector::new().with_device(
        "core-sw1",
        DeviceScript::healthy("hostname core-sw1\n")
            .with_output("show version", CommandOutput::success("  DmOS 5.2  \n")),
    );
    let job = env.job(connector.clone());

    let result = job.run(&device("core-sw1")).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.error, None);
    assert_eq!(result.artifacts.len(), 2);
    let config_name = result.artifacts.first().expect("config artifact");
    let info_name = result.artifacts.get(1).expect("info artifact");
    assert_eq!(
        info_name.strip_suffix("_info.txt"),
        config_name.strip_suffix(".txt"),
        "both artifacts share one stamp"
    );
    assert_eq!(env.files("core-sw1"), {
        let mut expected = result.artifacts.clone();
        expected.sort();
        expected
    });
    assert_eq!(env.read("core-sw1", config_name), "hostname core-sw1\n");
    assert!(env.read("core-sw1", info_name).contains("=== System version ===\nDmOS 5.2\n"));
    assert_eq!(connector.opened(), 1);
    assert_eq!(connector.closed(), 1);
    assert_eq!(connector.open_now(), 0);
    assert!(result.started_at <= result.finished_at);
    assert_eq!(result.started_at.offset().local_minus_utc(), -3 * 3600);
}

#[rstest]
#[tokio::test]
async fn connection_failure_yields_no_artifacts(env: JobFixture) {
    let connector =
        ScriptedConnector::new().with_device("edge", DeviceScript::unreachable("no route to host"));
    let job = env.job(connector.clone());

    let result = job.run(&device("edge")).await;

    assert!(!result.success);
    assert!(result.artifacts.is_empty());
    assert!(
        matches!(result.error, Some(BackupFailure::ConnectionFailed { ref reason }) if reason.contains("no route to host")),
        "{result:?}"
    );
    assert!(env.root.join("edge").is_dir());
    assert!(env.files("edge").is_empty());
    assert_eq!(connector.opened(), 0);
}

#[rstest]
#[tokio::test]
async fn empty_config_without_diagnostics_writes_nothing(env: JobFixture) {
    let connector = ScriptedConnector::new().with_device("quiet", DeviceScript::silent());
    let job = env.job(connector.clone()).with_system_info(false);

    let result = job.run(&device("quiet")).await;

    assert!(!result.success);
    assert_eq!(result.error, Some(BackupFailure::EmptyConfig));
    assert!(result.artifacts.is_empty());
    assert!(env.root.join("quiet").is_dir());
    assert!(env.files("quiet").is_empty());
    assert_eq!(connector.closed(), 1);
}

#[rstest]
#[tokio::test]
async fn empty_config_discards_collected_diagnostics(env: JobFixture) {
    let connector = ScriptedConnector::new().with_device("quiet", DeviceScript::silent());
    let job = env.job(connector.clone());

    let result = job.run(&device("quiet")).await;

    assert!(!result.success);
    assert_eq!(result.error, Some(BackupFailure::EmptyConfig));
    assert!(result.artifacts.is_empty(), "{result:?}");
    assert!(env.files("quiet").is_empty());
    let commands = connector.commands();
    assert!(
        commands.iter().any(|(_, command)| command == "show version"),
        "diagnostics still run: {commands:?}"
    );
    assert_eq!(connector.closed(), 1);
}

#[rstest]
#[case(
    DeviceScript::default().with_output(
        DEFAULT_CONFIG_COMMAND,
        CommandOutput {
            code: Some(0),
            stdout: String::from("partial"),
            stderr: String::from("% Permission denied"),
        },
    ),
    "% Permission denied"
)]
#[case(
    DeviceScript::default().with_output(
        DEFAULT_CONFIG_COMMAND,
        CommandOutput {
            code: Some(1),
            stdout: String::from("hostname x"),
            stderr: String::new(),
        },
    ),
    "exited with status 1"
)]
#[case(
    DeviceScript::default().with_exec_error(
        DEFAULT_CONFIG_COMMAND,
        SessionError::CommandTimeout {
            command: String::from(DEFAULT_CONFIG_COMMAND),
            seconds: 120,
        },
    ),
    "timed out after 120s"
)]
#[tokio::test]
async fn config_command_errors_are_reported(
    env: JobFixture,
    #[case] script: DeviceScript,
    #[case] expected: &str,
) {
    let connector = ScriptedConnector::new().with_device("sw2", script);
    let job = env.job(connector.clone()).with_system_info(false);

    let result = job.run(&device("sw2")).await;

    assert!(!result.success);
    assert!(
        matches!(result.error, Some(BackupFailure::CommandError { ref message }) if message.contains(expected)),
        "{result:?}"
    );
    assert!(result.artifacts.is_empty());
    assert_eq!(connector.closed(), 1);
}

#[rstest]
#[tokio::test]
async fn diagnostic_failures_do_not_affect_success(env: JobFixture) {
    let script = DeviceScript::healthy("hostname sw3")
        .with_output("show version", CommandOutput::success("v1"))
        .with_output(
            "show system",
            CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::from("% Unknown command"),
            },
        )
        .with_exec_error(
            "show cpu",
            SessionError::CommandTimeout {
                command: String::from("show cpu"),
                seconds: 5,
            },
        );
    let connector = ScriptedConnector::new().with_device("sw3", script);
    let job = env.job(connector);

    let result = job.run(&device("sw3")).await;

    assert!(result.success, "{result:?}");
    let info_name = result.artifacts.get(1).expect("info artifact");
    let info = env.read("sw3", info_name);
    assert!(info.contains("=== System version ===\nv1\n"), "{info}");
    assert!(info.contains("=== Hardware (error) ===\nError: % Unknown command\n"), "{info}");
    assert!(
        info.contains("=== Uptime (error) ===\nError: command not supported\n"),
        "{info}"
    );
    assert!(info.contains("=== CPU (error) ===\nError: command \"show cpu\" timed out after 5s"));
}

#[rstest]
#[tokio::test]
async fn device_overrides_replace_default_commands(env: JobFixture) {
    let script = DeviceScript::default()
        .with_output("display current-configuration", CommandOutput::success("sysname r1"))
        .with_output("display version", CommandOutput::success("VRP 8"));
    let connector = ScriptedConnector::new().with_device("r1", script);
    let record = device("r1").with_commands(CommandOverrides {
        config: Some(String::from("display current-configuration")),
        system_info: Some(vec![InfoCommand::new("Version", "display version")]),
    });
    let job = env.job(connector.clone());

    let result = job.run(&record).await;

    assert!(result.success, "{result:?}");
    let commands: Vec<String> = connector
        .commands()
        .into_iter()
        .map(|(_, command)| command)
        .collect();
    assert_eq!(commands, ["display current-configuration", "display version"]);
}

#[rstest]
#[tokio::test]
async fn config_write_failure_is_unexpected(env: JobFixture) {
    std::fs::write(env.root.join("blocked"), "not a directory").expect("write blocker");
    let connector = ScriptedConnector::new().with_device("blocked", DeviceScript::healthy("cfg"));
    let job = env.job(connector.clone()).with_system_info(false);

    let result = job.run(&device("blocked")).await;

    assert!(!result.success);
    assert!(
        matches!(result.error, Some(BackupFailure::Unexpected { .. })),
        "{result:?}"
    );
    assert!(result.artifacts.is_empty());
    assert_eq!(connector.closed(), 1);
}

#[rstest]
#[case(BackupFailure::ConnectionFailed { reason: String::from("x") }, "CONNECTION_FAILED")]
#[case(BackupFailure::EmptyConfig, "EMPTY_CONFIG")]
#[case(BackupFailure::CommandError { message: String::from("x") }, "COMMAND_ERROR")]
#[case(BackupFailure::Unexpected { message: String::from("x") }, "UNEXPECTED")]
fn failure_codes_are_stable(#[case] failure: BackupFailure, #[case] code: &str) {
    assert_eq!(failure.code(), code);
}

#[test]
fn info_document_has_header_and_sections() {
    let record = device("sw9");
    let at = chrono::FixedOffset::west_opt(3 * 3600)
        .expect("offset")
        .with_ymd_and_hms(2024, 5, 1, 2, 0, 0)
        .single()
        .expect("time");
    let sections = [
        InfoSection::captured("Uptime", "\n 10 days \n"),
        InfoSection::failed("CPU", "  "),
    ];

    let rendered = render_info(&record, &at, &sections);

    assert_eq!(
        rendered,
        "=== Device information: sw9 ===\nHost: 192.0.2.3\nCaptured at: 01/05/2024 02:00:00\n\n\
         === Uptime ===\n10 days\n\n=== CPU (error) ===\nError: command not supported\n"
    );
}

#[test]
fn default_diagnostics_are_in_fixed_order() {
    let labels: Vec<String> = default_info_commands()
        .into_iter()
        .map(|command| command.label)
        .collect();
    assert_eq!(
        labels,
        [
            "System version",
            "Hardware",
            "Interface status",
            "Routing summary",
            "Uptime",
            "Memory",
            "CPU"
        ]
    );
}
