//! Binary entry point for the `netbackup` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use netbackup::{AppError, BackupConfig, ConfigError, LiveService, RetentionError, logging};

mod cli;

use cli::{Action, Cli};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("startup failed: {0}")]
    Startup(#[from] AppError),
    #[error("retention sweep failed: {0}")]
    Cleanup(#[from] RetentionError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli.action).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(action: Action) -> Result<(), CliError> {
    let config = BackupConfig::load_without_cli_args()?;
    config.validate()?;
    let clock = config.clock()?;
    let _logging = logging::init(&config.log_root(), &clock);

    let service = LiveService::from_config(&config).inspect_err(|err| {
        error!(error = %err, "startup failed");
    })?;

    match action {
        Action::Backup => {
            let summary = service.backup_fleet().await;
            info!(
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                "manual backup finished"
            );
        }
        Action::Cleanup => {
            let summary = service.cleanup().await.inspect_err(|err| {
                error!(error = %err, "retention sweep failed");
            })?;
            info!(removed = summary.removed, failed = summary.failed, "manual cleanup finished");
        }
        Action::Schedule => {
            service
                .run_scheduler(async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_prints_single_line() {
        let mut buffer = Vec::new();
        let err = CliError::Config(ConfigError::MissingField(String::from(
            "missing inventory file: set NETBACKUP_INVENTORY_PATH or add inventory_path to netbackup.toml",
        )));

        write_error(&mut buffer, &err);

        let rendered = String::from_utf8(buffer).expect("utf8");
        assert!(rendered.starts_with("configuration error: missing configuration field:"));
        assert!(rendered.ends_with('\n'));
        assert_eq!(rendered.lines().count(), 1);
    }

    #[test]
    fn cli_defaults_to_schedule() {
        let cli = Cli::try_parse_from(["netbackup"]).expect("parse");
        assert_eq!(cli.action, Action::Schedule);
    }

    #[test]
    fn cli_accepts_backup_and_cleanup() {
        let backup = Cli::try_parse_from(["netbackup", "backup"]).expect("parse");
        let cleanup = Cli::try_parse_from(["netbackup", "cleanup"]).expect("parse");
        assert_eq!(backup.action, Action::Backup);
        assert_eq!(cleanup.action, Action::Cleanup);
    }

    #[test]
    fn cli_rejects_unknown_action() {
        assert!(Cli::try_parse_from(["netbackup", "restore"]).is_err());
    }
}
