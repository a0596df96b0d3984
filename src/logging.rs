//! tracing の初期化 (コンソール + ローテーションするログファイル)

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::settings::{GeneralConfig, LogRotation};

const LOG_FILE_PREFIX: &str = "fakturator";

pub fn rotation(value: LogRotation) -> Rotation {
    match value {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

/// `-v` の数で設定ファイルの log_level を引き上げる
pub fn default_directive(general: &GeneralConfig, verbosity: u8) -> String {
    match verbosity {
        0 => general.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// RUST_LOG があればそちらを優先
fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// ログを初期化する。戻り値のガードはプロセス終了まで保持すること
pub fn init(general: &GeneralConfig, verbosity: u8) -> Option<WorkerGuard> {
    let directive = default_directive(general, verbosity);

    let mut guard = None;
    let file_layer = match std::fs::create_dir_all(&general.log_dir) {
        Ok(()) => {
            let mut builder = RollingFileAppender::builder()
                .rotation(rotation(general.log_rotation))
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log");
            if general.log_retention > 0 {
                builder = builder.max_log_files(general.log_retention);
            }

            match builder.build(&general.log_dir) {
                Ok(appender) => {
                    let (writer, worker_guard) = tracing_appender::non_blocking(appender);
                    guard = Some(worker_guard);
                    Some(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false)
                            .with_filter(env_filter(&directive)),
                    )
                }
                Err(e) => {
                    eprintln!("Warning: failed to open log file: {}", e);
                    None
                }
            }
        }
        Err(e) => {
            eprintln!(
                "Warning: failed to create log directory {}: {}",
                general.log_dir.display(),
                e
            );
            None
        }
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(env_filter(&directive));

    if let Err(e) = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
    {
        warn!("Logging already initialized: {}", e);
    }

    guard
}
