use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "bizledger.log";

/// Install the global subscriber: JSON lines on stderr, plus a daily rolling
/// file when `config.log_dir` is set. Keep the returned guard alive for the
/// life of the process so buffered file output is flushed.
pub fn init(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_new(&config.log_filter)
        .with_context(|| format!("invalid log filter {:?}", config.log_filter))?;

    let stderr = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filter() {
        let config = Config {
            db_path: "ledger.db".into(),
            log_filter: "bizledger=[".into(),
            log_dir: None,
            production: false,
        };
        assert!(init(&config).is_err());
    }

    #[test]
    fn creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = Config {
            db_path: dir.path().join("ledger.db"),
            log_filter: "bizledger=info".into(),
            log_dir: Some(log_dir.clone()),
            production: false,
        };
        let guard = init(&config).unwrap();
        assert!(guard.is_some());
        assert!(log_dir.is_dir());
    }
}
