//! Log setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "worker-api.log";

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `log_dir`, output goes to a
/// daily-rolling file there instead of stdout; keep the returned guard alive
/// for as long as logs should be flushed.
pub fn init(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            subscriber.with_writer(writer).with_ansi(false).init();
            Some(guard)
        }
        None => {
            subscriber.init();
            None
        }
    }
}
