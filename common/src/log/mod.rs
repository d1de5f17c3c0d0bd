use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;

/// Installs the process-wide tracing subscriber. Returns the appender's
/// `WorkerGuard` when file logging is enabled — the caller must hold onto it
/// for the process lifetime or buffered lines are lost on exit.
pub fn init_log(debug: bool, log_dir: Option<&str>) -> Option<WorkerGuard> {
    let level = if debug { Level::DEBUG } else { Level::INFO };

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "cdc.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(non_blocking)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        None => {
            let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    }
}

/// Installs a TRACE-level subscriber for test binaries. Ignores the error if
/// a global subscriber is already set (harmless when multiple test modules
/// call it).
pub fn init_test_log() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
