//! Tracing subscriber setup for applications embedding unifs.
//!
//! The core crate only emits `tracing` events; it never installs a
//! subscriber. Binaries and tests call one of these once at startup.
//!
//! `RUST_LOG` wins over the default filter passed in:
//!
//! ```bash
//! RUST_LOG=unifs_core=debug,warn my-app
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directory for log files: `$UNIFS_LOG_DIR`, falling back to the temp dir.
pub fn default_log_dir() -> PathBuf {
    std::env::var_os("UNIFS_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Log to stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Log to stderr and to `<dir>/<file_name>` through a non-blocking writer.
///
/// Hold the returned guard for the life of the program; dropping it flushes
/// and stops the file writer.
pub fn init_with_file(dir: impl AsRef<Path>, file_name: &str, default_filter: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(dir.as_ref(), file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let installed = tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("logging to {}", dir.as_ref().join(file_name).display());
    }
    guard
}

/// Route logs through the test harness's captured output. Safe to call from
/// every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter("unifs_core=debug,warn"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
        tracing::debug!("still alive");
        assert!(!init("info"));
    }

    #[test]
    fn test_default_log_dir_exists() {
        assert!(!default_log_dir().as_os_str().is_empty());
    }
}
