//! Logging setup for harness processes and tests.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber at `level`.
///
/// `RUST_LOG`, when set, takes precedence over `level`. Output goes through the
/// test writer so `cargo test` captures it per test. Calling this more than once
/// is harmless: only the first subscriber is installed.
pub fn init(level: Level) {
    // Prefer an explicit filter from the environment
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    // Later calls lose the race to set the global default, which is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_line_number(true)
        .with_file(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(Level::DEBUG);
        init(Level::INFO);
        tracing::info!("telemetry initialized");
    }
}
