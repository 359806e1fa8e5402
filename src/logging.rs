//! Diagnostic logging to stderr.
//!
//! Stdout is reserved for command output (answers, JSON, status), so every
//! log line goes to stderr. `RUST_LOG` overrides the level chosen from
//! the `-v` count.

use tracing_subscriber::EnvFilter;

pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
