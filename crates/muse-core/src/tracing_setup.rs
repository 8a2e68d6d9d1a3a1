use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber: stderr filtered by `RUST_LOG` (default
/// `info`), plus a DEBUG file log when `MUSE_LOG_FILE` is set.
pub fn init_tracing() {
    // Check if file logging is enabled via environment variable
    let file_logging = std::env::var("MUSE_LOG_FILE").ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    let file_layer = file_logging.and_then(|log_path| {
        match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => {
                eprintln!("File logging enabled: {}", log_path);
                Some(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_filter(LevelFilter::DEBUG),
                )
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", log_path, e);
                None
            }
        }
    });

    let result = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("Tracing already initialized: {}", e);
    }
}
