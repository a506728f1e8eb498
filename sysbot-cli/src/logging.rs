use std::fmt::Display;
use tracing::{error, info, Level};

/// warn, then one step more detail per `-v`.
pub fn level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn init_logging(verbosity: u8) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level(verbosity))
        .with_writer(std::io::stderr)
        .with_target(verbosity > 2);
    // a subscriber may already be installed when running under a test harness
    let _ = subscriber.try_init();
}

pub fn log_success<T: Display, U: Display>(operation: T, target: U) {
    info!("Successfully {}: {}", operation, target);
}

pub fn log_failure<T: Display, U: Display, E: Display>(operation: T, target: U, error: &E) {
    error!("Failed to {}: {}. Error: {}", operation, target, error);
}
