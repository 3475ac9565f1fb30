//! Logging helpers
//!
//! Thin wrapper around `env_logger` so the binary and the tests share one setup.

/// Initialise the logging system
///
/// `RUST_LOG` takes precedence over `level` when it is set. Calling this more
/// than once is harmless; later calls are ignored.
///
/// # Parameters
///
/// * `level` - Default log filter, e.g. `info` or `protocol_gateway=debug`
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_twice() {
        init_logger("debug");
        init_logger("info");
    }
}
