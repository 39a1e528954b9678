//! Logging utilities
//!
//! The engine logs through the `log` facade. Subsystems prefix their messages
//! with a bracketed tag such as `[SHADER]` or `[SWAPCHAIN]`.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` is used. Calling this
/// more than once is harmless, later calls are ignored.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::trace!("Logger already initialized");
    }
}

/// Initialize logging for unit tests, capturing output per test.
#[cfg(test)]
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
