//! Logger setup.
//!
//! The crate logs through the `log` facade. Applications that do not bring their own
//! logger can call [`init`], which installs `env_logger` (configured through `RUST_LOG`).

/// Installs `env_logger`. Calling this more than once, or after another logger was
/// installed, only prints a warning.
pub fn init() {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
}

/// Like [`init`], with a default filter used when `RUST_LOG` is unset.
pub fn init_with_filter(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    if let Err(e) = env_logger::Builder::from_env(env).try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
}
