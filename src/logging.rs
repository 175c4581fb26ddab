//! Logging initialization for the `elastic-driverd` binary.

use std::io::Write;

/// Initializes `env_logger` at `info` by default (`debug` when `debug` is
/// set), honoring `RUST_LOG` if the caller has set it.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
        })
        .init();
}
