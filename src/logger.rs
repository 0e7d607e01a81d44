//! Logging setup shared by the server and client binaries.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides the default, e.g. `RUST_LOG=debug` or
/// `RUST_LOG=tcp_chat=trace`. Output goes to stderr so it never mixes
/// with the client's chat output on stdout.
pub fn setup_logger(binary_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},{}={}",
            env!("CARGO_PKG_NAME"),
            default_level,
            binary_name,
            default_level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
