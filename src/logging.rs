use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber for the binary. Logs go to stderr so stdout
/// stays clean for JSON output.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("show_discovery=info,warn"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}
