/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (usually
/// `LiveConfig::log_level`) applies.
///
/// ```bash
/// RUST_LOG=debug cargo run                         # everything
/// RUST_LOG=receta_live::subscription=debug cargo run  # snapshot traffic only
/// ```
pub fn setup_tracing(default_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .compact()
        .init();
}
