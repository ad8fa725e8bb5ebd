use tracing_subscriber::EnvFilter;

/// Initializes the tracing/logging infrastructure for the application.
///
/// - **Environment-based filtering**: `RUST_LOG`, falling back to `info`
/// - **Compact formatting**: one line per event, no module target
///
/// # Environment Variables
///
/// - `RUST_LOG=info` - lifecycle, stage progress, rejected requests
/// - `RUST_LOG=debug` - adds per-request actor traffic
/// - `RUST_LOG=cafe_pipeline=debug,cafe_actor=info` - per crate
///
/// Calling it twice is harmless; the second call leaves the first subscriber
/// in place.
///
/// # Example
///
/// ```ignore
/// setup_tracing();
/// tracing::info!("Application started");
/// ```
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
