use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `default_filter` applies when `RUST_LOG` is not set. `LOG_COMPACT=1` drops
/// file/line locations and switches to the compact formatter.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let compact = crate::util::env::env_flag("LOG_COMPACT", false);

    let builder = SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(!compact)
        .with_file(!compact);
    let res = if compact {
        builder.compact().try_init()
    } else {
        builder.try_init()
    };
    res.map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
