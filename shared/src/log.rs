use tracing_subscriber::{
    fmt::{format, time::ChronoLocal},
    EnvFilter,
};

/// `directive` raises the calling crate's level (e.g. `farmer=debug`);
/// everything else stays at `info` unless `RUST_LOG` says otherwise.
pub fn init_log(directive: &str) {
    let format = format::format()
        .with_level(true)
        .with_target(false)
        .with_timer(ChronoLocal::new("[%m-%d %H:%M:%S%.3f]".to_string()))
        .compact();

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = directive.parse() {
        env_filter = env_filter.add_directive(directive);
    }
    if let Ok(directive) = "info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).event_format(format).init();
}
