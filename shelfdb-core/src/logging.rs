//! Structured logging. The core itself only emits `tracing` spans/events;
//! wiring a subscriber is left to whatever embeds the engine (the CLI binary
//! does it with `tracing-subscriber`, matching the sibling server component
//! of this project's ecosystem).

/// Install a reasonable default subscriber for standalone binaries. Library
/// consumers that already have a subscriber should skip this and just link
/// against `tracing`.
pub fn init_default() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
