use anyhow::Context as _;

/// Used when `RUST_LOG` is unset or empty.
pub const DEFAULT_DIRECTIVES: &str = "info";

pub fn init() -> anyhow::Result<()> {
    let filter = match std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV) {
        Ok(raw) if !raw.trim().is_empty() => tracing_subscriber::EnvFilter::try_new(raw.trim())
            .with_context(|| format!("parse RUST_LOG={raw:?}"))?,
        _ => tracing_subscriber::EnvFilter::try_new(DEFAULT_DIRECTIVES)
            .context("build default log filter")?,
    };

    // Logs go to stderr so `chapters`/`metadata` JSON on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
