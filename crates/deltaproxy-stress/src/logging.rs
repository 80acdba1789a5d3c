use anyhow::{Context, Result};
use deltaproxy_service::config::Config;
use deltaproxy_service::{logging, metrics};

/// Keeps the error reporting alive until the stresstest is done.
#[derive(Default)]
pub struct Guard {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Sets up error reporting, logging and metrics as configured.
///
/// # Safety
/// This modifies the environment, see [`logging::init_logging`]. It may only be called before any
/// other threads are started.
pub unsafe fn init(config: &Config) -> Result<Guard> {
    let mut guard = Guard::default();

    if let Some(dsn) = &config.sentry_dsn {
        guard._sentry = Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.clone()),
            release: sentry::release_name!(),
            traces_sample_rate: 1.0,
            ..Default::default()
        }));
    }

    // SAFETY: Forwarded from the caller.
    unsafe { logging::init_logging(&config.logging) };

    if let Some(statsd) = &config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        tags.entry("env".into()).or_insert_with(|| "stresstest".into());
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure metrics")?;
    }

    Ok(guard)
}
