use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the process log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers
    Json,
    /// Human-readable multi-line output
    #[default]
    Pretty,
}

/// Initialize logging for a herald process.
///
/// `RUST_LOG` wins over `level` when set, so operators can narrow noisy
/// modules without touching the command line.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!("herald logging initialized (level: {}, format: {:?})", level, format);
    Ok(())
}

/// Span for a long-running component such as the heartbeat loop
pub fn component_span(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
    )
}

/// Span around one attempt against a service instance
pub fn create_backend_span(instance: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "backend_request",
        backend.instance = instance,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_subscriber<T>(f: impl FnOnce() -> T) -> T {
        let subscriber = Registry::default().with(tracing_subscriber::fmt::layer().with_test_writer());
        tracing::subscriber::with_default(subscriber, f)
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(init_tracing("herald=loudest", LogFormat::Json).is_err());
        }
    }

    #[test]
    fn test_span_names() {
        with_subscriber(|| {
            let span = create_request_span("GET", "/orders/1", "req-123");
            assert_eq!(span.metadata().map(|m| m.name()), Some("request"));

            let span = create_backend_span("localhost:4001", "POST", "/data");
            assert_eq!(span.metadata().map(|m| m.name()), Some("backend_request"));

            let span = component_span("heartbeat");
            assert_eq!(span.metadata().map(|m| m.name()), Some("component"));
        });
    }
}
