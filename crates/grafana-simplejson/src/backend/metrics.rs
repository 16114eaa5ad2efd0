//! Request duration metrics.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

/// A hook observing the duration of every request served by a [`Server`][crate::backend::Server].
///
/// This is implemented for any closure taking the route and the duration, which
/// makes it easy to forward observations to any metrics library:
///
/// ```rust
/// use std::time::Duration;
///
/// use grafana_simplejson::backend::Server;
///
/// let server = Server::new().metrics_recorder(|path: &str, duration: Duration| {
///     tracing::info!(path, ?duration, "Request served");
/// });
/// ```
pub trait MetricsRecorder: Send + Sync + 'static {
    /// Record that a request to `path` took `duration`.
    ///
    /// `path` is the route template that matched the request, such as `/query`.
    fn observe(&self, path: &str, duration: Duration);
}

impl<F> MetricsRecorder for F
where
    F: Fn(&str, Duration) + Send + Sync + 'static,
{
    fn observe(&self, path: &str, duration: Duration) {
        self(path, duration)
    }
}

pub(crate) async fn track(
    State(recorder): State<Arc<dyn MetricsRecorder>>,
    matched_path: Option<MatchedPath>,
    request: Request,
    next: Next,
) -> Response {
    let path = matched_path.map_or_else(
        || request.uri().path().to_string(),
        |p| p.as_str().to_string(),
    );
    let start = Instant::now();
    let response = next.run(request).await;
    recorder.observe(&path, start.elapsed());
    response
}

#[cfg(feature = "prometheus")]
pub(crate) use self::prom::router;
#[cfg(feature = "prometheus")]
pub use self::prom::PrometheusRecorder;

#[cfg(feature = "prometheus")]
mod prom {
    use std::time::Duration;

    use axum::{
        extract::State,
        response::{IntoResponse, Response},
        routing::get,
        Router,
    };
    use http::{header, StatusCode};
    use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};

    use super::MetricsRecorder;

    /// A [`MetricsRecorder`] recording request durations into a Prometheus histogram.
    ///
    /// The histogram is named `grafana_api_duration_seconds` and has a single
    /// `path` label holding the route of the request.
    ///
    /// # Example
    ///
    /// ```rust
    /// use grafana_simplejson::backend::{PrometheusRecorder, Server};
    ///
    /// let registry = prometheus::Registry::new();
    /// let recorder = PrometheusRecorder::new(&registry).unwrap();
    /// let server = Server::new()
    ///     .metrics_recorder(recorder)
    ///     .metrics_route(registry);
    /// ```
    #[derive(Clone, Debug)]
    pub struct PrometheusRecorder {
        duration: HistogramVec,
    }

    impl PrometheusRecorder {
        /// Create a recorder, registering its histogram in `registry`.
        ///
        /// # Errors
        ///
        /// Returns an error if a metric with the same name is already registered.
        pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
            let duration = HistogramVec::new(
                HistogramOpts::new(
                    "grafana_api_duration_seconds",
                    "Grafana API duration of HTTP requests, in seconds.",
                ),
                &["path"],
            )?;
            registry.register(Box::new(duration.clone()))?;
            Ok(Self { duration })
        }
    }

    impl MetricsRecorder for PrometheusRecorder {
        fn observe(&self, path: &str, duration: Duration) {
            self.duration
                .with_label_values(&[path])
                .observe(duration.as_secs_f64());
        }
    }

    pub(crate) fn router(registry: Registry) -> Router {
        Router::new()
            .route("/metrics", get(metrics))
            .with_state(registry)
    }

    async fn metrics(State(registry): State<Registry>) -> Response {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        match encoder.encode(&registry.gather(), &mut buffer) {
            Ok(()) => ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer)
                .into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "Error encoding metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }

}
