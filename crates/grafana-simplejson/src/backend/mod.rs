/*! Functionality for serving the SimpleJSON protocol.

A SimpleJSON datasource is an HTTP server which Grafana queries for the names of
available targets, time series and tables for those targets, and annotations.
This module serves the protocol's routes using [axum].

The basic requirements for a server are to provide a `main` function which:

- binds a [`TcpListener`], perhaps using the [`bind`] function from this module together
  with the listen address from a [`ServerConfig`],
- creates the services answering requests. Most servers will build a [`TargetTable`],
  mapping each target name to the functions answering queries for it, and optionally
  an annotation function,
- creates a [`Server`] and uses the `Server::*_service` methods (or [`Server::target_table`])
  to attach those services,
- begins serving on the listener using [`Server::start`].

Only routes for the attached services are registered; requests to any other route
receive a plain `404 Not Found`.

# Logging and `tracing`

The crate provides a preconfigured [`tracing_subscriber::fmt::Layer`] which, when installed,
will emit structured JSON logs to stderr. Use the [`layer`] function to get the `Layer`, and
install it using `tracing_subscriber::Registry::with`. Alternatively use [`Server::init_subscriber`]
to automatically install a subscriber using the `RUST_LOG` environment variable to set the
directive (defaulting to `info` if not set).

Every request is wrapped in a span by [`tower_http::trace::TraceLayer`].

# Example

```rust,no_run
use grafana_simplejson::{
    backend::{self, BoxError, Endpoint, Server, ServerConfig, TargetTable},
    data::{Annotation, AnnotationRequest, DataPoint, QueryArgs, TimeSeriesResponse},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServerConfig::from_env();
    let listener = backend::bind(config.listen_addr()?).await?;

    let targets = TargetTable::new().with_target(
        "constant",
        Endpoint::new().with_query(|args: QueryArgs| async move {
            Ok::<_, BoxError>(
                TimeSeriesResponse::new(args.target)
                    .with_datapoints([DataPoint::new(args.range.from, 1.0)]),
            )
        }),
    );

    Server::new()
        .init_subscriber(true)
        .target_table(targets)
        .annotation_service(|request: AnnotationRequest| async move {
            Ok::<_, BoxError>(vec![Annotation::new(request.range.from, "start", "range start")])
        })
        .configure(&config)?
        .start(listener)
        .await?;
    Ok(())
}
```
*/
use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::FutureExt;
use http::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use time::format_description::FormatItem;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{
    fmt::{
        format::{Format, Json as JsonFormat, JsonFields},
        time::UtcTime,
    },
    prelude::*,
    registry::LookupSpan,
    EnvFilter,
};

use crate::data::{
    Annotation, AnnotationRequest, QueryArgs, QueryKind, TableQueryArgs, TableResponse,
    TimeSeriesResponse,
};

mod annotations;
mod config;
mod metrics;
mod noop;
mod query;
mod search;
mod target_table;

pub use annotations::{AnnotationError, AnnotationService};
pub use async_trait::async_trait;
pub use config::{ConfigError, ServerConfig};
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusRecorder;
pub use metrics::MetricsRecorder;
pub use noop::NoopService;
pub use query::{QueryError, QueryService};
pub use search::SearchService;
pub use target_table::{Endpoint, TableQueryFn, TargetTable, TimeSeriesQueryFn};

/// A type-erased error returned by user-provided query and annotation functions.
///
/// The error's message is sent back to Grafana unchanged.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct ShutdownHandler {
    address: SocketAddr,
}

impl ShutdownHandler {
    #[must_use]
    fn new(address: SocketAddr) -> Self {
        Self { address }
    }

    fn spawn(self) -> impl std::future::Future<Output = ()> {
        tokio::spawn(async move {
            let listener = TcpListener::bind(&self.address).await.map_err(|e| {
                tracing::warn!("Error creating shutdown handler: {}", e);
                e
            })?;
            tracing::debug!(address = %self.address, "Shutdown handler started on {}", &self.address);
            Ok::<_, std::io::Error>(listener.accept().await.map(|_| ()))
        })
        .map(|_| ())
    }
}

/// The set of routes a [`Server`] will serve, derived from its attached services.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Capabilities {
    /// Whether `/search` is served.
    pub search: bool,
    /// Whether time series queries can be answered.
    pub query: bool,
    /// Whether table queries can be answered.
    pub table_query: bool,
    /// Whether `/annotations` is served.
    pub annotations: bool,
}

impl Capabilities {
    fn names(&self) -> Vec<&'static str> {
        [
            (self.search, "search"),
            (self.query, "query"),
            (self.table_query, "tablequery"),
            (self.annotations, "annotations"),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        .collect()
    }
}

/// Main entrypoint into the crate.
///
/// A `Server` owns the services answering each kind of request, registers the
/// routes for those services, and serves them until shutdown.
///
/// # Shutdown Handler
///
/// A server can be configured to gracefully shutdown by calling the [`Server::shutdown_handler`]
/// method. This will spawn a new task which simply waits for _any_ TCP connection on
/// the given address, and triggers a graceful shutdown of the underlying HTTP server.
/// This is helpful during development: a tool such as [`cargo-watch`][cargo-watch]
/// can be used to rebuild on changes, then use `nc` to trigger a shutdown of the server.
///
/// [cargo-watch]: https://github.com/watchexec/cargo-watch
///
/// # Metrics
///
/// A [`MetricsRecorder`] attached using [`Server::metrics_recorder`] observes the duration of
/// every request, labelled by route. With the `prometheus` feature enabled, a
/// [`PrometheusRecorder`] records these into a [`prometheus::Registry`], which can be
/// served by [`Server::metrics_route`].
///
/// # Example
///
/// ```rust
/// use grafana_simplejson::backend::{BoxError, Endpoint, Server, TargetTable};
/// use grafana_simplejson::data::{TableQueryArgs, TableResponse};
///
/// let targets = TargetTable::new().with_target(
///     "hosts",
///     Endpoint::new().with_table_query(|_args: TableQueryArgs| async {
///         Ok::<_, BoxError>(TableResponse::new())
///     }),
/// );
/// let server = Server::new().target_table(targets);
/// let capabilities = server.capabilities();
/// assert!(capabilities.search);
/// assert!(capabilities.table_query);
/// assert!(!capabilities.query);
/// assert!(!capabilities.annotations);
/// ```
pub struct Server<S, Q, A> {
    shutdown_handler: Option<ShutdownHandler>,
    init_subscriber: bool,
    metrics_recorder: Option<Arc<dyn MetricsRecorder>>,
    metrics_router: Option<Router>,

    search_service: Option<S>,
    query_service: Option<Q>,
    annotation_service: Option<A>,
}

impl<S, Q, A> std::fmt::Debug for Server<S, Q, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("shutdown_address", &self.shutdown_handler.as_ref().map(|h| h.address))
            .field("init_subscriber", &self.init_subscriber)
            .finish_non_exhaustive()
    }
}

impl Server<NoopService, NoopService, NoopService> {
    /// Create a new `Server` with no registered services.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown_handler: None,
            init_subscriber: false,
            metrics_recorder: None,
            metrics_router: None,
            search_service: None,
            query_service: None,
            annotation_service: None,
        }
    }
}

impl Default for Server<NoopService, NoopService, NoopService> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, Q, A> Server<S, Q, A> {
    /// Add a shutdown handler to the server, listening on the specified address.
    ///
    /// The shutdown handler waits for a TCP connection on the specified address
    /// and requests that the server gracefully shutdown when any connection is made.
    ///
    /// Note that this _only_ takes effect in debug mode. The shutdown handler
    /// is never added when the crate is compiled in release mode.
    #[must_use]
    pub fn shutdown_handler(mut self, address: SocketAddr) -> Self {
        cfg_if::cfg_if! {
            if #[cfg(debug_assertions)] {
                self.shutdown_handler = Some(ShutdownHandler::new(address));
            } else {
                let _ = address;
                self.shutdown_handler = None;
            }
        }
        self
    }

    /// Initialize a default [`tracing_subscriber::fmt::Subscriber`] upon starting.
    ///
    /// If enabled, this will initialize a `Subscriber` emitting JSON logs to stderr,
    /// at a default max level of `info`.
    ///
    /// This effectively causes the following to be called as part of `Server::start`:
    ///
    /// ```rust
    /// use grafana_simplejson::backend;
    /// use tracing_subscriber::{prelude::*, EnvFilter};
    ///
    /// let filter = EnvFilter::try_from_default_env()
    ///     .unwrap_or_else(|_| EnvFilter::new("info"));
    /// tracing_subscriber::registry()
    ///     .with(filter)
    ///     .with(backend::layer())
    ///     .init()
    /// ```
    #[must_use]
    pub fn init_subscriber(mut self, init_subscriber: bool) -> Self {
        self.init_subscriber = init_subscriber;
        self
    }

    /// Apply the settings in a [`ServerConfig`] to this server.
    ///
    /// Currently this adds a [shutdown handler][Server::shutdown_handler] if
    /// a shutdown address is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured value is invalid.
    pub fn configure(mut self, config: &ServerConfig) -> Result<Self, ConfigError> {
        if let Some(address) = config.shutdown_addr()? {
            self = self.shutdown_handler(address);
        }
        Ok(self)
    }

    /// Observe the duration of every request using the given recorder.
    #[must_use]
    pub fn metrics_recorder(mut self, recorder: impl MetricsRecorder) -> Self {
        self.metrics_recorder = Some(Arc::new(recorder));
        self
    }

    /// Serve the metrics in `registry` at `GET /metrics`, in the Prometheus
    /// text exposition format.
    #[cfg(feature = "prometheus")]
    #[must_use]
    pub fn metrics_route(mut self, registry: prometheus::Registry) -> Self {
        self.metrics_router = Some(metrics::router(registry));
        self
    }

    /// Add a search service to this server.
    pub fn search_service<T>(self, service: T) -> Server<T, Q, A>
    where
        T: SearchService + 'static,
    {
        Server {
            search_service: Some(service),
            shutdown_handler: self.shutdown_handler,
            init_subscriber: self.init_subscriber,
            metrics_recorder: self.metrics_recorder,
            metrics_router: self.metrics_router,
            query_service: self.query_service,
            annotation_service: self.annotation_service,
        }
    }

    /// Add a query service to this server.
    pub fn query_service<T>(self, service: T) -> Server<S, T, A>
    where
        T: QueryService + 'static,
    {
        Server {
            query_service: Some(service),
            shutdown_handler: self.shutdown_handler,
            init_subscriber: self.init_subscriber,
            metrics_recorder: self.metrics_recorder,
            metrics_router: self.metrics_router,
            search_service: self.search_service,
            annotation_service: self.annotation_service,
        }
    }

    /// Add an annotation service to this server.
    pub fn annotation_service<T>(self, service: T) -> Server<S, Q, T>
    where
        T: AnnotationService + 'static,
    {
        Server {
            annotation_service: Some(service),
            shutdown_handler: self.shutdown_handler,
            init_subscriber: self.init_subscriber,
            metrics_recorder: self.metrics_recorder,
            metrics_router: self.metrics_router,
            search_service: self.search_service,
            query_service: self.query_service,
        }
    }

    /// Use a [`TargetTable`] as both the search and query service of this server.
    ///
    /// `/search` will list the table's targets, and `/query` will be served if any
    /// target can answer a query.
    pub fn target_table(self, table: TargetTable) -> Server<TargetTable, TargetTable, A> {
        self.search_service(table.clone()).query_service(table)
    }
}

impl<S, Q, A> Server<S, Q, A>
where
    S: SearchService + 'static,
    Q: QueryService + 'static,
    A: AnnotationService + 'static,
{
    /// The routes this server will serve.
    ///
    /// `/query` is served if either `query` or `table_query` is set.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        let supports = |kind| {
            self.query_service
                .as_ref()
                .is_some_and(|service| service.supports(kind))
        };
        Capabilities {
            search: self.search_service.is_some(),
            query: supports(QueryKind::TimeSeries),
            table_query: supports(QueryKind::Table),
            annotations: self.annotation_service.is_some(),
        }
    }

    /// Build the [`Router`] serving this server's routes.
    ///
    /// This is called by [`Server::start`], but is also useful for embedding
    /// the routes into a larger application, or for testing.
    pub fn into_router(self) -> Router {
        let capabilities = self.capabilities();
        let mut router = Router::new().route("/", get(hello));
        if let Some(service) = self.search_service {
            router = router.merge(search::router(service));
        }
        if capabilities.query || capabilities.table_query {
            if let Some(service) = self.query_service {
                router = router.merge(query::router(service));
            }
        }
        if let Some(service) = self.annotation_service {
            router = router.merge(annotations::router(service));
        }
        if let Some(metrics_router) = self.metrics_router {
            router = router.merge(metrics_router);
        }
        if let Some(recorder) = self.metrics_recorder {
            router = router.route_layer(middleware::from_fn_with_state(recorder, metrics::track));
        }
        // Log the enabled capabilities, in the same shape as the plugin SDKs.
        tracing::debug!(
            capabilities = %format!("[{}]", capabilities.names().join(" ")),
            "Serving SimpleJSON datasource"
        );
        router.layer(TraceLayer::new_for_http())
    }

    /// Start the server.
    ///
    /// This registers the routes of all of the configured services, spawns a shutdown handler
    /// (if configured), and blocks while the server runs.
    ///
    /// # Panics
    ///
    /// This will panic if `init_subscriber(true)` has been set and another
    /// global subscriber has already been installed. If you are initializing your
    /// own `Subscriber`, you should instead use the [`layer`] function to add a
    /// preconfigured `tracing_subscriber::fmt::Layer` to your subscriber.
    pub async fn start(mut self, listener: TcpListener) -> Result<(), Error> {
        if self.init_subscriber {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::registry()
                .with(layer())
                .with(filter)
                .init();
        }
        let shutdown_handler = self.shutdown_handler.take();
        let serve = axum::serve(listener, self.into_router());
        if let Some(handler) = shutdown_handler {
            serve.with_graceful_shutdown(handler.spawn()).await?;
        } else {
            serve.await?;
        }
        Ok(())
    }
}

async fn hello() -> &'static str {
    "Hello"
}

/// Bind a [`TcpListener`] on the given address, ready to be passed to [`Server::start`].
///
/// The address actually bound is logged at `info` level, which is useful when
/// binding to port 0.
pub async fn bind(address: impl ToSocketAddrs) -> Result<TcpListener, io::Error> {
    let listener = TcpListener::bind(address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening");
    Ok(listener)
}

const LOG_TIME_FORMAT: &[FormatItem] = time::macros::format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]+00:00"
);

/// Create a `tracing` [`Layer`][tracing_subscriber::Layer] configured to log events as JSON to stderr.
///
/// The returned layer should be installed into the tracing subscriber registry, with an optional env filter.
///
/// # Example
///
/// Installing the layer with the default `EnvFilter` (using the `RUST_LOG` environment variable):
///
/// ```rust
/// use grafana_simplejson::backend;
/// use tracing_subscriber::{prelude::*, EnvFilter};
///
/// tracing_subscriber::registry()
///     .with(backend::layer())
///     .with(EnvFilter::from_default_env())
///     .init();
/// ```
pub fn layer<S: tracing::Subscriber + for<'a> LookupSpan<'a>>() -> tracing_subscriber::fmt::Layer<
    S,
    JsonFields,
    Format<JsonFormat, UtcTime<&'static [FormatItem<'static>]>>,
    fn() -> io::Stderr,
> {
    tracing_subscriber::fmt::layer()
        .json()
        .with_timer(UtcTime::new(LOG_TIME_FORMAT))
        .with_writer(io::stderr as fn() -> std::io::Stderr)
}

/// Errors returned by [`Server::start`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An error occurred while serving requests.
    #[error("error serving: {0}")]
    Serve(#[from] io::Error),
}

/// Errors occurring when trying to interpret a request body sent by Grafana.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConvertFromError {
    /// The request body could not be parsed into the expected request type.
    #[error("Unexpected JSON in request (got {json}): {err}")]
    UnexpectedRequestJson {
        /// The underlying JSON error.
        err: serde_json::Error,
        /// The JSON for which parsing was attempted, truncated to at most
        /// [`MAX_ECHOED_JSON`] characters.
        json: String,
    },
}

/// The maximum number of characters of a malformed request body included in a
/// [`ConvertFromError`].
pub const MAX_ECHOED_JSON: usize = 256;

impl ErrIntoHttpResponse for ConvertFromError {
    fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// Trait describing how an error should be converted into an HTTP response.
///
/// The default implementation responds with `500 Internal Server Error` and a
/// JSON body of the form `{"error": "<message>"}`.
pub trait ErrIntoHttpResponse: std::error::Error + Sized {
    /// The status code of the response.
    fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Convert this error into an HTTP response.
    fn into_http_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

fn read_json<T>(jdoc: &[u8]) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned,
{
    // Some clients send an empty body instead of an empty map.
    let jdoc = if jdoc.is_empty() {
        b"{}".as_slice()
    } else {
        jdoc
    };
    serde_json::from_slice(jdoc)
}

fn read_json_request<T>(jdoc: &[u8]) -> Result<T, ConvertFromError>
where
    T: DeserializeOwned,
{
    read_json(jdoc).map_err(|err| {
        let mut json = String::from_utf8(jdoc.to_vec())
            .unwrap_or_else(|_| format!("non-utf8 string: {}", String::from_utf8_lossy(jdoc)));
        if let Some((end, _)) = json.char_indices().nth(MAX_ECHOED_JSON) {
            json.truncate(end);
            json.push_str("...");
        }
        ConvertFromError::UnexpectedRequestJson { err, json }
    })
}
