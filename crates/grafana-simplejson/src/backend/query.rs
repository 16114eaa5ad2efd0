//! The `/query` route.
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::{stream::FuturesOrdered, TryStreamExt};
use http::StatusCode;
use thiserror::Error;

use crate::{
    backend::{read_json_request, BoxError, ErrIntoHttpResponse},
    data::{
        self, QueryArgs, QueryKind, QueryRequest, QueryResponse, TableQueryArgs, TableResponse,
        TimeSeriesResponse,
    },
};

/// Errors returned while answering a query for a single target.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueryError {
    /// The target is not known to the query service.
    #[error("unknown target '{target}' for {kind}")]
    UnknownTarget {
        /// The requested target.
        target: String,
        /// The kind of query requested.
        kind: QueryKind,
    },
    /// The target is known but cannot answer queries of the requested kind.
    #[error("target '{target}' does not implement {kind}")]
    NotImplemented {
        /// The requested target.
        target: String,
        /// The kind of query requested.
        kind: QueryKind,
    },
    /// A table was returned whose columns have different lengths.
    #[error("invalid table: {0}")]
    InvalidTable(#[from] data::Error),
    /// The query function returned an error.
    #[error("{0}")]
    Callback(BoxError),
}

impl ErrIntoHttpResponse for QueryError {
    fn status(&self) -> StatusCode {
        match self {
            Self::UnknownTarget { .. } => StatusCode::BAD_REQUEST,
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::InvalidTable(_) | Self::Callback(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Trait for services that answer time series and table queries.
///
/// Most servers will use a [`TargetTable`][crate::backend::TargetTable], which implements
/// this trait by looking each target up in a table of functions. Implement it directly
/// to resolve targets some other way, such as by parsing the target name.
///
/// The targets of a `/query` request are answered concurrently, and the responses are
/// returned in the order the targets were requested. The first failing target fails the
/// whole request; queries for the remaining targets are cancelled.
///
/// # Example
///
/// ```rust
/// use grafana_simplejson::{
///     backend::{self, QueryError},
///     data::{DataPoint, QueryArgs, QueryKind, TableQueryArgs, TableResponse, TimeSeriesResponse},
/// };
///
/// /// Answers `constant:<n>` targets with a flat line at `n`.
/// struct Constants;
///
/// #[backend::async_trait]
/// impl backend::QueryService for Constants {
///     fn supports(&self, kind: QueryKind) -> bool {
///         kind == QueryKind::TimeSeries
///     }
///
///     async fn time_series_query(
///         &self,
///         target: &str,
///         args: QueryArgs,
///     ) -> Result<TimeSeriesResponse, QueryError> {
///         let value = target
///             .strip_prefix("constant:")
///             .and_then(|n| n.parse::<f64>().ok())
///             .ok_or_else(|| QueryError::UnknownTarget {
///                 target: target.to_string(),
///                 kind: QueryKind::TimeSeries,
///             })?;
///         Ok(TimeSeriesResponse::new(target).with_datapoints([
///             DataPoint::new(args.range.from, value),
///             DataPoint::new(args.range.to, value),
///         ]))
///     }
///
///     async fn table_query(
///         &self,
///         target: &str,
///         _args: TableQueryArgs,
///     ) -> Result<TableResponse, QueryError> {
///         Err(QueryError::NotImplemented {
///             target: target.to_string(),
///             kind: QueryKind::Table,
///         })
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait QueryService: Send + Sync {
    /// Whether this service can answer any queries of the given kind.
    ///
    /// `/query` is only served if this returns `true` for at least one kind.
    fn supports(&self, kind: QueryKind) -> bool;

    /// The kind of query to run for `target`.
    ///
    /// `requested` is the `type` Grafana sent for the target, if it was recognised.
    /// Services that know which kinds a target answers should pick the kind from that,
    /// and only use `requested` to choose when the target answers both.
    ///
    /// Defaults to `requested`, or a time series query if none was sent.
    fn resolve_kind(&self, _target: &str, requested: Option<QueryKind>) -> QueryKind {
        requested.unwrap_or(QueryKind::TimeSeries)
    }

    /// Answer a time series query for `target`.
    async fn time_series_query(
        &self,
        target: &str,
        args: QueryArgs,
    ) -> Result<TimeSeriesResponse, QueryError>;

    /// Answer a table query for `target`.
    async fn table_query(
        &self,
        target: &str,
        args: TableQueryArgs,
    ) -> Result<TableResponse, QueryError>;
}

pub(crate) fn router<Q: QueryService + 'static>(service: Q) -> Router {
    Router::new()
        .route("/query", post(query::<Q>))
        .with_state(Arc::new(service))
}

#[tracing::instrument(skip_all, level = "debug")]
async fn query<Q: QueryService + 'static>(State(service): State<Arc<Q>>, body: Bytes) -> Response {
    let request: QueryRequest = match read_json_request(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting query request");
            return e.into_http_response();
        }
    };
    let service = &*service;
    let request = &request;
    let responses = request
        .targets
        .iter()
        .map(|target| {
            let kind = service.resolve_kind(&target.target, target.kind);
            async move {
                match kind {
                    QueryKind::TimeSeries => service
                        .time_series_query(&target.target, request.query_args(target))
                        .await
                        .map(QueryResponse::TimeSeries),
                    QueryKind::Table => service
                        .table_query(&target.target, request.table_query_args(target))
                        .await
                        .map(QueryResponse::Table),
                }
            }
        })
        .collect::<FuturesOrdered<_>>()
        .try_collect::<Vec<_>>()
        .await;
    match responses {
        Ok(responses) => Json(responses).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Error answering query");
            e.into_http_response()
        }
    }
}
