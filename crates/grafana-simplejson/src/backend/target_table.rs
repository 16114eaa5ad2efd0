//! A table mapping target names to the functions answering queries for them.
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use crate::{
    backend::{BoxError, QueryError, QueryService, SearchService},
    data::{QueryArgs, QueryKind, TableQueryArgs, TableResponse, TimeSeriesResponse},
};

/// A function answering time series queries for a single target.
///
/// This is implemented for any async closure taking [`QueryArgs`], so
/// most users will not need to implement it directly.
#[async_trait::async_trait]
pub trait TimeSeriesQueryFn: Send + Sync {
    /// Run the query.
    async fn query(&self, args: QueryArgs) -> Result<TimeSeriesResponse, BoxError>;
}

#[async_trait::async_trait]
impl<F, Fut> TimeSeriesQueryFn for F
where
    F: Fn(QueryArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TimeSeriesResponse, BoxError>> + Send + 'static,
{
    async fn query(&self, args: QueryArgs) -> Result<TimeSeriesResponse, BoxError> {
        self(args).await
    }
}

/// A function answering table queries for a single target.
///
/// This is implemented for any async closure taking [`TableQueryArgs`].
#[async_trait::async_trait]
pub trait TableQueryFn: Send + Sync {
    /// Run the query.
    async fn table_query(&self, args: TableQueryArgs) -> Result<TableResponse, BoxError>;
}

#[async_trait::async_trait]
impl<F, Fut> TableQueryFn for F
where
    F: Fn(TableQueryArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TableResponse, BoxError>> + Send + 'static,
{
    async fn table_query(&self, args: TableQueryArgs) -> Result<TableResponse, BoxError> {
        self(args).await
    }
}

/// The query functions registered for a single target.
///
/// Either function may be absent; querying a target for a kind it has no
/// function for fails with [`QueryError::NotImplemented`].
#[derive(Clone, Default)]
pub struct Endpoint {
    query: Option<Arc<dyn TimeSeriesQueryFn>>,
    table_query: Option<Arc<dyn TableQueryFn>>,
}

impl Endpoint {
    /// Create an endpoint with no query functions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this endpoint with the given time series query function.
    #[must_use]
    pub fn with_query(mut self, query: impl TimeSeriesQueryFn + 'static) -> Self {
        self.query = Some(Arc::new(query));
        self
    }

    /// Return this endpoint with the given table query function.
    #[must_use]
    pub fn with_table_query(mut self, table_query: impl TableQueryFn + 'static) -> Self {
        self.table_query = Some(Arc::new(table_query));
        self
    }

    /// Whether this endpoint can answer queries of the given kind.
    #[must_use]
    pub fn supports(&self, kind: QueryKind) -> bool {
        match kind {
            QueryKind::TimeSeries => self.query.is_some(),
            QueryKind::Table => self.table_query.is_some(),
        }
    }

    fn is_empty(&self) -> bool {
        self.query.is_none() && self.table_query.is_none()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("query", &self.query.is_some())
            .field("table_query", &self.table_query.is_some())
            .finish()
    }
}

/// Maps target names to the [`Endpoint`]s serving them.
///
/// A `TargetTable` implements both [`SearchService`] and [`QueryService`], so it
/// can be attached to a [`Server`][crate::backend::Server] with
/// [`Server::target_table`][crate::backend::Server::target_table].
///
/// # Example
///
/// ```rust
/// use grafana_simplejson::{
///     backend::{BoxError, Endpoint, TargetTable},
///     data::{QueryArgs, TimeSeriesResponse},
/// };
///
/// let table = TargetTable::new().with_target(
///     "cpu",
///     Endpoint::new().with_query(|args: QueryArgs| async move {
///         Ok::<_, BoxError>(TimeSeriesResponse::new(args.target))
///     }),
/// );
/// assert_eq!(table.targets(), vec!["cpu".to_string()]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct TargetTable {
    endpoints: BTreeMap<String, Endpoint>,
}

impl TargetTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this table with the given target added, replacing any existing
    /// endpoint with the same name.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>, endpoint: Endpoint) -> Self {
        self.insert(target, endpoint);
        self
    }

    /// Add a target, returning the endpoint it replaced, if any.
    pub fn insert(&mut self, target: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        self.endpoints.insert(target.into(), endpoint)
    }

    /// The names of all targets that can answer at least one kind of query,
    /// in lexicographic order.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|(_, endpoint)| !endpoint.is_empty())
            .map(|(target, _)| target.clone())
            .collect()
    }

    fn endpoint(&self, target: &str, kind: QueryKind) -> Result<&Endpoint, QueryError> {
        self.endpoints
            .get(target)
            .ok_or_else(|| QueryError::UnknownTarget {
                target: target.to_string(),
                kind,
            })
    }

    /// Run a time series query against `target`.
    ///
    /// If the returned series has no label, it is labelled with `target`.
    ///
    /// # Errors
    ///
    /// - [`QueryError::UnknownTarget`] if `target` is not in the table,
    /// - [`QueryError::NotImplemented`] if `target` has no time series query function,
    /// - [`QueryError::Callback`] with the query function's error, unchanged.
    pub async fn run_query(
        &self,
        target: &str,
        args: QueryArgs,
    ) -> Result<TimeSeriesResponse, QueryError> {
        let kind = QueryKind::TimeSeries;
        let query = self.endpoint(target, kind)?.query.as_ref().ok_or_else(|| {
            QueryError::NotImplemented {
                target: target.to_string(),
                kind,
            }
        })?;
        let mut response = query.query(args).await.map_err(QueryError::Callback)?;
        if response.target.is_empty() {
            response.target = target.to_string();
        }
        Ok(response)
    }

    /// Run a table query against `target`.
    ///
    /// # Errors
    ///
    /// - [`QueryError::UnknownTarget`] if `target` is not in the table,
    /// - [`QueryError::NotImplemented`] if `target` has no table query function,
    /// - [`QueryError::Callback`] with the query function's error, unchanged,
    /// - [`QueryError::InvalidTable`] if the returned table's columns differ in length.
    pub async fn run_table_query(
        &self,
        target: &str,
        args: TableQueryArgs,
    ) -> Result<TableResponse, QueryError> {
        let kind = QueryKind::Table;
        let table_query = self
            .endpoint(target, kind)?
            .table_query
            .as_ref()
            .ok_or_else(|| QueryError::NotImplemented {
                target: target.to_string(),
                kind,
            })?;
        let response = table_query
            .table_query(args)
            .await
            .map_err(QueryError::Callback)?;
        response.check()?;
        Ok(response)
    }
}

#[async_trait::async_trait]
impl SearchService for TargetTable {
    async fn search(&self) -> Vec<String> {
        self.targets()
    }
}

#[async_trait::async_trait]
impl QueryService for TargetTable {
    fn supports(&self, kind: QueryKind) -> bool {
        self.endpoints.values().any(|e| e.supports(kind))
    }

    fn resolve_kind(&self, target: &str, requested: Option<QueryKind>) -> QueryKind {
        let fallback = requested.unwrap_or(QueryKind::TimeSeries);
        let Some(endpoint) = self.endpoints.get(target) else {
            return fallback;
        };
        match (
            endpoint.supports(QueryKind::TimeSeries),
            endpoint.supports(QueryKind::Table),
        ) {
            (true, false) => QueryKind::TimeSeries,
            (false, true) => QueryKind::Table,
            _ => fallback,
        }
    }

    async fn time_series_query(
        &self,
        target: &str,
        args: QueryArgs,
    ) -> Result<TimeSeriesResponse, QueryError> {
        self.run_query(target, args).await
    }

    async fn table_query(
        &self,
        target: &str,
        args: TableQueryArgs,
    ) -> Result<TableResponse, QueryError> {
        self.run_table_query(target, args).await
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use chrono::prelude::*;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        data::{DataPoint, TimeRange},
        prelude::*,
    };

    async fn query(args: QueryArgs) -> Result<TimeSeriesResponse, BoxError> {
        Ok(TimeSeriesResponse::default().with_datapoints([DataPoint::new(
            args.range.from,
            args.max_data_points as f64,
        )]))
    }

    async fn table_query(_args: TableQueryArgs) -> Result<TableResponse, BoxError> {
        Ok(TableResponse::new().with_column([1.0, 2.0].into_column("x")))
    }

    async fn failing_query(_args: QueryArgs) -> Result<TimeSeriesResponse, BoxError> {
        Err(io::Error::new(io::ErrorKind::Other, "backend unavailable").into())
    }

    fn table() -> TargetTable {
        TargetTable::new()
            .with_target("tablequery", Endpoint::new().with_table_query(table_query))
            .with_target("query", Endpoint::new().with_query(query))
            .with_target("empty", Endpoint::new())
            .with_target(
                "both",
                Endpoint::new()
                    .with_query(query)
                    .with_table_query(table_query),
            )
            .with_target("failing", Endpoint::new().with_query(failing_query))
    }

    #[test]
    fn targets_are_sorted() {
        assert_eq!(
            table().targets(),
            vec!["both", "failing", "query", "tablequery"]
        );
        let table = TargetTable::new()
            .with_target("query", Endpoint::new().with_query(query))
            .with_target(
                "both",
                Endpoint::new()
                    .with_query(query)
                    .with_table_query(table_query),
            );
        assert_eq!(table.targets(), vec!["both", "query"]);
    }

    #[tokio::test]
    async fn run_query() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
        );
        let mut args = QueryArgs::new("query", range);
        args.max_data_points = 10;
        let response = table().run_query("query", args).await.unwrap();
        assert_eq!(response.target, "query");
        assert_eq!(
            response.datapoints,
            vec![DataPoint::new(range.from, 10.0)]
        );
    }

    #[tokio::test]
    async fn run_query_errors() {
        let table = table();

        let err = table
            .run_query("tablequery", QueryArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::NotImplemented {
                kind: QueryKind::TimeSeries,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "target 'tablequery' does not implement Time Series Query"
        );

        let err = table
            .run_query("empty", QueryArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotImplemented { .. }));

        let err = table
            .run_query("invalid", QueryArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownTarget { .. }));
        assert_eq!(
            err.to_string(),
            "unknown target 'invalid' for Time Series Query"
        );

        let err = table
            .run_query("failing", QueryArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Callback(_)));
        assert_eq!(err.to_string(), "backend unavailable");
    }

    #[tokio::test]
    async fn run_table_query() {
        let response = table()
            .run_table_query("both", TableQueryArgs::default())
            .await
            .unwrap();
        assert_eq!(response.columns.len(), 1);
    }

    #[tokio::test]
    async fn run_table_query_errors() {
        let table = table();

        let err = table
            .run_table_query("query", TableQueryArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::NotImplemented {
                kind: QueryKind::Table,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "target 'query' does not implement Table Query"
        );

        let err = table
            .run_table_query("invalid", TableQueryArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownTarget { .. }));
        assert_eq!(err.to_string(), "unknown target 'invalid' for Table Query");
    }

    #[tokio::test]
    async fn invalid_table() {
        let table = TargetTable::new().with_target(
            "ragged",
            Endpoint::new().with_table_query(|_args: TableQueryArgs| async {
                Ok::<_, BoxError>(
                    TableResponse::new()
                        .with_column([1.0, 2.0].into_column("x"))
                        .with_column(["a"].into_column("y")),
                )
            }),
        );
        let err = table
            .run_table_query("ragged", TableQueryArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidTable(_)));
    }

    #[test]
    fn resolve_kind() {
        let table = table();
        let cases = [
            ("query", None, QueryKind::TimeSeries),
            ("query", Some(QueryKind::Table), QueryKind::TimeSeries),
            ("tablequery", None, QueryKind::Table),
            ("tablequery", Some(QueryKind::TimeSeries), QueryKind::Table),
            ("both", None, QueryKind::TimeSeries),
            ("both", Some(QueryKind::Table), QueryKind::Table),
            ("empty", Some(QueryKind::Table), QueryKind::Table),
            ("invalid", None, QueryKind::TimeSeries),
        ];
        for (target, requested, expected) in cases {
            assert_eq!(
                table.resolve_kind(target, requested),
                expected,
                "{target} {requested:?}"
            );
        }
    }
}
