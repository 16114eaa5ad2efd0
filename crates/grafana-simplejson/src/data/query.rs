//! Query requests and their per-target arguments.
use std::{fmt, time::Duration};

use serde::{Deserialize, Deserializer, Serialize};

use crate::data::{AdhocFilter, TableResponse, TimeRange, TimeSeriesResponse};

/// The kind of query made for a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    /// A time series query, answered with a [`TimeSeriesResponse`].
    #[serde(rename = "timeserie", alias = "timeseries")]
    TimeSeries,
    /// A table query, answered with a [`TableResponse`].
    #[serde(rename = "table")]
    Table,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeSeries => f.write_str("Time Series Query"),
            Self::Table => f.write_str("Table Query"),
        }
    }
}

/// A single target requested in a [`QueryRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct QueryTarget {
    /// The name of the target.
    pub target: String,
    /// The identifier Grafana uses to line up queries and results.
    #[serde(default)]
    pub ref_id: String,
    /// The kind of query requested, if Grafana sent one this crate recognises.
    ///
    /// This is a hint: the kind actually run is chosen by
    /// [`QueryService::resolve_kind`][crate::backend::QueryService::resolve_kind].
    #[serde(default, rename = "type", deserialize_with = "lenient_kind")]
    pub kind: Option<QueryKind>,
}

// Panels can send other formats (such as `json`), which are treated as no hint at all.
fn lenient_kind<'de, D>(deserializer: D) -> Result<Option<QueryKind>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<serde_json::Value>::deserialize(deserializer)?
        .and_then(|kind| serde_json::from_value(kind).ok()))
}

/// The body of a `/query` request.
///
/// Fields sent by Grafana that are not used by the SimpleJSON protocol are ignored.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct QueryRequest {
    /// The time range of the query.
    pub range: TimeRange,
    /// The targets requested, in the order their responses should be returned.
    #[serde(default)]
    pub targets: Vec<QueryTarget>,
    /// The maximum number of points Grafana can display.
    #[serde(default)]
    pub max_data_points: u64,
    /// The suggested interval between points, in milliseconds.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Ad-hoc filters set on the dashboard.
    #[serde(default)]
    pub adhoc_filters: Vec<AdhocFilter>,
}

impl QueryRequest {
    /// Build the arguments of a time series query for one of the request's targets.
    #[must_use]
    pub fn query_args(&self, target: &QueryTarget) -> QueryArgs {
        QueryArgs {
            target: target.target.clone(),
            range: self.range,
            adhoc_filters: self.adhoc_filters.clone(),
            max_data_points: self.max_data_points,
            interval: self.interval_ms.map(Duration::from_millis),
        }
    }

    /// Build the arguments of a table query for one of the request's targets.
    #[must_use]
    pub fn table_query_args(&self, target: &QueryTarget) -> TableQueryArgs {
        TableQueryArgs {
            target: target.target.clone(),
            range: self.range,
            adhoc_filters: self.adhoc_filters.clone(),
        }
    }
}

/// The arguments passed to a time series query.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct QueryArgs {
    /// The name of the requested target.
    pub target: String,
    /// The time range of the query.
    pub range: TimeRange,
    /// Ad-hoc filters set on the dashboard.
    pub adhoc_filters: Vec<AdhocFilter>,
    /// The maximum number of points Grafana can display.
    pub max_data_points: u64,
    /// The suggested interval between points.
    pub interval: Option<Duration>,
}

impl QueryArgs {
    /// Create arguments for the given target and time range.
    #[must_use]
    pub fn new(target: impl Into<String>, range: TimeRange) -> Self {
        Self {
            target: target.into(),
            range,
            ..Default::default()
        }
    }
}

/// The arguments passed to a table query.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct TableQueryArgs {
    /// The name of the requested target.
    pub target: String,
    /// The time range of the query.
    pub range: TimeRange,
    /// Ad-hoc filters set on the dashboard.
    pub adhoc_filters: Vec<AdhocFilter>,
}

impl TableQueryArgs {
    /// Create arguments for the given target and time range.
    #[must_use]
    pub fn new(target: impl Into<String>, range: TimeRange) -> Self {
        Self {
            target: target.into(),
            range,
            ..Default::default()
        }
    }
}

/// The response for a single target of a `/query` request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    /// A time series.
    TimeSeries(TimeSeriesResponse),
    /// A table.
    Table(TableResponse),
}
