//! Request and response types of the SimpleJSON protocol.
//!
//! Requests sent by Grafana are deserialized into the argument types in this module
//! ([`QueryRequest`], [`AnnotationRequest`]) before being handed to the services
//! registered on a [`Server`][crate::backend::Server]. The results returned by those
//! services ([`TimeSeriesResponse`], [`TableResponse`], [`Annotation`]) serialize to
//! the exact JSON shapes the SimpleJSON datasource expects.
//!
//! All timestamps are emitted as integer milliseconds since the Unix epoch.
//!
//! For example, a table with a time column and a number column:
//!
//! ```
//! use chrono::prelude::*;
//! use grafana_simplejson::{data::TableResponse, prelude::*};
//!
//! let table = TableResponse::new()
//!     .with_column([Utc.timestamp_millis_opt(1_000).unwrap()].into_column("time"))
//!     .with_column([42.0].into_column("value"));
//! assert_eq!(
//!     serde_json::to_string(&table).unwrap(),
//!     r#"{"columns":[{"text":"time","type":"time"},{"text":"value","type":"number"}],"rows":[[1000,42.0]],"type":"table"}"#,
//! );
//! ```
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

mod annotation;
mod error;
mod query;
mod series;
mod table;

pub use annotation::{Annotation, AnnotationRequest, AnnotationResponse, RequestAnnotation};
pub use error::Error;
pub use query::{
    QueryArgs, QueryKind, QueryRequest, QueryResponse, QueryTarget, TableQueryArgs,
};
pub use series::{DataPoint, TimeSeriesResponse};
pub use table::{Column, ColumnData, ColumnType, ColumnValue, IntoColumn, TableResponse};

/// The time range of a query or annotation request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TimeRange {
    /// The start of the range.
    pub from: DateTime<Utc>,
    /// The end of the range.
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Create a new time range.
    #[must_use]
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// An ad-hoc filter set on the dashboard, passed along with every query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AdhocFilter {
    /// The key being filtered on.
    pub key: String,
    /// The comparison operator, such as `=` or `!=`.
    #[serde(default)]
    pub operator: String,
    /// The value being compared against.
    #[serde(default)]
    pub value: String,
}

impl AdhocFilter {
    /// Create a new filter.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}
