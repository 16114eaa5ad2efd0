/*! A Rust implementation of the Grafana SimpleJSON datasource protocol.

The [SimpleJSON datasource] lets Grafana query any HTTP server which implements a
handful of JSON endpoints. This crate implements the server side of that protocol,
leaving you to provide the functions which actually produce data. It is divided into two modules:

- [`backend`] contains the [`Server`][backend::Server] which serves the protocol's HTTP routes,
  the traits implemented by the services plugged into it, and the [`TargetTable`][backend::TargetTable]
  which maps target names to query functions.
- [`data`] contains the request and response types of the protocol, such as
  [`TimeSeriesResponse`][data::TimeSeriesResponse]s, [`TableResponse`][data::TableResponse]s and
  [`Annotation`][data::Annotation]s, which serialize to the exact JSON expected by Grafana.

The [`prelude`] contains some useful unambiguous traits which are helpful when creating tables.

See `examples/main.rs` in this crate for a complete server.

# Feature flags

The following feature flags enable additional functionality for this crate:

- `prometheus` (enabled by default) - adds a [`PrometheusRecorder`][crate::backend::PrometheusRecorder]
  which records request durations into a [`prometheus::Registry`], and a
  [`Server::metrics_route`][crate::backend::Server::metrics_route] exposing that registry.

[SimpleJSON datasource]: https://grafana.com/grafana/plugins/grafana-simple-json-datasource/
*/
#![cfg_attr(docsrs, feature(doc_notable_trait))]
#![deny(missing_docs)]

#[doc(hidden)]
pub use serde_json;

pub mod backend;
pub mod data;

/// Re-exports of traits which make building responses more ergonomic.
pub mod prelude {
    pub use crate::data::{ColumnValue, IntoColumn};
}
