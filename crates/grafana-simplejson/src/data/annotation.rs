//! Annotation requests and responses.
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::TimeRange;

/// The annotation descriptor configured on a dashboard.
///
/// This is sent by Grafana with every annotation request and echoed back
/// alongside each resulting [`Annotation`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct RequestAnnotation {
    /// The name of the annotation.
    pub name: String,
    /// The datasource the annotation is configured on.
    #[serde(default)]
    pub datasource: String,
    /// Whether the annotation is enabled.
    #[serde(default)]
    pub enable: bool,
    /// The query string entered by the user.
    #[serde(default)]
    pub query: String,
}

impl RequestAnnotation {
    /// Create a new annotation descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        datasource: impl Into<String>,
        enable: bool,
        query: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            datasource: datasource.into(),
            enable,
            query: query.into(),
        }
    }
}

/// The body of an `/annotations` request.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub struct AnnotationRequest {
    /// The time range annotations are requested for.
    pub range: TimeRange,
    /// The annotation descriptor.
    pub annotation: RequestAnnotation,
}

impl AnnotationRequest {
    /// Create a new annotation request.
    #[must_use]
    pub fn new(range: TimeRange, annotation: RequestAnnotation) -> Self {
        Self { range, annotation }
    }
}

/// A single annotation returned by an annotation service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Annotation {
    /// The time of the annotation.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    /// The end time of a region annotation.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_end: Option<DateTime<Utc>>,
    /// The title of the annotation.
    pub title: String,
    /// The text of the annotation.
    pub text: String,
    /// Tags attached to the annotation.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Annotation {
    /// Create a new annotation with no tags.
    #[must_use]
    pub fn new(time: DateTime<Utc>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            time,
            time_end: None,
            title: title.into(),
            text: text.into(),
            tags: Vec::new(),
        }
    }

    /// Return this annotation as a region ending at `time_end`.
    #[must_use]
    pub fn with_time_end(mut self, time_end: DateTime<Utc>) -> Self {
        self.time_end = Some(time_end);
        self
    }

    /// Return this annotation with the given tags.
    #[must_use]
    pub fn with_tags<T: Into<String>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// An [`Annotation`] as sent back to Grafana, along with the descriptor it was requested for.
#[derive(Debug, Serialize)]
pub struct AnnotationResponse<'a> {
    /// The annotation descriptor from the request.
    pub annotation: &'a RequestAnnotation,
    /// The annotation itself.
    #[serde(flatten)]
    pub result: &'a Annotation,
}
