//! Time series responses.
use chrono::prelude::*;
use serde::{
    de::Error as _, ser::SerializeTuple, Deserialize, Deserializer, Serialize, Serializer,
};

/// A single point of a time series.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataPoint {
    /// The time of the point.
    pub timestamp: DateTime<Utc>,
    /// The value of the point.
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

// SimpleJSON encodes points as `[value, timestamp_ms]`.
impl Serialize for DataPoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.value)?;
        tuple.serialize_element(&self.timestamp.timestamp_millis())?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for DataPoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (value, millis) = <(Option<f64>, i64)>::deserialize(deserializer)?;
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {millis}")))?;
        Ok(Self {
            timestamp,
            value: value.unwrap_or(f64::NAN),
        })
    }
}

/// The response to a time series query for a single target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesResponse {
    /// The label of the series.
    ///
    /// If left empty, the name of the requested target is used.
    pub target: String,
    /// The points of the series, in the order they should be plotted.
    pub datapoints: Vec<DataPoint>,
}

impl TimeSeriesResponse {
    /// Create a new, empty series with the given label.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            datapoints: Vec::new(),
        }
    }

    /// Return this series with the given points.
    #[must_use]
    pub fn with_datapoints(mut self, datapoints: impl IntoIterator<Item = DataPoint>) -> Self {
        self.datapoints = datapoints.into_iter().collect();
        self
    }
}
