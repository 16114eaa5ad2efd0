//! Table responses.
use chrono::prelude::*;
use itertools::Itertools;
use serde::{
    de::Error as _,
    ser::{Error as _, SerializeSeq, SerializeStruct},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;

use crate::data::Error;

/// The type of the values held in a [`Column`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Timestamps, serialized as milliseconds since the Unix epoch.
    Time,
    /// Numbers, serialized as floats.
    Number,
    /// Strings.
    String,
}

/// The values of a single [`Column`].
///
/// Every variant holds values of exactly one type, so a column can never
/// contain mixed-type cells.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    /// A column of timestamps.
    Time(Vec<DateTime<Utc>>),
    /// A column of numbers.
    Number(Vec<f64>),
    /// A column of strings.
    String(Vec<String>),
}

impl ColumnData {
    /// The declared type of this column.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Time(_) => ColumnType::Time,
            Self::Number(_) => ColumnType::Number,
            Self::String(_) => ColumnType::String,
        }
    }

    /// The number of values in this column.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Time(v) => v.len(),
            Self::Number(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    /// Whether this column has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty(type_: ColumnType, capacity: usize) -> Self {
        match type_ {
            ColumnType::Time => Self::Time(Vec::with_capacity(capacity)),
            ColumnType::Number => Self::Number(Vec::with_capacity(capacity)),
            ColumnType::String => Self::String(Vec::with_capacity(capacity)),
        }
    }

    fn push_json(&mut self, cell: Value) -> Result<(), String> {
        match self {
            Self::Time(v) => {
                let millis = cell
                    .as_i64()
                    .ok_or_else(|| format!("expected timestamp in milliseconds, got {cell}"))?;
                v.push(
                    Utc.timestamp_millis_opt(millis)
                        .single()
                        .ok_or_else(|| format!("invalid timestamp {millis}"))?,
                );
            }
            Self::Number(v) => v.push(match cell {
                Value::Null => f64::NAN,
                cell => cell
                    .as_f64()
                    .ok_or_else(|| format!("expected number, got {cell}"))?,
            }),
            Self::String(v) => match cell {
                Value::String(s) => v.push(s),
                cell => return Err(format!("expected string, got {cell}")),
            },
        }
        Ok(())
    }

    fn serialize_cell<S>(&self, seq: &mut S, index: usize) -> Result<(), S::Error>
    where
        S: SerializeSeq,
    {
        match self {
            Self::Time(v) => seq.serialize_element(&v[index].timestamp_millis()),
            Self::Number(v) => seq.serialize_element(&v[index]),
            Self::String(v) => seq.serialize_element(&v[index]),
        }
    }
}

/// A named column of a [`TableResponse`].
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// The column header.
    pub text: String,
    /// The values of the column.
    pub data: ColumnData,
}

impl Column {
    /// Create a new column.
    #[must_use]
    pub fn new(text: impl Into<String>, data: ColumnData) -> Self {
        Self {
            text: text.into(),
            data,
        }
    }
}

/// Indicates that a type can be stored in a [`Column`].
pub trait ColumnValue: Sized {
    /// The column type values of this type are stored as.
    const COLUMN_TYPE: ColumnType;
    /// Convert a vector of values into column data.
    fn into_column_data(values: Vec<Self>) -> ColumnData;
}

impl ColumnValue for DateTime<Utc> {
    const COLUMN_TYPE: ColumnType = ColumnType::Time;
    fn into_column_data(values: Vec<Self>) -> ColumnData {
        ColumnData::Time(values)
    }
}

impl ColumnValue for String {
    const COLUMN_TYPE: ColumnType = ColumnType::String;
    fn into_column_data(values: Vec<Self>) -> ColumnData {
        ColumnData::String(values)
    }
}

impl ColumnValue for &str {
    const COLUMN_TYPE: ColumnType = ColumnType::String;
    fn into_column_data(values: Vec<Self>) -> ColumnData {
        ColumnData::String(values.into_iter().map(str::to_string).collect())
    }
}

macro_rules! impl_columnvalue_for_number {
    ($($ty: ty),*) => {
        $(
            impl ColumnValue for $ty {
                const COLUMN_TYPE: ColumnType = ColumnType::Number;
                fn into_column_data(values: Vec<Self>) -> ColumnData {
                    ColumnData::Number(values.into_iter().map(|x| x as f64).collect())
                }
            }
        )*
    };
}

impl_columnvalue_for_number!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// Helper trait for creating a [`Column`] from an iterable of values.
///
/// ```rust
/// use grafana_simplejson::{data::ColumnType, prelude::*};
///
/// let column = ["a", "b"].into_column("name");
/// assert_eq!(column.data.column_type(), ColumnType::String);
/// ```
pub trait IntoColumn {
    /// Create a [`Column`] from `self`.
    fn into_column(self, text: impl Into<String>) -> Column;
}

impl<I, T> IntoColumn for I
where
    I: IntoIterator<Item = T>,
    T: ColumnValue,
{
    fn into_column(self, text: impl Into<String>) -> Column {
        Column::new(text, T::into_column_data(self.into_iter().collect()))
    }
}

/// The response to a table query for a single target.
///
/// Tables are stored by column and transposed into rows when serialized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableResponse {
    /// The columns of the table.
    pub columns: Vec<Column>,
}

impl TableResponse {
    /// Create a new table with no columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this table with an extra column appended.
    #[must_use]
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// The number of rows of the table, if all columns have the same length.
    fn n_rows(&self) -> Result<usize, Error> {
        self.check()?;
        Ok(self.columns.first().map_or(0, |c| c.data.len()))
    }

    /// Check that all columns of this table have the same length.
    ///
    /// # Errors
    ///
    /// Returns an error listing each column's length if they differ.
    pub fn check(&self) -> Result<(), Error> {
        if self.columns.iter().map(|c| c.data.len()).all_equal() {
            Ok(())
        } else {
            Err(Error::ColumnLengthMismatch {
                lengths: self
                    .columns
                    .iter()
                    .map(|c| (c.text.clone(), c.data.len()))
                    .collect(),
            })
        }
    }
}

#[derive(Serialize)]
struct SerializableColumn<'a> {
    text: &'a str,
    #[serde(rename = "type")]
    type_: ColumnType,
}

#[derive(Deserialize)]
struct RawColumn {
    text: String,
    #[serde(rename = "type")]
    type_: ColumnType,
}

struct SerializableRows<'a> {
    columns: &'a [Column],
    n_rows: usize,
}

impl Serialize for SerializableRows<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut rows = serializer.serialize_seq(Some(self.n_rows))?;
        for index in 0..self.n_rows {
            rows.serialize_element(&SerializableRow {
                columns: self.columns,
                index,
            })?;
        }
        rows.end()
    }
}

struct SerializableRow<'a> {
    columns: &'a [Column],
    index: usize,
}

impl Serialize for SerializableRow<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut row = serializer.serialize_seq(Some(self.columns.len()))?;
        for column in self.columns {
            column.data.serialize_cell(&mut row, self.index)?;
        }
        row.end()
    }
}

impl Serialize for TableResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let n_rows = self.n_rows().map_err(S::Error::custom)?;
        let columns: Vec<_> = self
            .columns
            .iter()
            .map(|c| SerializableColumn {
                text: &c.text,
                type_: c.data.column_type(),
            })
            .collect();
        let mut table = serializer.serialize_struct("TableResponse", 3)?;
        table.serialize_field("columns", &columns)?;
        table.serialize_field(
            "rows",
            &SerializableRows {
                columns: &self.columns,
                n_rows,
            },
        )?;
        table.serialize_field("type", "table")?;
        table.end()
    }
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(default)]
    columns: Vec<RawColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl<'de> Deserialize<'de> for TableResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawTable::deserialize(deserializer)?;
        let mut data: Vec<_> = raw
            .columns
            .iter()
            .map(|c| ColumnData::empty(c.type_, raw.rows.len()))
            .collect();
        for (i, row) in raw.rows.into_iter().enumerate() {
            if row.len() != data.len() {
                return Err(D::Error::custom(format!(
                    "row {i} has {} cells, expected {}",
                    row.len(),
                    data.len()
                )));
            }
            for (column, cell) in data.iter_mut().zip(row) {
                column
                    .push_json(cell)
                    .map_err(|e| D::Error::custom(format!("row {i}: {e}")))?;
            }
        }
        Ok(Self {
            columns: raw
                .columns
                .into_iter()
                .zip(data)
                .map(|(c, data)| Column::new(c.text, data))
                .collect(),
        })
    }
}
