//! Error types returned when building responses.
use itertools::Itertools;
use thiserror::Error;

/// Errors that can occur when constructing SimpleJSON responses.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Occurs when a table had mismatched column lengths while checking.
    #[error(
        "Table column length mismatch: {}",
        .lengths.iter().map(|x| format!("{} ({})", x.0, x.1)).join(", ")
    )]
    ColumnLengthMismatch {
        /// The names and lengths of the columns in the table.
        lengths: Vec<(String, usize)>,
    },
}
