//! Definitions of errors that the list layout kernel can encounter

use crate::arrow::error::ArrowError;
use crate::layout::ListPhysicalLayout;
use crate::parquet::errors::ParquetError;

/// A [`std::result::Result`] that has the kernel [`Error`] as the error variant
pub type LayoutResult<T, E = Error> = std::result::Result<T, E>;

/// All the types of errors that the kernel can run into
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error performing operations on arrow data
    #[error(transparent)]
    Arrow(#[from] ArrowError),

    /// An error reading or writing parquet data
    #[error(transparent)]
    Parquet(#[from] ParquetError),

    /// A generic error with a message
    #[error("Generic list layout error: {0}")]
    Generic(String),

    /// An error performing an IO operation on a local file
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// A commit or table metadata file could not be parsed
    #[error(transparent)]
    MalformedJson(#[from] serde_json::Error),

    /// The table location is not a usable local directory
    #[error("Invalid table location: {0}")]
    InvalidTableLocation(String),

    /// A logical column expected by an operation is missing from the data
    #[error("Column not found: {0}")]
    MissingColumn(String),

    /// An arrow or parquet type that the reader or writer does not handle
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// A commit file for this instant already exists
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    /// A file under the timeline directory does not have a valid commit file name
    #[error("Invalid timeline path: {0}")]
    InvalidTimelinePath(String),

    /// A configuration value failed to parse
    #[error("Invalid configuration for '{key}': {message}")]
    InvalidConfiguration { key: String, message: String },

    /// The list column could not be located in a file's physical schema
    #[error("List column '{column}' not found in physical schema of {}", .file.as_deref().unwrap_or("<unknown file>"))]
    SchemaColumnNotFound {
        column: String,
        file: Option<String>,
    },

    /// The named column exists, but it is not a group carrying the LIST annotation
    #[error("Column '{column}' is not a valid list group: {reason}")]
    InvalidListSchema { column: String, reason: String },

    /// Null elements were requested for a layout that cannot store them
    #[error("List column '{column}' declares nullable elements, which the {layout} layout cannot represent")]
    UnrepresentableLayout {
        column: String,
        layout: ListPhysicalLayout,
    },

    /// A write scenario was submitted to the reconciliation policy that cannot be constructed
    #[error("Write scenario {0} is not representable")]
    UnrepresentableScenario(String),

    /// The files of one commit were written with more than one list layout
    #[error("Commit {instant} mixes list layouts: {layouts:?}")]
    LayoutMixMismatch {
        instant: u64,
        layouts: Vec<ListPhysicalLayout>,
    },

    /// The table refused to persist a write
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// The number of records read back differs from the number expected
    #[error("Expected {expected} records but found {actual}\n{diff}")]
    RecordCountMismatch {
        expected: usize,
        actual: usize,
        diff: String,
    },

    /// At least one record read back differs from its expected value
    #[error("Records differ from the expected values\n{0}")]
    RecordValueMismatch(String),
}

// Convenience constructors for Error types that take a String argument
impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }
    pub fn missing_column(name: impl ToString) -> Self {
        Self::MissingColumn(name.to_string())
    }
    pub fn unsupported_type(msg: impl ToString) -> Self {
        Self::UnsupportedType(msg.to_string())
    }
    pub fn invalid_table_location(location: impl ToString) -> Self {
        Self::InvalidTableLocation(location.to_string())
    }
    pub fn write_rejected(msg: impl ToString) -> Self {
        Self::WriteRejected(msg.to_string())
    }
    pub fn invalid_timeline_path(path: impl std::fmt::Debug) -> Self {
        Self::InvalidTimelinePath(format!("{path:?}"))
    }
    pub fn column_not_found(column: impl ToString, file: Option<&str>) -> Self {
        Self::SchemaColumnNotFound {
            column: column.to_string(),
            file: file.map(str::to_string),
        }
    }
    pub fn invalid_list_schema(column: impl ToString, reason: impl ToString) -> Self {
        Self::InvalidListSchema {
            column: column.to_string(),
            reason: reason.to_string(),
        }
    }
    pub fn invalid_configuration(key: impl ToString, message: impl ToString) -> Self {
        Self::InvalidConfiguration {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_write_rejected(&self) -> bool {
        matches!(self, Self::WriteRejected(_))
    }
}
