//! Detection and reconciliation of Parquet list layouts.
//!
//! Parquet can store a repeated column in two physical shapes. The legacy *two-level* layout makes
//! the repeated field the element itself:
//!
//! ```text
//! optional group int_list (LIST) {
//!   repeated int32 array;
//! }
//! ```
//!
//! while the standard *three-level* layout wraps the element in a repeated group, so elements can
//! be null:
//!
//! ```text
//! optional group int_list (LIST) {
//!   repeated group list {
//!     optional int32 element;
//!   }
//! }
//! ```
//!
//! A table whose writer switches between the two ends up with files of both shapes. This crate
//! provides:
//!
//! - [`layout`]: classify the layout of a list column from a file's physical schema.
//! - [`schema`] and [`fixtures`]: logical schemas and deterministic rows for every nullability
//!   combination, and their physical form in either layout.
//! - [`reconciliation`]: what happens to a table when the layout changes between two writes.
//! - [`normalizer`]: read a mixed-layout table as one logical dataset and compare it with
//!   expected records.
//!
//! The [`session`] and [`table`] modules implement the copy-on-write table those components are
//! exercised against: a writer [`Session`] built once from string properties writes
//! [`RecordBatch`]es into a [`Table`] of parquet files and a commit timeline on the local
//! filesystem.
//!
//! [`RecordBatch`]: crate::arrow::array::RecordBatch

#![warn(
    unreachable_pub,
    trivial_numeric_casts,
    unused_extern_crates,
    rust_2018_idioms,
    rust_2021_compatibility,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

pub mod arrow_compat;
pub use arrow_compat::{arrow, parquet};

pub mod config;
pub(crate) mod engine;
pub mod error;
pub mod fixtures;
pub mod layout;
pub mod normalizer;
pub mod reconciliation;
pub mod record;
pub mod schema;
pub mod session;
pub mod table;
pub(crate) mod utils;

pub use config::{SessionConfig, WriteMode, WriteOptions};
pub use error::{Error, LayoutResult};
pub use layout::{
    detect_file_list_layout, detect_list_layout, open_file_schema, ListPhysicalLayout,
};
pub use reconciliation::{MergeReadMode, ReconciliationOutcome, WriteScenario};
pub use record::{Record, Value};
pub use schema::{ListColumnSchema, Nullability};
pub use session::{Session, SessionBuilder};
pub use table::{list_data_files, read_table, CommitInfo, DataFile, Table};
