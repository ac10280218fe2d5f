//! Writer session configuration and per-write options.
//!
//! [`SessionConfig`] is parsed once from string key/value pairs when a [`Session`] is built and is
//! immutable afterwards: changing the list layout means building a new session.
//!
//! [`Session`]: crate::session::Session
use std::collections::HashMap;
use std::num::NonZero;
use std::path::PathBuf;

use tracing::warn;

use crate::layout::ListPhysicalLayout;
use crate::reconciliation::MergeReadMode;
use crate::schema::{KEY_FIELD, ORDERING_FIELD, PARTITION_FIELD};
use crate::{Error, LayoutResult};

pub(crate) const LIST_LAYOUT: &str = "write.list.layout";
pub(crate) const LIST_LEGACY_FORMAT: &str = "write.list.legacyFormat";
pub(crate) const MAX_RECORDS_PER_FILE: &str = "write.maxRecordsPerFile";
pub(crate) const MERGE_READ_MODE: &str = "merge.readMode";

const DEFAULT_MAX_RECORDS_PER_FILE: usize = 100_000;

/// Settings a writer session reads once, at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Physical layout of every list column this session writes. `write.list.layout` takes
    /// `two-level` or `three-level`; `write.list.legacyFormat=true` is a shorthand for two-level.
    pub list_layout: ListPhysicalLayout,

    /// Upper bound of records per data file for inserts. More records start a new file group.
    pub max_records_per_file: NonZero<usize>,

    /// How upserts read the base file of a file group they rewrite.
    pub merge_read_mode: MergeReadMode,

    /// Any key/value pair that is not a recognized setting.
    pub unknown_properties: HashMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            list_layout: ListPhysicalLayout::ThreeLevel,
            max_records_per_file: NonZero::new(DEFAULT_MAX_RECORDS_PER_FILE)
                .unwrap_or(NonZero::<usize>::MIN),
            merge_read_mode: MergeReadMode::default(),
            unknown_properties: HashMap::new(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> LayoutResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::invalid_configuration(
            key,
            format!("expected 'true' or 'false', got '{value}'"),
        )),
    }
}

impl SessionConfig {
    /// Parse a session configuration. Unknown keys are kept in `unknown_properties`; a known key
    /// with an invalid value is an error.
    pub fn try_from_properties<I, K, V>(properties: I) -> LayoutResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str> + Into<String>,
        V: AsRef<str> + Into<String>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            if !config.try_parse(key.as_ref(), value.as_ref())? {
                warn!(key = key.as_ref(), "ignoring unknown session property");
                config.unknown_properties.insert(key.into(), value.into());
            }
        }
        Ok(config)
    }

    // Returns Ok(false) for keys this config does not know about.
    fn try_parse(&mut self, key: &str, value: &str) -> LayoutResult<bool> {
        match key {
            LIST_LAYOUT => {
                self.list_layout = value.parse().map_err(|_| {
                    Error::invalid_configuration(
                        key,
                        format!("expected 'two-level' or 'three-level', got '{value}'"),
                    )
                })?
            }
            LIST_LEGACY_FORMAT => {
                self.list_layout = if parse_bool(key, value)? {
                    ListPhysicalLayout::TwoLevel
                } else {
                    ListPhysicalLayout::ThreeLevel
                }
            }
            MAX_RECORDS_PER_FILE => {
                self.max_records_per_file = value.parse().map_err(|_| {
                    Error::invalid_configuration(
                        key,
                        format!("expected a positive integer, got '{value}'"),
                    )
                })?
            }
            MERGE_READ_MODE => {
                self.merge_read_mode = value.parse().map_err(|_| {
                    Error::invalid_configuration(
                        key,
                        format!("expected 'writer-layout' or 'normalized', got '{value}'"),
                    )
                })?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Whether a write replaces the table or upserts into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop everything in the table and write the batch as its only content.
    Overwrite,
    /// Upsert the batch: records with an existing key update it, the rest are inserted.
    Append,
}

/// Where and how a batch is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub table_name: String,
    pub target_path: PathBuf,
    pub record_key_field: String,
    pub ordering_field: String,
    pub partition_field: String,
}

impl WriteOptions {
    pub fn new(table_name: impl Into<String>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            table_name: table_name.into(),
            target_path: target_path.into(),
            record_key_field: KEY_FIELD.to_string(),
            ordering_field: ORDERING_FIELD.to_string(),
            partition_field: PARTITION_FIELD.to_string(),
        }
    }

    pub fn with_record_key_field(mut self, field: impl Into<String>) -> Self {
        self.record_key_field = field.into();
        self
    }

    pub fn with_ordering_field(mut self, field: impl Into<String>) -> Self {
        self.ordering_field = field.into();
        self
    }
}
