//! Writer sessions.
//!
//! A [`Session`] is built once from string properties and never changes afterwards. Writing with a
//! different list layout means building a new session; the old one should be dropped first.
use std::path::Path;

use tracing::info;

use crate::arrow::array::RecordBatch;
use crate::config::{
    SessionConfig, WriteMode, WriteOptions, LIST_LAYOUT, MAX_RECORDS_PER_FILE, MERGE_READ_MODE,
};
use crate::layout::ListPhysicalLayout;
use crate::reconciliation::MergeReadMode;
use crate::table::{CommitInfo, Table};
use crate::LayoutResult;

/// Collects session properties. Later properties override earlier ones with the same key.
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    properties: Vec<(String, String)>,
}

impl SessionBuilder {
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn with_properties<K, V>(mut self, properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_list_layout(self, layout: ListPhysicalLayout) -> Self {
        self.with_property(LIST_LAYOUT, layout.to_string())
    }

    pub fn with_max_records_per_file(self, max_records: usize) -> Self {
        self.with_property(MAX_RECORDS_PER_FILE, max_records.to_string())
    }

    pub fn with_merge_read_mode(self, mode: MergeReadMode) -> Self {
        self.with_property(MERGE_READ_MODE, mode.to_string())
    }

    /// Parse the properties. This is the only point at which the list layout is read.
    pub fn build(self) -> LayoutResult<Session> {
        let config = SessionConfig::try_from_properties(self.properties)?;
        info!(
            list_layout = %config.list_layout,
            merge_read_mode = %config.merge_read_mode,
            max_records_per_file = config.max_records_per_file.get(),
            "built writer session"
        );
        Ok(Session { config })
    }
}

/// A writer bound to one immutable configuration.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn list_layout(&self) -> ListPhysicalLayout {
        self.config.list_layout
    }

    /// Write `batch` to the table at `options.target_path`, creating the table if needed.
    ///
    /// [`WriteMode::Overwrite`] replaces the table's content; [`WriteMode::Append`] upserts by
    /// record key. Every list column is written in this session's layout. On failure nothing of
    /// this write remains in the table; a write the table refuses is [`Error::WriteRejected`].
    ///
    /// [`Error::WriteRejected`]: crate::Error::WriteRejected
    pub fn write_batch(
        &self,
        batch: &RecordBatch,
        mode: WriteMode,
        options: &WriteOptions,
    ) -> LayoutResult<CommitInfo> {
        std::fs::create_dir_all(&options.target_path)?;
        let table = Table::try_new(&options.target_path)?;
        table.write(batch, mode, options, &self.config)
    }

    /// Read the latest version of every record of the table at `path`, meta columns included.
    pub fn read_table(&self, path: impl AsRef<Path>) -> LayoutResult<Vec<RecordBatch>> {
        Table::try_new(path)?.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureBuilder;
    use crate::layout::detect_file_list_layout;
    use crate::schema::{Nullability, LIST_FIELD};

    #[test]
    fn later_properties_win() {
        let session = Session::builder()
            .with_property("write.list.legacyFormat", "true")
            .with_list_layout(ListPhysicalLayout::ThreeLevel)
            .with_merge_read_mode(MergeReadMode::Normalized)
            .with_max_records_per_file(7)
            .build()
            .unwrap();
        assert_eq!(session.list_layout(), ListPhysicalLayout::ThreeLevel);
        assert_eq!(session.config().merge_read_mode, MergeReadMode::Normalized);
        assert_eq!(session.config().max_records_per_file.get(), 7);
    }

    #[test]
    fn invalid_property_fails_build() {
        let result = Session::builder()
            .with_properties([("write.list.layout", "one-level")])
            .build();
        crate::utils::test_utils::assert_result_error_with_message(
            result,
            "Invalid configuration for 'write.list.layout'",
        );
    }

    #[test]
    fn writes_in_session_layout() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = FixtureBuilder::new(Nullability::Nullable, Nullability::NotNullable);
        let options = WriteOptions::new("t", dir.path());
        for layout in [ListPhysicalLayout::TwoLevel, ListPhysicalLayout::ThreeLevel] {
            let session = Session::builder().with_list_layout(layout).build().unwrap();
            let commit = session
                .write_batch(&fixture.build().unwrap(), WriteMode::Overwrite, &options)
                .unwrap();
            let table = Table::try_new(dir.path()).unwrap();
            for file in table.files_in_commit(commit.instant).unwrap() {
                assert_eq!(detect_file_list_layout(&file.path, LIST_FIELD).unwrap(), layout);
            }
            let rows: usize = session
                .read_table(dir.path())
                .unwrap()
                .iter()
                .map(RecordBatch::num_rows)
                .sum();
            assert_eq!(rows, fixture.records().len());
        }
    }

    #[test]
    fn write_creates_the_table_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("warehouse").join("t");
        let fixture = FixtureBuilder::new(Nullability::NotNullable, Nullability::NotNullable);
        let session = Session::builder().build().unwrap();
        crate::utils::test_utils::assert_result_error_with_message(
            session.read_table(&target),
            "Path does not exist",
        );
        assert!(!target.exists());

        session
            .write_batch(
                &fixture.build().unwrap(),
                WriteMode::Overwrite,
                &WriteOptions::new("t", &target),
            )
            .unwrap();
        assert!(target.is_dir());
        let rows: usize = session
            .read_table(&target)
            .unwrap()
            .iter()
            .map(RecordBatch::num_rows)
            .sum();
        assert_eq!(rows, fixture.records().len());
    }
}
