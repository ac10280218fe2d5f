//! A copy-on-write table of parquet data files on the local filesystem.
//!
//! Data files live under `<root>/<partition>/` and are named `<file id>_<instant>.parquet`. All
//! versions of one file id form a file group; the version a commit wrote is a file slice. Upserts
//! never modify a data file in place: a file group with updated records is rewritten as a new
//! slice under the new instant.
//!
//! Every data file carries five meta columns ahead of the data columns; see [`META_COLUMNS`].
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tracing::debug;
use url::Url;

use crate::arrow::array::RecordBatch;
use crate::arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use crate::engine::reader::read_files_normalized;
use crate::layout::{detect_file_list_layout, ListPhysicalLayout};
use crate::utils::try_parse_table_uri;
use crate::{Error, LayoutResult};

pub use timeline::{CommitInfo, Instant, WriteOperation, WriteStat, TIMELINE_DIR};

pub(crate) mod timeline;
mod transaction;

/// Instant of the commit that last wrote a record.
pub const COMMIT_TIME_FIELD: &str = "_commit_time";
/// Position of a record within the commit that last wrote it.
pub const COMMIT_SEQNO_FIELD: &str = "_commit_seqno";
/// The record key, as a string.
pub const RECORD_KEY_FIELD: &str = "_record_key";
/// The partition the record lives in.
pub const PARTITION_PATH_FIELD: &str = "_partition_path";
/// Name of the data file the record was read from.
pub const FILE_NAME_FIELD: &str = "_file_name";

/// The meta columns every data file starts with, in order.
pub const META_COLUMNS: [&str; 5] = [
    COMMIT_TIME_FIELD,
    COMMIT_SEQNO_FIELD,
    RECORD_KEY_FIELD,
    PARTITION_PATH_FIELD,
    FILE_NAME_FIELD,
];

pub(crate) fn is_meta_column(name: &str) -> bool {
    META_COLUMNS.contains(&name)
}

/// Prepend the meta columns to the data columns of `schema`. Meta columns already present in
/// `schema` are dropped first, so a batch read back from a table can be written again.
pub(crate) fn with_meta_fields(schema: &ArrowSchema) -> SchemaRef {
    let meta = META_COLUMNS
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true));
    let data = schema
        .fields()
        .iter()
        .filter(|f| !is_meta_column(f.name()))
        .map(|f| f.as_ref().clone());
    SchemaRef::new(ArrowSchema::new(meta.chain(data).collect::<Vec<_>>()))
}

/// One file slice of a file group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub partition: String,
    pub file_id: String,
    pub instant: Instant,
    pub path: PathBuf,
    pub num_records: u64,
}

impl DataFile {
    fn from_stat(root: &Path, instant: Instant, stat: &WriteStat) -> Self {
        Self {
            partition: stat.partition.clone(),
            file_id: stat.file_id.clone(),
            instant,
            path: root.join(&stat.path),
            num_records: stat.num_records,
        }
    }

    pub fn file_name(&self) -> String {
        data_file_name(&self.file_id, self.instant)
    }

    /// The physical layout of list column `column` in this file, read from its footer.
    pub fn list_layout(&self, column: &str) -> LayoutResult<ListPhysicalLayout> {
        detect_file_list_layout(&self.path, column)
    }
}

pub(crate) fn data_file_name(file_id: &str, instant: Instant) -> String {
    format!("{file_id}_{instant}.parquet")
}

/// A table rooted at a local directory.
#[derive(Debug, Clone)]
pub struct Table {
    location: Url,
    root: PathBuf,
}

impl Table {
    /// Open the table at `path`, a local path or `file://` url. The directory must already exist.
    pub fn try_new(path: impl AsRef<Path>) -> LayoutResult<Self> {
        let path = path.as_ref();
        let uri = path
            .to_str()
            .ok_or_else(|| Error::invalid_table_location(path.display()))?;
        Self::try_from_uri(uri)
    }

    pub fn try_from_uri(uri: impl AsRef<str>) -> LayoutResult<Self> {
        let location = try_parse_table_uri(uri)?;
        let root = location
            .to_file_path()
            .map_err(|_| Error::invalid_table_location(&location))?;
        Ok(Self { location, root })
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All commits of the table, oldest first.
    pub fn timeline(&self) -> LayoutResult<Vec<CommitInfo>> {
        timeline::list_commits(&self.root)
    }

    pub fn latest_instant(&self) -> LayoutResult<Option<Instant>> {
        Ok(self.timeline()?.last().map(|commit| commit.instant))
    }

    pub fn commit(&self, instant: Instant) -> LayoutResult<CommitInfo> {
        self.timeline()?
            .into_iter()
            .find(|commit| commit.instant == instant)
            .ok_or_else(|| Error::generic(format!("No commit at instant {instant}")))
    }

    /// The data files written by the commit at `instant`.
    pub fn files_in_commit(&self, instant: Instant) -> LayoutResult<Vec<DataFile>> {
        let commit = self.commit(instant)?;
        Ok(commit
            .write_stats
            .iter()
            .map(|stat| DataFile::from_stat(&self.root, instant, stat))
            .collect())
    }

    /// The latest slice of every file group, ordered by partition and file id.
    ///
    /// Replays the timeline: each commit's slices replace earlier slices of the same file group,
    /// and an overwrite commit drops every file group written before it.
    pub fn latest_file_slices(&self) -> LayoutResult<Vec<DataFile>> {
        let mut slices: BTreeMap<(String, String), DataFile> = BTreeMap::new();
        for commit in self.timeline()? {
            if commit.operation == WriteOperation::Overwrite {
                slices.clear();
            }
            for stat in &commit.write_stats {
                let file = DataFile::from_stat(&self.root, commit.instant, stat);
                slices.insert((file.partition.clone(), file.file_id.clone()), file);
            }
        }
        Ok(slices.into_values().collect())
    }

    /// The latest data files grouped by partition. An empty `partitions` selects every partition.
    pub fn list_data_files(
        &self,
        partitions: &[&str],
    ) -> LayoutResult<BTreeMap<String, Vec<DataFile>>> {
        let files = self
            .latest_file_slices()?
            .into_iter()
            .filter(|file| partitions.is_empty() || partitions.contains(&file.partition.as_str()))
            .into_group_map_by(|file| file.partition.clone());
        Ok(files.into_iter().collect())
    }

    /// Read the latest version of every record, meta columns included.
    ///
    /// Files of either list layout are read into one schema with canonical list children. An
    /// empty table reads as no batches.
    pub fn read(&self) -> LayoutResult<Vec<RecordBatch>> {
        let paths = self
            .latest_file_slices()?
            .into_iter()
            .map(|file| file.path)
            .collect_vec();
        debug!(table = %self.location, files = paths.len(), "reading table");
        Ok(read_files_normalized(&paths)?
            .map(|(_, batches)| batches)
            .unwrap_or_default())
    }

    /// The logical schema of the table's latest data files, if it has any.
    pub fn schema(&self) -> LayoutResult<Option<SchemaRef>> {
        let paths = self
            .latest_file_slices()?
            .into_iter()
            .map(|file| file.path)
            .collect_vec();
        Ok(read_files_normalized(&paths)?.map(|(schema, _)| schema))
    }

    /// Record count of the latest slice of every file group, by partition.
    pub fn partition_record_counts(&self) -> LayoutResult<HashMap<String, u64>> {
        Ok(self
            .latest_file_slices()?
            .into_iter()
            .into_grouping_map_by(|file| file.partition.clone())
            .fold(0, |count, _, file| count + file.num_records))
    }
}

/// Read the latest version of every record of the table at `path`, meta columns included.
pub fn read_table(path: impl AsRef<Path>) -> LayoutResult<Vec<RecordBatch>> {
    Table::try_new(path)?.read()
}

/// The latest data files of the table at `path`, grouped by partition.
pub fn list_data_files(
    path: impl AsRef<Path>,
    partitions: &[&str],
) -> LayoutResult<BTreeMap<String, Vec<DataFile>>> {
    Table::try_new(path)?.list_data_files(partitions)
}
