//! Cross-layout reads of a table, and the checks that compare them with expected records.
//!
//! A table may hold files of both list layouts once its writer configuration has changed. The
//! normalizer reads such a table as one logical dataset: it verifies that no single commit mixed
//! layouts, reads every file through the arrow reader (which decodes both layouts to the same
//! logical lists), drops the meta columns and compares rows by key and fields by name.
use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use tracing::{debug, instrument};

use crate::arrow::array::RecordBatch;
use crate::layout::ListPhysicalLayout;
use crate::record::{compare_records, records_from_batch, Record};
use crate::table::{DataFile, Instant, Table, WriteOperation, META_COLUMNS};
use crate::utils::require;
use crate::{Error, LayoutResult};

/// The list layout detected in one data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    pub file: DataFile,
    pub layout: ListPhysicalLayout,
}

/// Detected list layouts of a set of data files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutReport {
    pub column: String,
    pub files: Vec<FileLayout>,
}

impl LayoutReport {
    fn try_new(column: &str, files: Vec<DataFile>) -> LayoutResult<Self> {
        let files = files
            .into_iter()
            .map(|file| {
                let layout = file.list_layout(column)?;
                debug!(file = %file.path.display(), %layout, "detected list layout");
                Ok(FileLayout { file, layout })
            })
            .collect::<LayoutResult<Vec<_>>>()?;
        Ok(Self {
            column: column.to_string(),
            files,
        })
    }

    /// Every distinct layout in the report.
    pub fn layouts(&self) -> BTreeSet<ListPhysicalLayout> {
        self.files.iter().map(|f| f.layout).collect()
    }

    /// Distinct layouts per partition.
    pub fn partition_layouts(&self) -> BTreeMap<&str, BTreeSet<ListPhysicalLayout>> {
        self.files
            .iter()
            .into_grouping_map_by(|f| f.file.partition.as_str())
            .fold(BTreeSet::new(), |mut layouts, _, f| {
                layouts.insert(f.layout);
                layouts
            })
            .into_iter()
            .collect()
    }

    pub fn is_mixed(&self) -> bool {
        self.layouts().len() > 1
    }
}

/// Detect the layout of list column `column` in the latest data file of every file group.
pub fn table_layout_report(table: &Table, column: &str) -> LayoutResult<LayoutReport> {
    LayoutReport::try_new(column, table.latest_file_slices()?)
}

/// Detect the layout of list column `column` in every data file the commit at `instant` wrote.
pub fn commit_layout_report(
    table: &Table,
    instant: Instant,
    column: &str,
) -> LayoutResult<LayoutReport> {
    LayoutReport::try_new(column, table.files_in_commit(instant)?)
}

/// The one layout every data file of the commit at `instant` uses.
///
/// A commit whose files disagree is [`Error::LayoutMixMismatch`]; a commit without data files has
/// no layout and is an error too.
#[instrument(name = "normalizer.verify_commit", skip(table), err)]
pub fn verify_commit_layout(
    table: &Table,
    instant: Instant,
    column: &str,
) -> LayoutResult<ListPhysicalLayout> {
    let layouts = commit_layout_report(table, instant, column)?
        .layouts()
        .into_iter()
        .collect_vec();
    match layouts.as_slice() {
        [layout] => Ok(*layout),
        [] => Err(Error::generic(format!(
            "Commit {instant} wrote no data files"
        ))),
        _ => Err(Error::LayoutMixMismatch {
            instant,
            layouts: layouts.clone(),
        }),
    }
}

/// Verify every live commit of the table that wrote data files, returning the layout of each.
///
/// Live commits are the last overwrite and everything after it; the files of earlier commits are
/// no longer part of the table and may not even have `column`.
#[instrument(name = "normalizer.verify_timeline", skip(table), err)]
pub fn verify_timeline_layouts(
    table: &Table,
    column: &str,
) -> LayoutResult<BTreeMap<Instant, ListPhysicalLayout>> {
    let timeline = table.timeline()?;
    let live_from = timeline
        .iter()
        .rposition(|commit| commit.operation == WriteOperation::Overwrite)
        .unwrap_or(0);
    timeline
        .into_iter()
        .skip(live_from)
        .filter(|commit| !commit.write_stats.is_empty())
        .map(|commit| {
            let layout = verify_commit_layout(table, commit.instant, column)?;
            Ok((commit.instant, layout))
        })
        .collect()
}

/// Drop the meta columns from a batch read from a table. They must be the first five columns, in
/// order.
pub fn strip_meta_columns(batch: &RecordBatch) -> LayoutResult<RecordBatch> {
    let schema = batch.schema();
    let leading = schema
        .fields()
        .iter()
        .take(META_COLUMNS.len())
        .map(|f| f.name().as_str())
        .collect_vec();
    require!(
        leading == META_COLUMNS,
        Error::generic(format!(
            "Expected leading meta columns {META_COLUMNS:?}, found {leading:?}"
        ))
    );
    let data_columns = (META_COLUMNS.len()..batch.num_columns()).collect_vec();
    Ok(batch.project(&data_columns)?)
}

/// Read the table's latest records without meta columns, whatever layouts its files use.
///
/// Every commit is verified to have written a single layout first.
pub fn read_normalized(table: &Table, column: &str) -> LayoutResult<Vec<RecordBatch>> {
    verify_timeline_layouts(table, column)?;
    table
        .read()?
        .iter()
        .map(strip_meta_columns)
        .collect()
}

/// [`read_normalized`], as records.
pub fn read_logical_records(table: &Table, column: &str) -> LayoutResult<Vec<Record>> {
    read_normalized(table, column)?
        .iter()
        .map(records_from_batch)
        .flatten_ok()
        .collect()
}

/// Compare the table's logical records with `expected`, matching rows by `key_field`.
///
/// Returns [`Error::RecordCountMismatch`] or [`Error::RecordValueMismatch`] with an itemized
/// diff when they differ.
pub fn assert_table_records(
    table: &Table,
    column: &str,
    expected: Vec<Record>,
    key_field: &str,
) -> LayoutResult<()> {
    compare_records(expected, read_logical_records(table, column)?, key_field)
}
