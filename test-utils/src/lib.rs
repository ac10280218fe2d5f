//! A number of utilities useful for testing that we want to use in multiple crates

use std::sync::{Arc, Mutex};

use itertools::Itertools;
use list_layout_kernel::arrow::array::RecordBatch;
use list_layout_kernel::fixtures::FixtureBuilder;
use list_layout_kernel::normalizer::read_logical_records;
use list_layout_kernel::record::{batch_from_records, compare_records};
use list_layout_kernel::schema::{KEY_FIELD, LIST_FIELD, ORDERING_FIELD};
use list_layout_kernel::{
    CommitInfo, LayoutResult, ListPhysicalLayout, MergeReadMode, ReconciliationOutcome, Record,
    Session, Table, Value, WriteMode, WriteOptions, WriteScenario,
};
use tempfile::TempDir;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

pub fn assert_result_error_with_message<T, E: ToString>(res: Result<T, E>, message: &str) {
    match res {
        Ok(_) => panic!("Expected error, but got Ok result"),
        Err(error) => {
            let error_str = error.to_string();
            assert!(
                error_str.contains(message),
                "Error message does not contain the expected message.\nExpected message:\t{message}\nActual message:\t\t{error_str}"
            );
        }
    }
}

/// A table in a temporary directory, removed when dropped.
pub struct TestTable {
    dir: TempDir,
    options: WriteOptions,
}

impl TestTable {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let options = WriteOptions::new("test_table", dir.path());
        Self { dir, options }
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn table(&self) -> Table {
        Table::try_new(self.dir.path()).unwrap()
    }

    /// Write `batch` through a fresh session with `layout`, the way a writer whose configuration
    /// changed between writes would.
    pub fn write(
        &self,
        layout: ListPhysicalLayout,
        merge_read_mode: MergeReadMode,
        mode: WriteMode,
        batch: &RecordBatch,
    ) -> LayoutResult<CommitInfo> {
        let session = Session::builder()
            .with_list_layout(layout)
            .with_merge_read_mode(merge_read_mode)
            .build()?;
        session.write_batch(batch, mode, &self.options)
    }

    /// Names of every parquet file under the table root, sorted.
    pub fn data_file_names(&self) -> Vec<String> {
        fn visit(dir: &std::path::Path, names: &mut Vec<String>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    visit(&path, names);
                } else if path.extension().is_some_and(|ext| ext == "parquet") {
                    names.push(path.file_name().unwrap().to_string_lossy().to_string());
                }
            }
        }
        let mut names = vec![];
        visit(self.dir.path(), &mut names);
        names.sort();
        names
    }
}

impl Default for TestTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordering value of the initial batch of a scenario.
pub const INITIAL_ORDERING: i64 = 1;
/// Ordering value of the update batch of a scenario.
pub const UPDATE_ORDERING: i64 = 2;
/// Key the update batch of a scenario rewrites.
pub const UPDATED_KEY: i64 = 1;

/// Two writes of one [`WriteScenario`] against a fresh table, and what came of them.
pub struct ScenarioRun {
    pub scenario: WriteScenario,
    pub table: TestTable,
    pub initial: Vec<Record>,
    pub update: Vec<Record>,
    pub first_commit: CommitInfo,
    pub files_after_first_write: Vec<String>,
    pub second_write: LayoutResult<CommitInfo>,
}

impl ScenarioRun {
    /// Write the initial fixture under the scenario's initial layout, then upsert one update of
    /// [`UPDATED_KEY`] plus two new keys under its target layout.
    pub fn execute(scenario: WriteScenario, merge_read_mode: MergeReadMode) -> Self {
        let table = TestTable::new();
        let fixture = FixtureBuilder::new(scenario.list_nullability, scenario.element_nullability)
            .with_ordering_value(INITIAL_ORDERING);
        let initial = fixture.records();
        let first_commit = table
            .write(
                scenario.initial_layout,
                merge_read_mode,
                WriteMode::Overwrite,
                &fixture.build().unwrap(),
            )
            .unwrap();
        let files_after_first_write = table.data_file_names();

        let updated = fixture
            .clone()
            .with_start_key(UPDATED_KEY)
            .with_baseline_rows(1)
            .with_ordering_value(UPDATE_ORDERING)
            .baseline_only();
        let inserted = fixture
            .clone()
            .with_start_key(fixture.next_key())
            .with_baseline_rows(2)
            .with_baseline_value(300)
            .with_ordering_value(UPDATE_ORDERING)
            .baseline_only();
        let update = updated
            .records()
            .into_iter()
            .chain(inserted.records())
            .collect_vec();
        let batch = batch_from_records(fixture.schema(), &update).unwrap();
        let second_write = table.write(
            scenario.target_layout,
            merge_read_mode,
            WriteMode::Append,
            &batch,
        );

        Self {
            scenario,
            table,
            initial,
            update,
            first_commit,
            files_after_first_write,
            second_write,
        }
    }

    /// The union of both batches, the higher ordering value winning on a shared key.
    pub fn expected_records(&self) -> Vec<Record> {
        merge_by_key(&self.initial, &self.update)
    }

    /// Classify what the two writes did to the table.
    pub fn observed_outcome(&self) -> ReconciliationOutcome {
        match &self.second_write {
            Err(err) if err.is_write_rejected() => return ReconciliationOutcome::WriteFailure,
            Err(err) => panic!("{}: unexpected second write error: {err}", self.scenario),
            Ok(_) => {}
        }
        let actual = read_logical_records(&self.table.table(), LIST_FIELD).unwrap();
        let expected = self.expected_records();
        if compare_records(expected.clone(), actual.clone(), KEY_FIELD).is_ok() {
            return ReconciliationOutcome::Compatible;
        }
        let updates_intact = self
            .update
            .iter()
            .all(|update| find_record(&actual, update.get(KEY_FIELD)) == Some(update));
        let lost_lists = self.lost_list_keys(&actual);
        assert!(
            updates_intact && !lost_lists.is_empty(),
            "{}: records differ in an unexpected way\nexpected: {}\nactual: {}",
            self.scenario,
            expected.iter().join("\n"),
            actual.iter().join("\n"),
        );
        ReconciliationOutcome::SilentDataLoss
    }

    /// Keys of initial records the update did not touch whose non-null list now reads as null.
    pub fn lost_list_keys(&self, actual: &[Record]) -> Vec<i64> {
        self.initial
            .iter()
            .filter(|record| record.get(KEY_FIELD) != Some(&Value::Long(UPDATED_KEY)))
            .filter(|record| record.get(LIST_FIELD).is_some_and(|list| !list.is_null()))
            .filter_map(|record| {
                let key = record.get(KEY_FIELD)?;
                let read = find_record(actual, Some(key))?;
                read.get(LIST_FIELD)?.is_null().then(|| key.as_long()).flatten()
            })
            .collect()
    }
}

fn find_record<'a>(records: &'a [Record], key: Option<&Value>) -> Option<&'a Record> {
    records.iter().find(|r| r.get(KEY_FIELD) == key)
}

/// Merge `update` into `base` by key; on a shared key the record with the higher ordering value
/// wins, and `update` wins ties.
pub fn merge_by_key(base: &[Record], update: &[Record]) -> Vec<Record> {
    let mut merged = base.to_vec();
    for record in update {
        match merged
            .iter_mut()
            .find(|r| r.get(KEY_FIELD) == record.get(KEY_FIELD))
        {
            Some(existing) if existing.get(ORDERING_FIELD) > record.get(ORDERING_FIELD) => {}
            Some(existing) => *existing = record.clone(),
            None => merged.push(record.clone()),
        }
    }
    merged
}

// Writer that captures log output into a shared buffer for test assertions
pub struct LogWriter(pub Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

// Test helper that sets up tracing to capture log output
// The guard keeps the tracing subscriber active for the lifetime of the struct
pub struct LoggingTest {
    logs: Arc<Mutex<Vec<u8>>>,
    _guard: DefaultGuard,
}

impl Default for LoggingTest {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingTest {
    pub fn new() -> Self {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let logs_clone = logs.clone();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(move || LogWriter(logs_clone.clone()))
                    .with_ansi(false),
            ),
        );
        Self { logs, _guard }
    }

    pub fn logs(&self) -> String {
        String::from_utf8(self.logs.lock().unwrap().clone()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use list_layout_kernel::schema::PARTITION_FIELD;

    fn row(key: i64, ts: i64, value: i32) -> Record {
        Record::new()
            .with(KEY_FIELD, key)
            .with(PARTITION_FIELD, "p1")
            .with(LIST_FIELD, Value::int_list([value]))
            .with(ORDERING_FIELD, ts)
    }

    #[test]
    fn merge_by_key_prefers_higher_ordering() {
        let base = vec![row(1, 1, 10), row(2, 5, 20)];
        let update = vec![row(1, 2, 11), row(2, 4, 21), row(3, 1, 30)];
        assert_eq!(
            merge_by_key(&base, &update),
            vec![row(1, 2, 11), row(2, 5, 20), row(3, 1, 30)]
        );
    }
}
