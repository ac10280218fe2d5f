//! Deterministic row sets for tables with a list column.
//!
//! A fixture holds `baseline_rows` rows with a single-element list, then one row with a two
//! element list, then a row whose list is null (only when the list is nullable) and a row with a
//! null element (only when elements are nullable). Keys increase by one from the start key, so an
//! update batch that starts after [`FixtureBuilder::next_key`] never collides with the initial
//! batch.
use crate::arrow::array::RecordBatch;
use crate::arrow::datatypes::SchemaRef;
use crate::record::{batch_from_records, Record, Value};
use crate::schema::{
    table_schema, Nullability, KEY_FIELD, LIST_FIELD, ORDERING_FIELD, PARTITION_FIELD,
};
use crate::LayoutResult;

/// Partition all fixture rows land in unless configured otherwise.
pub const DEFAULT_PARTITION: &str = "p1";

#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    list_nullability: Nullability,
    element_nullability: Nullability,
    start_key: i64,
    baseline_rows: usize,
    baseline_value: i32,
    ordering_value: i64,
    partition: String,
    extra_rows: bool,
}

impl FixtureBuilder {
    pub fn new(list_nullability: Nullability, element_nullability: Nullability) -> Self {
        Self {
            list_nullability,
            element_nullability,
            start_key: 1,
            baseline_rows: 10,
            baseline_value: 100,
            ordering_value: 1,
            partition: DEFAULT_PARTITION.to_string(),
            extra_rows: true,
        }
    }

    pub fn with_start_key(mut self, start_key: i64) -> Self {
        self.start_key = start_key;
        self
    }

    pub fn with_baseline_rows(mut self, baseline_rows: usize) -> Self {
        self.baseline_rows = baseline_rows;
        self
    }

    pub fn with_baseline_value(mut self, baseline_value: i32) -> Self {
        self.baseline_value = baseline_value;
        self
    }

    /// The ordering value every row gets. On upsert the higher value wins for a shared key.
    pub fn with_ordering_value(mut self, ordering_value: i64) -> Self {
        self.ordering_value = ordering_value;
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Only emit the baseline rows, e.g. for an update batch.
    pub fn baseline_only(mut self) -> Self {
        self.extra_rows = false;
        self
    }

    pub fn schema(&self) -> SchemaRef {
        table_schema(self.list_nullability, self.element_nullability)
    }

    fn lists(&self) -> Vec<Value> {
        let mut lists = vec![Value::int_list([self.baseline_value]); self.baseline_rows];
        if self.extra_rows {
            lists.push(Value::int_list([1, 2]));
            if self.list_nullability.is_nullable() {
                lists.push(Value::Null);
            }
            if self.element_nullability.is_nullable() {
                lists.push(Value::nullable_int_list([Some(self.baseline_value), None]));
            }
        }
        lists
    }

    /// The first key after the rows of this fixture.
    pub fn next_key(&self) -> i64 {
        self.start_key + self.lists().len() as i64
    }

    pub fn records(&self) -> Vec<Record> {
        (self.start_key..)
            .zip(self.lists())
            .map(|(key, list)| {
                Record::new()
                    .with(KEY_FIELD, key)
                    .with(PARTITION_FIELD, self.partition.as_str())
                    .with(LIST_FIELD, list)
                    .with(ORDERING_FIELD, self.ordering_value)
            })
            .collect()
    }

    pub fn build(&self) -> LayoutResult<RecordBatch> {
        batch_from_records(self.schema(), &self.records())
    }
}
