//! The write path of a [`Table`].
//!
//! A write deduplicates the incoming batch by record key, routes each record to the file group
//! that already holds its key (or to a new file group), rewrites every touched file group as a new
//! file slice and finally publishes one commit. If any step fails, the data files written so far
//! are deleted and the table is left as it was.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::slice;

use itertools::Itertools;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::timeline::{write_commit, CommitInfo, Instant, WriteOperation, WriteStat};
use super::{
    data_file_name, with_meta_fields, DataFile, Table, COMMIT_SEQNO_FIELD, COMMIT_TIME_FIELD,
    FILE_NAME_FIELD, META_COLUMNS, PARTITION_PATH_FIELD, RECORD_KEY_FIELD,
};
use crate::arrow::array::RecordBatch;
use crate::arrow::datatypes::{DataType, Schema as ArrowSchema, SchemaRef};
use crate::config::{SessionConfig, WriteMode, WriteOptions};
use crate::engine::reader::{read_file_with_layout, read_files_normalized};
use crate::engine::writer::write_records;
use crate::reconciliation::MergeReadMode;
use crate::record::{records_from_batch, Record, Value};
use crate::schema::ListColumnSchema;
use crate::utils::{current_time_ms, require};
use crate::{Error, LayoutResult};

/// Records of one partition, keyed by record key.
type PartitionRecords = BTreeMap<Value, Record>;

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Table {
    /// Write `batch` into this table and commit it. See [`crate::session::Session::write_batch`].
    #[instrument(
        name = "table.write",
        skip_all,
        fields(table = %options.table_name, mode = ?mode, layout = %config.list_layout),
        err
    )]
    pub(crate) fn write(
        &self,
        batch: &RecordBatch,
        mode: WriteMode,
        options: &WriteOptions,
        config: &SessionConfig,
    ) -> LayoutResult<CommitInfo> {
        let instant = self.latest_instant()?.map_or(1, |latest| latest + 1);
        let mut txn =
            WriteTransaction::try_new(self, batch.schema_ref(), mode, options, config, instant)?;
        let result = txn.write_batch(batch).and_then(|stats| txn.commit(stats));
        if let Err(err) = &result {
            warn!(instant, error = %err, "write failed, rolling back");
            txn.rollback();
        }
        result
    }
}

struct WriteTransaction<'a> {
    table: &'a Table,
    config: &'a SessionConfig,
    options: &'a WriteOptions,
    mode: WriteMode,
    instant: Instant,
    /// The physical schema of every data file this write produces, meta columns first.
    schema: SchemaRef,
    written: Vec<PathBuf>,
}

impl<'a> WriteTransaction<'a> {
    fn try_new(
        table: &'a Table,
        schema: &ArrowSchema,
        mode: WriteMode,
        options: &'a WriteOptions,
        config: &'a SessionConfig,
        instant: Instant,
    ) -> LayoutResult<Self> {
        for name in [
            &options.record_key_field,
            &options.ordering_field,
            &options.partition_field,
        ] {
            let field = schema.field_with_name(name).map_err(|_| Error::missing_column(name))?;
            require!(
                ListColumnSchema::from_arrow_field(field).is_none(),
                Error::unsupported_type(format!("column '{name}' cannot be a list"))
            );
        }
        let partition = schema
            .field_with_name(&options.partition_field)
            .map_err(|_| Error::missing_column(&options.partition_field))?;
        require!(
            partition.data_type() == &DataType::Utf8,
            Error::unsupported_type(format!(
                "partition column '{}' must be a string, found {}",
                partition.name(),
                partition.data_type()
            ))
        );
        for list in schema
            .fields()
            .iter()
            .filter_map(|field| ListColumnSchema::from_arrow_field(field))
        {
            list.check_representable(config.list_layout)?;
        }

        Ok(Self {
            table,
            config,
            options,
            mode,
            instant,
            schema: with_meta_fields(schema),
            written: vec![],
        })
    }

    fn record_key(&self, record: &Record) -> LayoutResult<Value> {
        let key = record.try_get(&self.options.record_key_field)?;
        require!(
            !key.is_null(),
            Error::write_rejected(format!(
                "record key '{}' is null in {record}",
                self.options.record_key_field
            ))
        );
        Ok(key.clone())
    }

    fn ordering_value(&self, record: &Record) -> LayoutResult<Value> {
        Ok(record.try_get(&self.options.ordering_field)?.clone())
    }

    fn partition_path(&self, record: &Record) -> LayoutResult<String> {
        let value = record.try_get(&self.options.partition_field)?;
        let partition = value.as_str().ok_or_else(|| {
            Error::write_rejected(format!("partition value {value} is not a string"))
        })?;
        require!(
            partition
                .split('/')
                .all(|part| !part.is_empty() && !part.starts_with('.')),
            Error::write_rejected(format!("invalid partition path '{partition}'"))
        );
        Ok(partition.to_string())
    }

    /// Group the incoming records by partition and keep one record per key. Of two records with
    /// the same key the one with the higher ordering value wins; on a tie the later one does.
    fn deduplicate(
        &self,
        records: Vec<Record>,
    ) -> LayoutResult<BTreeMap<String, PartitionRecords>> {
        let total = records.len();
        let mut partitions: BTreeMap<String, PartitionRecords> = BTreeMap::new();
        for mut record in records {
            for meta in META_COLUMNS {
                record.remove(meta);
            }
            let key = self.record_key(&record)?;
            let kept = partitions.entry(self.partition_path(&record)?).or_default();
            let keep_existing = match kept.get(&key) {
                Some(existing) => self.ordering_value(existing)? > self.ordering_value(&record)?,
                None => false,
            };
            if !keep_existing {
                kept.insert(key, record);
            }
        }
        let unique: usize = partitions.values().map(BTreeMap::len).sum();
        debug!(total, unique, partitions = partitions.len(), "deduplicated batch");
        Ok(partitions)
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> LayoutResult<Vec<WriteStat>> {
        let incoming = self.deduplicate(records_from_batch(batch)?)?;
        let existing = match self.mode {
            WriteMode::Overwrite => BTreeMap::new(),
            WriteMode::Append => self.table.list_data_files(&[])?,
        };
        let mut stats = vec![];
        for (partition, records) in incoming {
            let files = existing.get(&partition).map(Vec::as_slice).unwrap_or_default();
            stats.extend(self.write_partition(&partition, records, files)?);
        }
        Ok(stats)
    }

    /// Read the records of a file group's latest slice, the way the session's merge mode reads.
    fn read_base(&self, file: &DataFile) -> LayoutResult<Vec<Record>> {
        match self.config.merge_read_mode {
            MergeReadMode::WriterLayout => {
                read_file_with_layout(&file.path, &self.schema, self.config.list_layout)
            }
            MergeReadMode::Normalized => {
                let Some((_, batches)) = read_files_normalized(slice::from_ref(&file.path))?
                else {
                    return Ok(vec![]);
                };
                batches
                    .iter()
                    .map(records_from_batch)
                    .flatten_ok()
                    .try_collect()
            }
        }
    }

    fn write_partition(
        &mut self,
        partition: &str,
        mut incoming: PartitionRecords,
        files: &[DataFile],
    ) -> LayoutResult<Vec<WriteStat>> {
        let mut stats = vec![];
        for file in files {
            if incoming.is_empty() {
                break;
            }
            let base = self.read_base(file)?;
            let key_field = self.options.record_key_field.as_str();
            if !base
                .iter()
                .any(|r| r.get(key_field).is_some_and(|key| incoming.contains_key(key)))
            {
                continue;
            }

            let file_name = data_file_name(&file.file_id, self.instant);
            let mut num_updates = 0;
            let mut merged = Vec::with_capacity(base.len());
            for mut stored in base {
                let key = self.record_key(&stored)?;
                match incoming.remove(&key) {
                    Some(update)
                        if self.ordering_value(&update)? >= self.ordering_value(&stored)? =>
                    {
                        num_updates += 1;
                        merged.push(self.stamp(update, partition, &file_name, merged.len())?);
                    }
                    update => {
                        if update.is_some() {
                            debug!(key = %key, "stored record has the higher ordering value");
                        }
                        stored.set(FILE_NAME_FIELD, file_name.as_str());
                        merged.push(stored);
                    }
                }
            }
            debug!(file_id = %file.file_id, num_updates, "rewriting file group");
            stats.push(self.write_file(
                partition,
                &file.file_id,
                merged,
                0,
                num_updates,
                Some(file.instant),
            )?);
        }

        let max_records = self.config.max_records_per_file.get();
        for chunk in &incoming.into_values().chunks(max_records) {
            let file_id = Uuid::new_v4().to_string();
            let file_name = data_file_name(&file_id, self.instant);
            let records: Vec<Record> = chunk
                .enumerate()
                .map(|(row, record)| self.stamp(record, partition, &file_name, row))
                .try_collect()?;
            let num_inserts = records.len() as u64;
            stats.push(self.write_file(partition, &file_id, records, num_inserts, 0, None)?);
        }
        Ok(stats)
    }

    /// Fill in the meta columns of a record this write introduces.
    fn stamp(
        &self,
        mut record: Record,
        partition: &str,
        file_name: &str,
        row: usize,
    ) -> LayoutResult<Record> {
        let key = self.record_key(&record)?;
        record.set(COMMIT_TIME_FIELD, self.instant.to_string());
        record.set(
            COMMIT_SEQNO_FIELD,
            format!("{}_{}_{row}", self.instant, self.written.len()),
        );
        record.set(RECORD_KEY_FIELD, key_string(&key));
        record.set(PARTITION_PATH_FIELD, partition);
        record.set(FILE_NAME_FIELD, file_name);
        Ok(record)
    }

    /// Reject records the table schema cannot hold. This runs before a data file is opened.
    fn validate(&self, records: &[Record]) -> LayoutResult<()> {
        for field in self.schema.fields() {
            let list = ListColumnSchema::from_arrow_field(field);
            for record in records {
                let value = record.get(field.name()).unwrap_or(&Value::Null);
                let key = || {
                    record
                        .get(&self.options.record_key_field)
                        .map_or_else(|| "<no key>".to_string(), ToString::to_string)
                };
                require!(
                    field.is_nullable() || !value.is_null(),
                    Error::write_rejected(format!(
                        "column '{}' is not nullable, but the record with key {} has no value",
                        field.name(),
                        key()
                    ))
                );
                if let (Some(list), Value::List(items)) = (&list, value) {
                    require!(
                        list.element_nullability().is_nullable()
                            || !items.iter().any(Value::is_null),
                        Error::write_rejected(format!(
                            "list column '{}' has non-nullable elements, but the record with key \
                             {} holds a null element",
                            field.name(),
                            key()
                        ))
                    );
                }
            }
        }
        Ok(())
    }

    fn write_file(
        &mut self,
        partition: &str,
        file_id: &str,
        mut records: Vec<Record>,
        num_inserts: u64,
        num_updates: u64,
        prev_instant: Option<Instant>,
    ) -> LayoutResult<WriteStat> {
        let key_field = self.options.record_key_field.as_str();
        records.sort_by(|a, b| a.get(key_field).cmp(&b.get(key_field)));
        self.validate(&records)?;

        let relative = format!("{partition}/{}", data_file_name(file_id, self.instant));
        let path = self.table.root().join(&relative);
        self.written.push(path.clone());
        let file_size = write_records(&path, &self.schema, &records, self.config.list_layout)?;
        Ok(WriteStat {
            partition: partition.to_string(),
            file_id: file_id.to_string(),
            path: relative,
            num_records: records.len() as u64,
            num_inserts,
            num_updates,
            file_size,
            prev_instant,
        })
    }

    fn commit(&self, write_stats: Vec<WriteStat>) -> LayoutResult<CommitInfo> {
        let commit = CommitInfo {
            instant: self.instant,
            timestamp: current_time_ms()?,
            operation: match self.mode {
                WriteMode::Overwrite => WriteOperation::Overwrite,
                WriteMode::Append => WriteOperation::Upsert,
            },
            table_name: self.options.table_name.clone(),
            record_key_field: self.options.record_key_field.clone(),
            ordering_field: self.options.ordering_field.clone(),
            partition_field: self.options.partition_field.clone(),
            write_stats,
        };
        let path = write_commit(self.table.root(), &commit)?;
        info!(
            instant = self.instant,
            path = %path.display(),
            num_files = commit.write_stats.len(),
            num_records = commit.num_records(),
            "committed write"
        );
        Ok(commit)
    }

    /// Delete every data file this write produced.
    fn rollback(&mut self) {
        for path in self.written.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed data file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not remove data file")
                }
            }
        }
    }
}
