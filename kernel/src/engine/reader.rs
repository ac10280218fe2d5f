//! Parquet readers for data files written in either list layout.
//!
//! [`read_files_normalized`] is the logical read: the arrow reader decodes both layouts, and every
//! batch is then conformed to one unified schema with canonical `element` list children.
//! [`read_file_with_layout`] is the merge path's strict read, which resolves each list column by
//! the leaf path one particular layout would produce.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, trace};

use crate::arrow::array::{new_null_array, Array, ArrayRef, AsArray, ListArray, RecordBatch};
use crate::arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use crate::layout::ListPhysicalLayout;
use crate::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use crate::parquet::arrow::ProjectionMask;
use crate::record::{records_from_batch, Record, Value};
use crate::schema::{unify_schemas, ListColumnSchema};
use crate::{Error, LayoutResult};

/// The schema and batches of one data file, exactly as the arrow reader decodes them.
#[derive(Debug, Clone)]
pub(crate) struct FileContents {
    pub(crate) schema: SchemaRef,
    pub(crate) batches: Vec<RecordBatch>,
}

pub(crate) fn read_file(path: &Path) -> LayoutResult<FileContents> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let schema = builder.schema().clone();
    let batches: Vec<RecordBatch> = builder.build()?.try_collect()?;
    trace!(path = %path.display(), batches = batches.len(), "read data file");
    Ok(FileContents { schema, batches })
}

fn normalize_column(column: &ArrayRef, target: &Field) -> LayoutResult<ArrayRef> {
    match (column.as_list_opt::<i32>(), target.data_type()) {
        (Some(list), DataType::List(element)) => {
            let (_, offsets, values, nulls) = list.clone().into_parts();
            Ok(Arc::new(ListArray::try_new(
                element.clone(),
                offsets,
                values,
                nulls,
            )?))
        }
        (_, data_type) if column.data_type() == data_type => Ok(column.clone()),
        (_, data_type) => Err(Error::generic(format!(
            "Column '{}' of type {} cannot be read as {data_type}",
            target.name(),
            column.data_type(),
        ))),
    }
}

/// Conform `batch` to `schema`: columns are matched by name, list children are renamed to the
/// schema's element field and a column the batch lacks comes back as nulls.
pub(crate) fn normalize_batch(
    batch: &RecordBatch,
    schema: &SchemaRef,
) -> LayoutResult<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(column) => normalize_column(column, field),
            None if field.is_nullable() => {
                Ok(new_null_array(field.data_type(), batch.num_rows()))
            }
            None => Err(Error::missing_column(field.name())),
        })
        .collect::<LayoutResult<Vec<_>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Read every file in `paths` and conform all batches to the unified schema of the files.
/// Returns `None` when `paths` is empty.
pub(crate) fn read_files_normalized(
    paths: &[PathBuf],
) -> LayoutResult<Option<(SchemaRef, Vec<RecordBatch>)>> {
    let contents = paths
        .iter()
        .map(|path| read_file(path))
        .collect::<LayoutResult<Vec<_>>>()?;
    let Some(schema) = unify_schemas(contents.iter().map(|c| c.schema.as_ref()))? else {
        return Ok(None);
    };
    let batches = contents
        .iter()
        .flat_map(|c| c.batches.iter())
        .map(|batch| normalize_batch(batch, &schema))
        .collect::<LayoutResult<Vec<_>>>()?;
    debug!(files = paths.len(), batches = batches.len(), "normalized read");
    Ok(Some((schema, batches)))
}

/// The leaf path a column of `schema` has on disk when written with `layout`.
fn expected_leaf_path(field: &Field, layout: ListPhysicalLayout) -> String {
    match ListColumnSchema::from_arrow_field(field) {
        Some(list) => layout.leaf_path(list.name()),
        None => field.name().clone(),
    }
}

/// Read the file at `path` as if it had been written with `layout`.
///
/// Each column of `schema` is looked up by the leaf path `layout` produces. A column whose path is
/// not in the file is not an error: it reads as null in every record.
pub(crate) fn read_file_with_layout(
    path: &Path,
    schema: &ArrowSchema,
    layout: ListPhysicalLayout,
) -> LayoutResult<Vec<Record>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let (found, missing): (Vec<_>, Vec<_>) = schema.fields().iter().partition_map(|field| {
        let leaf_path = expected_leaf_path(field, layout);
        let leaf = builder
            .parquet_schema()
            .columns()
            .iter()
            .position(|column| column.path().string() == leaf_path);
        match leaf {
            Some(index) => itertools::Either::Left(index),
            None => itertools::Either::Right((field.name().clone(), leaf_path)),
        }
    });
    for (column, leaf_path) in &missing {
        debug!(
            path = %path.display(),
            column,
            leaf_path,
            %layout,
            "column not found at expected leaf path, reading as null"
        );
    }

    let mask = ProjectionMask::leaves(builder.parquet_schema(), found);
    let batches: Vec<RecordBatch> = builder.with_projection(mask).build()?.try_collect()?;
    let mut records: Vec<Record> = batches
        .iter()
        .map(records_from_batch)
        .flatten_ok()
        .try_collect()?;
    for record in &mut records {
        for (column, _) in &missing {
            record.set(column.as_str(), Value::Null);
        }
    }
    Ok(records)
}
