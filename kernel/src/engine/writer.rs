//! Parquet writer that controls the physical list layout.
//!
//! The arrow writer always emits three-level lists, so data files are written through the column
//! writers directly, computing definition and repetition levels for the layout the session asks
//! for. Every top-level field maps to exactly one leaf column: either a primitive or a list of
//! primitives.
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use crate::layout::ListPhysicalLayout;
use crate::parquet::column::writer::ColumnWriter;
use crate::parquet::data_type::ByteArray;
use crate::parquet::file::properties::WriterProperties;
use crate::parquet::file::writer::SerializedFileWriter;
use crate::record::{Record, Value};
use crate::schema::{parquet_schema_for, ListColumnSchema};
use crate::utils::require;
use crate::{Error, LayoutResult};

const CREATED_BY: &str = concat!("list_layout_kernel version ", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
enum LeafValues {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Bytes(Vec<ByteArray>),
}

impl LeafValues {
    fn try_new(column: &str, data_type: &DataType) -> LayoutResult<Self> {
        match data_type {
            DataType::Int32 => Ok(Self::Int32(vec![])),
            DataType::Int64 => Ok(Self::Int64(vec![])),
            DataType::Utf8 => Ok(Self::Bytes(vec![])),
            other => Err(Error::unsupported_type(format!(
                "cannot write column '{column}' of type {other}"
            ))),
        }
    }

    fn push(&mut self, column: &str, value: &Value) -> LayoutResult<()> {
        match (self, value) {
            (Self::Int32(values), Value::Int(v)) => values.push(*v),
            (Self::Int64(values), value @ (Value::Long(_) | Value::Int(_))) => {
                values.extend(value.as_long())
            }
            (Self::Bytes(values), Value::String(s)) => values.push(ByteArray::from(s.as_str())),
            (_, value) => {
                return Err(Error::generic(format!(
                    "Value {value} cannot be written to column '{column}'"
                )))
            }
        }
        Ok(())
    }
}

/// The values and levels of one leaf column.
#[derive(Debug)]
struct LeafColumn {
    values: LeafValues,
    def_levels: Option<Vec<i16>>,
    rep_levels: Option<Vec<i16>>,
}

impl LeafColumn {
    fn primitive(field: &Field, records: &[Record]) -> LayoutResult<Self> {
        let name = field.name();
        let mut values = LeafValues::try_new(name, field.data_type())?;
        let mut def_levels = field.is_nullable().then(Vec::new);
        for record in records {
            let value = record.get(name).unwrap_or(&Value::Null);
            match (value, def_levels.as_mut()) {
                (Value::Null, Some(defs)) => defs.push(0),
                (Value::Null, None) => {
                    return Err(Error::generic(format!(
                        "Column '{name}' is required but a record has no value"
                    )))
                }
                (value, defs) => {
                    values.push(name, value)?;
                    if let Some(defs) = defs {
                        defs.push(1);
                    }
                }
            }
        }
        Ok(Self {
            values,
            def_levels,
            rep_levels: None,
        })
    }

    fn list(
        list: &ListColumnSchema,
        layout: ListPhysicalLayout,
        records: &[Record],
    ) -> LayoutResult<Self> {
        list.check_representable(layout)?;
        let name = list.name();
        let list_nullable = list.list_nullability().is_nullable();
        let element_nullable =
            layout.supports_null_elements() && list.element_nullability().is_nullable();
        // definition level of a present but empty list, and of a present list with a null element
        let empty_def = i16::from(list_nullable);
        let null_element_def = empty_def + 1;
        let element_def = null_element_def + i16::from(element_nullable);

        let mut values = LeafValues::try_new(name, list.element_type())?;
        let mut defs = vec![];
        let mut reps = vec![];
        for record in records {
            match record.get(name).unwrap_or(&Value::Null) {
                Value::Null => {
                    require!(
                        list_nullable,
                        Error::generic(format!(
                            "List column '{name}' is required but a record has no value"
                        ))
                    );
                    defs.push(0);
                    reps.push(0);
                }
                Value::List(items) if items.is_empty() => {
                    defs.push(empty_def);
                    reps.push(0);
                }
                Value::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        reps.push(i16::from(i > 0));
                        if item.is_null() {
                            require!(
                                element_nullable,
                                Error::generic(format!(
                                    "List column '{name}' cannot store a null element in the \
                                     {layout} layout"
                                ))
                            );
                            defs.push(null_element_def);
                        } else {
                            values.push(name, item)?;
                            defs.push(element_def);
                        }
                    }
                }
                other => {
                    return Err(Error::generic(format!(
                        "Value {other} cannot be written to list column '{name}'"
                    )))
                }
            }
        }
        Ok(Self {
            values,
            // a required list of required elements in three levels still has the repeated level
            def_levels: Some(defs),
            rep_levels: Some(reps),
        })
    }

    fn try_new(
        field: &Field,
        layout: ListPhysicalLayout,
        records: &[Record],
    ) -> LayoutResult<Self> {
        match ListColumnSchema::from_arrow_field(field) {
            Some(list) => Self::list(&list, layout, records),
            None => Self::primitive(field, records),
        }
    }

    fn write(&self, writer: &mut ColumnWriter<'_>) -> LayoutResult<()> {
        let defs = self.def_levels.as_deref();
        let reps = self.rep_levels.as_deref();
        match (&self.values, writer) {
            (LeafValues::Int32(values), ColumnWriter::Int32ColumnWriter(w)) => {
                w.write_batch(values, defs, reps)?;
            }
            (LeafValues::Int64(values), ColumnWriter::Int64ColumnWriter(w)) => {
                w.write_batch(values, defs, reps)?;
            }
            (LeafValues::Bytes(values), ColumnWriter::ByteArrayColumnWriter(w)) => {
                w.write_batch(values, defs, reps)?;
            }
            (values, _) => {
                return Err(Error::generic(format!(
                    "Unexpected column writer for {} values",
                    match values {
                        LeafValues::Int32(_) => "int32",
                        LeafValues::Int64(_) => "int64",
                        LeafValues::Bytes(_) => "byte array",
                    }
                )))
            }
        }
        Ok(())
    }
}

/// Write `records` as a single row group to a new parquet file at `path`, with every list column
/// of `schema` in `layout`. Returns the size of the file in bytes.
pub(crate) fn write_records(
    path: &Path,
    schema: &ArrowSchema,
    records: &[Record],
    layout: ListPhysicalLayout,
) -> LayoutResult<u64> {
    let message = parquet_schema_for(schema, layout)?;
    let columns = schema
        .fields()
        .iter()
        .map(|field| LeafColumn::try_new(field, layout, records))
        .collect::<LayoutResult<Vec<_>>>()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let props = WriterProperties::builder()
        .set_created_by(CREATED_BY.to_string())
        .build();
    let mut writer = SerializedFileWriter::new(File::create(path)?, message, Arc::new(props))?;
    let mut row_group = writer.next_row_group()?;
    for column in &columns {
        let Some(mut column_writer) = row_group.next_column()? else {
            return Err(Error::generic(format!(
                "Parquet schema of {} has fewer leaf columns than fields",
                path.display()
            )));
        };
        column.write(column_writer.untyped())?;
        column_writer.close()?;
    }
    row_group.close()?;
    writer.close()?;

    let size = std::fs::metadata(path)?.len();
    debug!(path = %path.display(), %layout, records = records.len(), size, "wrote data file");
    Ok(size)
}
