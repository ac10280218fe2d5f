//! Row-oriented view of table data, keyed by field name.
//!
//! The parquet reader is free to return columns in a different order than the schema that
//! produced the data, and rows in a different order than they were written. A [`Record`] is
//! therefore a map from field name to [`Value`], and [`compare_records`] matches rows by key and
//! fields by name, never by position.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use itertools::{EitherOrBoth, Itertools};

use crate::arrow::array::{
    Array, ArrayBuilder, ArrayRef, AsArray, Int32Builder, Int64Builder, ListBuilder, RecordBatch,
    StringBuilder,
};
use crate::arrow::datatypes::{DataType, Field, Int32Type, Int64Type, SchemaRef};
use crate::{Error, LayoutResult};

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// A list of non-null 32 bit integers.
    pub fn int_list(values: impl IntoIterator<Item = i32>) -> Self {
        Self::List(values.into_iter().map(Self::Int).collect())
    }

    /// A list of 32 bit integers, any of which may be null.
    pub fn nullable_int_list(values: impl IntoIterator<Item = Option<i32>>) -> Self {
        Self::List(values.into_iter().map(Self::from).collect())
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => write!(f, "[{}]", items.iter().join(", ")),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One row, as named fields. Field order is irrelevant to equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// The value of field `name`, if the record has such a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The value of field `name`, or [`Error::MissingColumn`].
    pub fn try_get(&self, name: &str) -> LayoutResult<&Value> {
        self.get(name).ok_or_else(|| Error::missing_column(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.fields
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .join(", ")
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn cell(column: &dyn Array, row: usize) -> LayoutResult<Value> {
    if column.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match column.data_type() {
        DataType::Int32 => Value::Int(column.as_primitive::<Int32Type>().value(row)),
        DataType::Int64 => Value::Long(column.as_primitive::<Int64Type>().value(row)),
        DataType::Utf8 => Value::String(column.as_string::<i32>().value(row).to_string()),
        DataType::List(_) => {
            let elements = column.as_list::<i32>().value(row);
            Value::List(
                (0..elements.len())
                    .map(|i| cell(elements.as_ref(), i))
                    .try_collect()?,
            )
        }
        DataType::Null => Value::Null,
        other => {
            return Err(Error::unsupported_type(format!(
                "cannot convert {other} to a record value"
            )))
        }
    };
    Ok(value)
}

/// Convert every row of `batch` into a [`Record`], keyed by the batch's field names.
pub fn records_from_batch(batch: &RecordBatch) -> LayoutResult<Vec<Record>> {
    let schema = batch.schema();
    (0..batch.num_rows())
        .map(|row| {
            schema
                .fields()
                .iter()
                .zip(batch.columns())
                .map(|(field, column)| {
                    cell(column.as_ref(), row).map(|value| (field.name().clone(), value))
                })
                .collect::<LayoutResult<Record>>()
        })
        .collect()
}

fn mismatched(field: &Field, value: &Value) -> Error {
    Error::generic(format!(
        "Value {value} does not match type {} of column '{}'",
        field.data_type(),
        field.name()
    ))
}

fn append_int32(builder: &mut Int32Builder, field: &Field, value: &Value) -> LayoutResult<()> {
    match value {
        Value::Null => builder.append_null(),
        Value::Int(v) => builder.append_value(*v),
        other => return Err(mismatched(field, other)),
    }
    Ok(())
}

fn append_int64(builder: &mut Int64Builder, field: &Field, value: &Value) -> LayoutResult<()> {
    match value {
        Value::Null => builder.append_null(),
        other => builder.append_value(other.as_long().ok_or_else(|| mismatched(field, other))?),
    }
    Ok(())
}

fn append_string(builder: &mut StringBuilder, field: &Field, value: &Value) -> LayoutResult<()> {
    match value {
        Value::Null => builder.append_null(),
        Value::String(s) => builder.append_value(s),
        other => return Err(mismatched(field, other)),
    }
    Ok(())
}

fn list_column<B, F>(
    field: &Field,
    element: &Arc<Field>,
    values: &[&Value],
    element_builder: B,
    mut append: F,
) -> LayoutResult<ArrayRef>
where
    B: ArrayBuilder,
    F: FnMut(&mut B, &Field, &Value) -> LayoutResult<()>,
{
    let mut builder = ListBuilder::new(element_builder).with_field(element.clone());
    for value in values {
        match value {
            Value::Null => builder.append_null(),
            Value::List(items) => {
                for item in items {
                    if item.is_null() && !element.is_nullable() {
                        return Err(Error::generic(format!(
                            "List column '{}' does not allow null elements",
                            field.name()
                        )));
                    }
                    append(builder.values(), element.as_ref(), item)?;
                }
                builder.append(true);
            }
            other => return Err(mismatched(field, other)),
        }
    }
    Ok(Arc::new(builder.finish()))
}

fn column_from_values(field: &Field, values: &[&Value]) -> LayoutResult<ArrayRef> {
    let array: ArrayRef = match field.data_type() {
        DataType::Int32 => {
            let mut builder = Int32Builder::with_capacity(values.len());
            for value in values {
                append_int32(&mut builder, field, value)?;
            }
            Arc::new(builder.finish())
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for value in values {
                append_int64(&mut builder, field, value)?;
            }
            Arc::new(builder.finish())
        }
        DataType::Utf8 => {
            let mut builder = StringBuilder::new();
            for value in values {
                append_string(&mut builder, field, value)?;
            }
            Arc::new(builder.finish())
        }
        DataType::List(element) => match element.data_type() {
            DataType::Int32 => {
                list_column(field, element, values, Int32Builder::new(), append_int32)?
            }
            DataType::Int64 => {
                list_column(field, element, values, Int64Builder::new(), append_int64)?
            }
            DataType::Utf8 => {
                list_column(field, element, values, StringBuilder::new(), append_string)?
            }
            other => {
                return Err(Error::unsupported_type(format!(
                    "list column '{}' has element type {other}",
                    field.name()
                )))
            }
        },
        other => {
            return Err(Error::unsupported_type(format!(
                "column '{}' has type {other}",
                field.name()
            )))
        }
    };
    Ok(array)
}

/// Build a [`RecordBatch`] with `schema` out of `records`. Fields are looked up by name; a field
/// the record lacks is treated as null. Nullability is enforced by arrow.
pub fn batch_from_records(schema: SchemaRef, records: &[Record]) -> LayoutResult<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let values: Vec<&Value> = records
                .iter()
                .map(|r| r.get(field.name()).unwrap_or(&Value::Null))
                .collect();
            column_from_values(field, &values)
        })
        .try_collect()?;
    Ok(RecordBatch::try_new(schema, columns)?)
}

fn sorted_by_key(mut records: Vec<Record>, key_field: &str) -> LayoutResult<Vec<Record>> {
    for record in &records {
        record.try_get(key_field)?;
    }
    records.sort_by(|a, b| a.get(key_field).cmp(&b.get(key_field)));
    Ok(records)
}

fn itemized_diff(expected: &[Record], actual: &[Record], key_field: &str) -> String {
    expected
        .iter()
        .merge_join_by(actual, |e, a| e.get(key_field).cmp(&a.get(key_field)))
        .filter_map(|pair| match pair {
            EitherOrBoth::Both(e, a) if e == a => None,
            EitherOrBoth::Both(e, a) => Some(format!("  expected: {e}\n  actual:   {a}")),
            EitherOrBoth::Left(e) => Some(format!("  expected: {e}\n  actual:   <missing>")),
            EitherOrBoth::Right(a) => Some(format!("  expected: <missing>\n  actual:   {a}")),
        })
        .join("\n")
}

/// Compare two record sets, ignoring row order and field order. Both sides are sorted by
/// `key_field` first. On mismatch the error carries an itemized expected/actual diff.
pub fn compare_records(
    expected: Vec<Record>,
    actual: Vec<Record>,
    key_field: &str,
) -> LayoutResult<()> {
    let expected = sorted_by_key(expected, key_field)?;
    let actual = sorted_by_key(actual, key_field)?;
    if expected.len() != actual.len() {
        return Err(Error::RecordCountMismatch {
            expected: expected.len(),
            actual: actual.len(),
            diff: itemized_diff(&expected, &actual, key_field),
        });
    }
    if expected != actual {
        return Err(Error::RecordValueMismatch(itemized_diff(
            &expected, &actual, key_field,
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::datatypes::Schema as ArrowSchema;
    use crate::schema::{table_schema, Nullability, KEY_FIELD, LIST_FIELD};

    fn row(key: i64, list: Value) -> Record {
        Record::new()
            .with(KEY_FIELD, key)
            .with("partition", "p1")
            .with(LIST_FIELD, list)
            .with("ts", 1i64)
    }

    #[test]
    fn batch_round_trip_keeps_nulls() {
        let schema = table_schema(Nullability::Nullable, Nullability::Nullable);
        let records = vec![
            row(1, Value::int_list([100])),
            row(2, Value::Null),
            row(3, Value::nullable_int_list([Some(7), None])),
            row(4, Value::List(vec![])),
        ];
        let batch = batch_from_records(schema, &records).unwrap();
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(records_from_batch(&batch).unwrap(), records);
    }

    #[test]
    fn non_nullable_column_rejects_null() {
        let schema = table_schema(Nullability::NotNullable, Nullability::NotNullable);
        let result = batch_from_records(schema, &[row(1, Value::Null)]);
        assert!(matches!(result, Err(Error::Arrow(_))));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let schema = Arc::new(ArrowSchema::new(vec![Field::new(
            KEY_FIELD,
            DataType::Int64,
            false,
        )]));
        crate::utils::test_utils::assert_result_error_with_message(
            batch_from_records(schema, &[Record::new().with(KEY_FIELD, "one")]),
            "does not match type Int64",
        );
    }

    #[test]
    fn compare_ignores_row_and_field_order() {
        let expected = vec![row(1, Value::int_list([1, 2])), row(2, Value::Null)];
        let actual = vec![
            Record::new()
                .with("ts", 1i64)
                .with(LIST_FIELD, Value::Null)
                .with("partition", "p1")
                .with(KEY_FIELD, 2i64),
            row(1, Value::int_list([1, 2])),
        ];
        compare_records(expected, actual, KEY_FIELD).unwrap();
    }

    #[test]
    fn compare_reports_count_mismatch() {
        let err = compare_records(
            vec![row(1, Value::int_list([100])), row(2, Value::int_list([100]))],
            vec![row(1, Value::int_list([100]))],
            KEY_FIELD,
        )
        .unwrap_err();
        match err {
            Error::RecordCountMismatch {
                expected,
                actual,
                diff,
            } => {
                assert_eq!((expected, actual), (2, 1));
                assert!(diff.contains("actual:   <missing>"), "{diff}");
                assert!(diff.contains("key: 2"), "{diff}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn compare_reports_value_mismatch() {
        let err = compare_records(
            vec![row(1, Value::int_list([100])), row(2, Value::int_list([100]))],
            vec![row(1, Value::int_list([100])), row(2, Value::Null)],
            KEY_FIELD,
        )
        .unwrap_err();
        let Error::RecordValueMismatch(diff) = err else {
            panic!("unexpected error {err}");
        };
        assert!(diff.contains("expected: {int_list: [100], key: 2"), "{diff}");
        assert!(diff.contains("actual:   {int_list: null, key: 2"), "{diff}");
        assert!(!diff.contains("key: 1"), "{diff}");
    }

    #[test]
    fn compare_requires_key() {
        let result = compare_records(
            vec![Record::new().with("ts", 1i64)],
            vec![Record::new().with("ts", 1i64)],
            KEY_FIELD,
        );
        assert!(result.is_err());
    }
}
