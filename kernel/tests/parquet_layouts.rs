//! Layout detection against data files written by a table and by the arrow parquet writer.

use std::fs::File;
use std::sync::Arc;

use list_layout_kernel::arrow::array::{Array, ListArray, RecordBatch};
use list_layout_kernel::arrow::datatypes::{DataType, Field, Int32Type, Schema};
use list_layout_kernel::fixtures::FixtureBuilder;
use list_layout_kernel::parquet::arrow::ArrowWriter;
use list_layout_kernel::schema::{parquet_schema_for, KEY_FIELD, LIST_FIELD};
use list_layout_kernel::ListPhysicalLayout::{ThreeLevel, TwoLevel};
use list_layout_kernel::Nullability::{NotNullable, Nullable};
use list_layout_kernel::{
    detect_file_list_layout, detect_list_layout, list_data_files, open_file_schema, read_table,
    Error, ListPhysicalLayout, MergeReadMode, Nullability, WriteMode,
};
use rstest::rstest;
use test_utils::{assert_result_error_with_message, TestTable};

fn leaf_paths(path: &std::path::Path) -> Vec<String> {
    let schema = open_file_schema(path).unwrap();
    let descr = list_layout_kernel::parquet::schema::types::SchemaDescriptor::new(schema);
    descr
        .columns()
        .iter()
        .map(|c| c.path().string())
        .collect()
}

#[rstest]
#[case(TwoLevel, Nullable, NotNullable, "int_list.array")]
#[case(TwoLevel, NotNullable, NotNullable, "int_list.array")]
#[case(ThreeLevel, Nullable, NotNullable, "int_list.list.element")]
#[case(ThreeLevel, NotNullable, Nullable, "int_list.list.element")]
#[case(ThreeLevel, Nullable, Nullable, "int_list.list.element")]
fn table_files_use_session_layout(
    #[case] layout: ListPhysicalLayout,
    #[case] list: Nullability,
    #[case] element: Nullability,
    #[case] leaf: &str,
) {
    let table = TestTable::new();
    let fixture = FixtureBuilder::new(list, element);
    table
        .write(
            layout,
            MergeReadMode::WriterLayout,
            WriteMode::Overwrite,
            &fixture.build().unwrap(),
        )
        .unwrap();

    let files = list_data_files(table.path(), &["p1"]).unwrap();
    let files = &files["p1"];
    assert_eq!(files.len(), 1);
    let path = &files[0].path;
    assert_eq!(detect_file_list_layout(path, LIST_FIELD).unwrap(), layout);
    assert!(leaf_paths(path).iter().any(|p| p == leaf), "{leaf}");

    let rows: usize = read_table(table.path())
        .unwrap()
        .iter()
        .map(RecordBatch::num_rows)
        .sum();
    assert_eq!(rows, fixture.records().len());
}

#[test_log::test]
fn two_level_cannot_hold_null_elements() {
    let table = TestTable::new();
    let fixture = FixtureBuilder::new(Nullable, Nullable);
    let err = table
        .write(
            TwoLevel,
            MergeReadMode::WriterLayout,
            WriteMode::Overwrite,
            &fixture.build().unwrap(),
        )
        .unwrap_err();
    assert!(
        matches!(err, Error::UnrepresentableLayout { .. }),
        "unexpected error {err}"
    );
    assert!(table.data_file_names().is_empty());
    assert_eq!(table.table().latest_instant().unwrap(), None);
}

#[test_log::test]
fn arrow_writer_output_is_three_level() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arrow.parquet");
    let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
        Some(vec![Some(1), Some(2)]),
        None,
        Some(vec![]),
    ]);
    let schema = Arc::new(Schema::new(vec![Field::new(
        LIST_FIELD,
        list.data_type().clone(),
        true,
    )]));
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(list)]).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    // the arrow writer names its element `item`; detection goes by shape, not by name
    assert_eq!(detect_file_list_layout(&path, LIST_FIELD).unwrap(), ThreeLevel);
}

#[test_log::test]
fn missing_column_names_the_file() {
    let table = TestTable::new();
    let fixture = FixtureBuilder::new(NotNullable, NotNullable);
    table
        .write(
            ThreeLevel,
            MergeReadMode::WriterLayout,
            WriteMode::Overwrite,
            &fixture.build().unwrap(),
        )
        .unwrap();
    let file = table.table().latest_file_slices().unwrap().remove(0);

    let err = detect_file_list_layout(&file.path, "other_list").unwrap_err();
    match err {
        Error::SchemaColumnNotFound { column, file: Some(name) } => {
            assert_eq!(column, "other_list");
            assert!(name.ends_with(&file.file_name()), "{name}");
        }
        other => panic!("unexpected error {other}"),
    }
    // a non-list column is not a list layout of any kind
    assert_result_error_with_message(
        detect_file_list_layout(&file.path, KEY_FIELD),
        "a primitive field cannot be a list",
    );
}

#[rstest]
fn generated_schema_round_trips_through_detection(
    #[values(TwoLevel, ThreeLevel)] layout: ListPhysicalLayout,
    #[values(Nullable, NotNullable)] list: Nullability,
) {
    let arrow_schema = FixtureBuilder::new(list, NotNullable).schema();
    let parquet_schema = parquet_schema_for(&arrow_schema, layout).unwrap();
    assert_eq!(detect_list_layout(&parquet_schema, LIST_FIELD).unwrap(), layout);
    assert!(matches!(
        detect_list_layout(&parquet_schema, "missing"),
        Err(Error::SchemaColumnNotFound { file: None, .. })
    ));
    assert_eq!(
        arrow_schema.field_with_name(LIST_FIELD).unwrap().data_type(),
        &DataType::List(Arc::new(Field::new("element", DataType::Int32, false)))
    );
}
