//! Detection of the physical layout of a list column.
//!
//! Parquet has two encodings for a repeated column annotated as a `LIST`:
//!
//! ```text
//! // two-level (legacy)
//! <list-repetition> group <name> (LIST) {
//!   repeated <element-type> array;
//! }
//!
//! // three-level
//! <list-repetition> group <name> (LIST) {
//!   repeated group list {
//!     <element-repetition> <element-type> element;
//!   }
//! }
//! ```
//!
//! Which one a file uses is never stored as a flag. It has to be inferred from the shape of the
//! schema tree, and it must be inferred per file: files of one table can legitimately differ when
//! the writer configuration changes between commits.
use std::fs::File;
use std::path::Path;

use strum::{Display, EnumIter, EnumString};
use tracing::debug;

use crate::parquet::basic::{ConvertedType, LogicalType, Repetition};
use crate::parquet::file::reader::{FileReader, SerializedFileReader};
use crate::parquet::schema::types::{Type, TypePtr};
use crate::utils::require;
use crate::{Error, LayoutResult};

/// Name of the repeated element field emitted by legacy two-level writers.
pub const TWO_LEVEL_ELEMENT_NAME: &str = "array";
/// Name of the repeated group of a three-level list.
pub const THREE_LEVEL_GROUP_NAME: &str = "list";
/// Name of the element field nested inside the repeated group of a three-level list.
pub const THREE_LEVEL_ELEMENT_NAME: &str = "element";

/// The physical nesting depth of a repeated column on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ListPhysicalLayout {
    /// The repeated field is the element. Elements can never be null.
    TwoLevel,
    /// A repeated group wraps the element, which may be optional.
    ThreeLevel,
}

impl ListPhysicalLayout {
    /// Whether this layout can store null elements inside a present list.
    pub fn supports_null_elements(&self) -> bool {
        matches!(self, Self::ThreeLevel)
    }

    /// The dotted path of the leaf column that holds the elements of list `column`, as written by
    /// this crate's writer.
    pub fn leaf_path(&self, column: &str) -> String {
        match self {
            Self::TwoLevel => format!("{column}.{TWO_LEVEL_ELEMENT_NAME}"),
            Self::ThreeLevel => {
                format!("{column}.{THREE_LEVEL_GROUP_NAME}.{THREE_LEVEL_ELEMENT_NAME}")
            }
        }
    }
}

fn is_list_annotated(field: &Type) -> bool {
    let info = field.get_basic_info();
    #[allow(deprecated)]
    let logical = info.logical_type();
    info.converted_type() == ConvertedType::LIST || matches!(logical, Some(LogicalType::List))
}

/// Classify the list group `list_group`, which must be the group carrying the `LIST` annotation.
///
/// The repeated child is the element itself (two-level) when it is a primitive, a group with more
/// than one field, or is named `array` or `<column>_tuple`. Any other repeated child is the
/// intermediate group of a three-level list.
pub fn classify_list_group(list_group: &Type) -> LayoutResult<ListPhysicalLayout> {
    let column = list_group.name();
    require!(
        list_group.is_group(),
        Error::invalid_list_schema(column, "a primitive field cannot be a list")
    );
    require!(
        is_list_annotated(list_group),
        Error::invalid_list_schema(column, "group is missing the LIST annotation")
    );
    let children = list_group.get_fields();
    let [child] = children else {
        return Err(Error::invalid_list_schema(
            column,
            format!("expected exactly one child field, found {}", children.len()),
        ));
    };
    let child_info = child.get_basic_info();
    require!(
        child_info.has_repetition() && child_info.repetition() == Repetition::REPEATED,
        Error::invalid_list_schema(column, format!("child '{}' is not repeated", child.name()))
    );

    let child_is_element = child.is_primitive()
        || child.get_fields().len() > 1
        || child.name() == TWO_LEVEL_ELEMENT_NAME
        || child.name() == format!("{column}_tuple");
    let layout = if child_is_element {
        ListPhysicalLayout::TwoLevel
    } else {
        ListPhysicalLayout::ThreeLevel
    };
    debug!(column, child = child.name(), %layout, "classified list group");
    Ok(layout)
}

/// Return the physical layout of the top-level list column `column` in the parquet message
/// `schema`.
///
/// An absent column is a caller error and yields [`Error::SchemaColumnNotFound`]. No default
/// layout is ever assumed.
pub fn detect_list_layout(schema: &Type, column: &str) -> LayoutResult<ListPhysicalLayout> {
    let field = schema
        .get_fields()
        .iter()
        .find(|field| field.name() == column)
        .ok_or_else(|| Error::column_not_found(column, None))?;
    classify_list_group(field)
}

/// Open the footer of the parquet file at `path` and return its physical schema.
pub fn open_file_schema(path: impl AsRef<Path>) -> LayoutResult<TypePtr> {
    let reader = SerializedFileReader::new(File::open(path.as_ref())?)?;
    Ok(reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .root_schema_ptr())
}

/// Detect the layout of list column `column` in the parquet file at `path`.
///
/// The schema is read from the footer on every call: layouts are never cached across files.
pub fn detect_file_list_layout(
    path: impl AsRef<Path>,
    column: &str,
) -> LayoutResult<ListPhysicalLayout> {
    let path = path.as_ref();
    let schema = open_file_schema(path)?;
    match detect_list_layout(&schema, column) {
        Err(Error::SchemaColumnNotFound { column, .. }) => Err(Error::column_not_found(
            column,
            Some(&path.display().to_string()),
        )),
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::parquet::basic::Type as PhysicalType;
    use crate::parquet::schema::parser::parse_message_type;

    fn detect(message: &str, column: &str) -> LayoutResult<ListPhysicalLayout> {
        let schema = parse_message_type(message).unwrap();
        detect_list_layout(&schema, column)
    }

    #[rstest]
    #[case::legacy_array(
        "message m { optional group int_list (LIST) { repeated int32 array; } }",
        ListPhysicalLayout::TwoLevel
    )]
    #[case::required_legacy_array(
        "message m { required group int_list (LIST) { repeated int32 array; } }",
        ListPhysicalLayout::TwoLevel
    )]
    #[case::primitive_with_other_name(
        "message m { optional group int_list (LIST) { repeated int32 item; } }",
        ListPhysicalLayout::TwoLevel
    )]
    #[case::tuple_group(
        "message m { optional group int_list (LIST) { repeated group int_list_tuple { required int32 v; } } }",
        ListPhysicalLayout::TwoLevel
    )]
    #[case::multi_field_group(
        "message m { optional group int_list (LIST) { repeated group pair { required int32 a; optional int32 b; } } }",
        ListPhysicalLayout::TwoLevel
    )]
    #[case::standard(
        "message m { optional group int_list (LIST) { repeated group list { optional int32 element; } } }",
        ListPhysicalLayout::ThreeLevel
    )]
    #[case::standard_required_elements(
        "message m { required group int_list (LIST) { repeated group list { required int32 element; } } }",
        ListPhysicalLayout::ThreeLevel
    )]
    #[case::bag_naming(
        "message m { optional group int_list (LIST) { repeated group bag { optional int32 array_element; } } }",
        ListPhysicalLayout::ThreeLevel
    )]
    fn detects_layout(#[case] message: &str, #[case] expected: ListPhysicalLayout) {
        assert_eq!(detect(message, "int_list").unwrap(), expected);
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = detect(
            "message m { required int64 key; optional group int_list (LIST) { repeated int32 array; } }",
            "other_list",
        )
        .unwrap_err();
        assert!(
            matches!(err, Error::SchemaColumnNotFound { ref column, .. } if column == "other_list"),
            "unexpected error {err}"
        );
    }

    #[rstest]
    #[case::primitive("message m { optional int32 int_list; }")]
    #[case::not_annotated("message m { optional group int_list { repeated int32 array; } }")]
    #[case::two_children(
        "message m { optional group int_list (LIST) { repeated int32 array; repeated int32 other; } }"
    )]
    #[case::not_repeated("message m { optional group int_list (LIST) { optional int32 array; } }")]
    fn rejects_non_list_columns(#[case] message: &str) {
        let err = detect(message, "int_list").unwrap_err();
        assert!(
            matches!(err, Error::InvalidListSchema { .. }),
            "unexpected error {err}"
        );
    }

    #[test]
    fn logical_annotation_without_converted_type() {
        let element = Type::primitive_type_builder("element", PhysicalType::INT32)
            .with_repetition(Repetition::OPTIONAL)
            .build()
            .unwrap();
        let list = Type::group_type_builder("list")
            .with_repetition(Repetition::REPEATED)
            .with_fields(vec![Arc::new(element)])
            .build()
            .unwrap();
        let group = Type::group_type_builder("int_list")
            .with_repetition(Repetition::OPTIONAL)
            .with_logical_type(Some(LogicalType::List))
            .with_fields(vec![Arc::new(list)])
            .build()
            .unwrap();
        assert_eq!(
            classify_list_group(&group).unwrap(),
            ListPhysicalLayout::ThreeLevel
        );
    }

    #[test]
    fn detection_is_deterministic() {
        let message =
            "message m { optional group int_list (LIST) { repeated group list { optional int32 element; } } }";
        let first = detect(message, "int_list").unwrap();
        let second = detect(message, "int_list").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn leaf_paths() {
        assert_eq!(
            ListPhysicalLayout::TwoLevel.leaf_path("int_list"),
            "int_list.array"
        );
        assert_eq!(
            ListPhysicalLayout::ThreeLevel.leaf_path("int_list"),
            "int_list.list.element"
        );
        assert_eq!(ListPhysicalLayout::TwoLevel.to_string(), "two-level");
        assert_eq!(
            "three-level".parse::<ListPhysicalLayout>().unwrap(),
            ListPhysicalLayout::ThreeLevel
        );
    }
}
