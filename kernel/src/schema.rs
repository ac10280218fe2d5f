//! Logical schemas for tables with a list column, and their physical parquet counterparts.
//!
//! The logical schema is an arrow schema. It says whether the list and its elements can be null,
//! but nothing about nesting depth on disk. [`parquet_schema_for`] turns it into a parquet
//! message for one [`ListPhysicalLayout`].
use std::sync::Arc;

use strum::{Display, EnumIter, EnumString};

use crate::arrow::datatypes::{DataType, Field, FieldRef, Schema as ArrowSchema, SchemaRef};
use crate::layout::{
    ListPhysicalLayout, THREE_LEVEL_ELEMENT_NAME, THREE_LEVEL_GROUP_NAME, TWO_LEVEL_ELEMENT_NAME,
};
use crate::parquet::basic::{ConvertedType, LogicalType, Repetition, Type as PhysicalType};
use crate::parquet::schema::types::{Type, TypePtr};
use crate::utils::require;
use crate::{Error, LayoutResult};

/// Record key of the fixture tables.
pub const KEY_FIELD: &str = "key";
/// Partition column of the fixture tables.
pub const PARTITION_FIELD: &str = "partition";
/// List column of the fixture tables.
pub const LIST_FIELD: &str = "int_list";
/// Ordering (precombine) column of the fixture tables. Higher values win on upsert.
pub const ORDERING_FIELD: &str = "ts";

/// Whether a value may be absent. Applies separately to a list and to its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Nullability {
    Nullable,
    NotNullable,
}

impl Nullability {
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable)
    }
}

impl From<bool> for Nullability {
    fn from(nullable: bool) -> Self {
        if nullable {
            Self::Nullable
        } else {
            Self::NotNullable
        }
    }
}

fn repetition(nullability: Nullability) -> Repetition {
    match nullability {
        Nullability::Nullable => Repetition::OPTIONAL,
        Nullability::NotNullable => Repetition::REQUIRED,
    }
}

/// A named list column together with its two independent nullability flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListColumnSchema {
    name: String,
    element_type: DataType,
    list_nullability: Nullability,
    element_nullability: Nullability,
}

impl ListColumnSchema {
    pub fn new(
        name: impl Into<String>,
        element_type: DataType,
        list_nullability: Nullability,
        element_nullability: Nullability,
    ) -> Self {
        Self {
            name: name.into(),
            element_type,
            list_nullability,
            element_nullability,
        }
    }

    /// Read the list column description back out of an arrow field. Returns `None` for fields
    /// that are not lists.
    pub fn from_arrow_field(field: &Field) -> Option<Self> {
        match field.data_type() {
            DataType::List(element) => Some(Self::new(
                field.name(),
                element.data_type().clone(),
                field.is_nullable().into(),
                element.is_nullable().into(),
            )),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> &DataType {
        &self.element_type
    }

    pub fn list_nullability(&self) -> Nullability {
        self.list_nullability
    }

    pub fn element_nullability(&self) -> Nullability {
        self.element_nullability
    }

    /// The logical arrow field. Elements are always named `element`, whatever layout the data
    /// came from.
    pub fn to_arrow_field(&self) -> Field {
        Field::new_list(
            &self.name,
            Field::new(
                THREE_LEVEL_ELEMENT_NAME,
                self.element_type.clone(),
                self.element_nullability.is_nullable(),
            ),
            self.list_nullability.is_nullable(),
        )
    }

    /// Two-level lists have no place to store a null element.
    pub fn check_representable(&self, layout: ListPhysicalLayout) -> LayoutResult<()> {
        require!(
            layout.supports_null_elements() || !self.element_nullability.is_nullable(),
            Error::UnrepresentableLayout {
                column: self.name.clone(),
                layout,
            }
        );
        Ok(())
    }

    /// The parquet group for this column under `layout`.
    pub fn physical_type(&self, layout: ListPhysicalLayout) -> LayoutResult<Type> {
        self.check_representable(layout)?;
        let repeated = match layout {
            ListPhysicalLayout::TwoLevel => primitive_type(
                TWO_LEVEL_ELEMENT_NAME,
                &self.element_type,
                Repetition::REPEATED,
            )?,
            ListPhysicalLayout::ThreeLevel => {
                let element = primitive_type(
                    THREE_LEVEL_ELEMENT_NAME,
                    &self.element_type,
                    repetition(self.element_nullability),
                )?;
                Type::group_type_builder(THREE_LEVEL_GROUP_NAME)
                    .with_repetition(Repetition::REPEATED)
                    .with_fields(vec![Arc::new(element)])
                    .build()?
            }
        };
        Ok(Type::group_type_builder(&self.name)
            .with_repetition(repetition(self.list_nullability))
            .with_converted_type(ConvertedType::LIST)
            .with_logical_type(Some(LogicalType::List))
            .with_fields(vec![Arc::new(repeated)])
            .build()?)
    }
}

/// The logical schema of the fixture tables: a non-null key, a non-null partition, the list
/// column configured by the nullability pair and a non-null ordering field.
pub fn table_schema(list_nullability: Nullability, element_nullability: Nullability) -> SchemaRef {
    let list = ListColumnSchema::new(
        LIST_FIELD,
        DataType::Int32,
        list_nullability,
        element_nullability,
    );
    Arc::new(ArrowSchema::new(vec![
        Field::new(KEY_FIELD, DataType::Int64, false),
        Field::new(PARTITION_FIELD, DataType::Utf8, false),
        list.to_arrow_field(),
        Field::new(ORDERING_FIELD, DataType::Int64, false),
    ]))
}

fn primitive_type(name: &str, data_type: &DataType, repetition: Repetition) -> LayoutResult<Type> {
    let builder = match data_type {
        DataType::Int32 => Type::primitive_type_builder(name, PhysicalType::INT32),
        DataType::Int64 => Type::primitive_type_builder(name, PhysicalType::INT64),
        DataType::Utf8 => Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
            .with_logical_type(Some(LogicalType::String)),
        other => {
            return Err(Error::unsupported_type(format!(
                "column '{name}' has type {other}, expected Int32, Int64 or Utf8"
            )))
        }
    };
    Ok(builder.with_repetition(repetition).build()?)
}

fn field_physical_type(field: &FieldRef, layout: ListPhysicalLayout) -> LayoutResult<Type> {
    match ListColumnSchema::from_arrow_field(field) {
        Some(list) => list.physical_type(layout),
        None => primitive_type(
            field.name(),
            field.data_type(),
            repetition(field.is_nullable().into()),
        ),
    }
}

/// Convert the logical `schema` into a parquet message whose list columns use `layout`.
pub fn parquet_schema_for(
    schema: &ArrowSchema,
    layout: ListPhysicalLayout,
) -> LayoutResult<TypePtr> {
    let fields = schema
        .fields()
        .iter()
        .map(|field| field_physical_type(field, layout).map(Arc::new))
        .collect::<LayoutResult<Vec<_>>>()?;
    Ok(Arc::new(
        Type::group_type_builder("table_schema")
            .with_fields(fields)
            .build()?,
    ))
}

/// Merge the schemas read from several data files into one logical schema. Fields are matched by
/// name and keep the order of the first schema; a field is nullable (and a list's elements are
/// nullable) if it is in any file. List fields always come out with `element` children.
pub fn unify_schemas<'a>(
    schemas: impl IntoIterator<Item = &'a ArrowSchema>,
) -> LayoutResult<Option<SchemaRef>> {
    let mut unified: Option<Vec<Field>> = None;
    for schema in schemas {
        let fields = schema
            .fields()
            .iter()
            .map(|field| canonical_field(field))
            .collect::<Vec<_>>();
        let Some(current) = unified.as_mut() else {
            unified = Some(fields);
            continue;
        };
        require!(
            current.len() == fields.len(),
            Error::generic(format!(
                "Cannot unify schemas with {} and {} fields",
                current.len(),
                fields.len()
            ))
        );
        for existing in current.iter_mut() {
            let other = fields
                .iter()
                .find(|f| f.name() == existing.name())
                .ok_or_else(|| Error::missing_column(existing.name()))?;
            *existing = merge_field(existing, other)?;
        }
    }
    Ok(unified.map(|fields| Arc::new(ArrowSchema::new(fields))))
}

fn canonical_field(field: &Field) -> Field {
    match ListColumnSchema::from_arrow_field(field) {
        Some(list) => list.to_arrow_field(),
        None => field.clone().with_metadata(Default::default()),
    }
}

fn merge_field(existing: &Field, other: &Field) -> LayoutResult<Field> {
    let nullable = existing.is_nullable() || other.is_nullable();
    match (existing.data_type(), other.data_type()) {
        (DataType::List(a), DataType::List(b)) if a.data_type() == b.data_type() => {
            let element = a.as_ref().clone().with_nullable(a.is_nullable() || b.is_nullable());
            Ok(Field::new_list(existing.name(), element, nullable))
        }
        (a, b) if a == b => Ok(existing.clone().with_nullable(nullable)),
        (a, b) => Err(Error::generic(format!(
            "Column '{}' has incompatible types {a} and {b}",
            existing.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::layout::detect_list_layout;
    use crate::parquet::schema::printer::print_schema;

    fn printed(schema: &Type) -> String {
        let mut out = Vec::new();
        print_schema(&mut out, schema);
        String::from_utf8(out).unwrap()
    }

    #[rstest]
    fn table_schema_shape(
        #[values(Nullability::Nullable, Nullability::NotNullable)] list: Nullability,
        #[values(Nullability::Nullable, Nullability::NotNullable)] element: Nullability,
    ) {
        let schema = table_schema(list, element);
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, [KEY_FIELD, PARTITION_FIELD, LIST_FIELD, ORDERING_FIELD]);
        for name in [KEY_FIELD, PARTITION_FIELD, ORDERING_FIELD] {
            assert!(!schema.field_with_name(name).unwrap().is_nullable());
        }
        let column =
            ListColumnSchema::from_arrow_field(schema.field_with_name(LIST_FIELD).unwrap())
                .unwrap();
        assert_eq!(column.list_nullability(), list);
        assert_eq!(column.element_nullability(), element);
        assert_eq!(column.element_type(), &DataType::Int32);
    }

    #[test]
    fn two_level_physical_schema() {
        let schema = table_schema(Nullability::Nullable, Nullability::NotNullable);
        let message = parquet_schema_for(&schema, ListPhysicalLayout::TwoLevel).unwrap();
        let text = printed(&message);
        assert!(text.contains("OPTIONAL group int_list (LIST)"), "{text}");
        assert!(text.contains("REPEATED INT32 array;"), "{text}");
        assert_eq!(
            detect_list_layout(&message, LIST_FIELD).unwrap(),
            ListPhysicalLayout::TwoLevel
        );
    }

    #[test]
    fn three_level_physical_schema() {
        let schema = table_schema(Nullability::NotNullable, Nullability::Nullable);
        let message = parquet_schema_for(&schema, ListPhysicalLayout::ThreeLevel).unwrap();
        let text = printed(&message);
        assert!(text.contains("REQUIRED group int_list (LIST)"), "{text}");
        assert!(text.contains("REPEATED group list"), "{text}");
        assert!(text.contains("OPTIONAL INT32 element;"), "{text}");
        assert_eq!(
            detect_list_layout(&message, LIST_FIELD).unwrap(),
            ListPhysicalLayout::ThreeLevel
        );
    }

    #[test]
    fn null_elements_need_three_levels() {
        let column = ListColumnSchema::new(
            LIST_FIELD,
            DataType::Int32,
            Nullability::Nullable,
            Nullability::Nullable,
        );
        assert!(column
            .check_representable(ListPhysicalLayout::ThreeLevel)
            .is_ok());
        let err = column
            .physical_type(ListPhysicalLayout::TwoLevel)
            .unwrap_err();
        assert!(
            matches!(err, Error::UnrepresentableLayout { layout: ListPhysicalLayout::TwoLevel, .. }),
            "unexpected error {err}"
        );
    }

    #[test]
    fn unsupported_element_type() {
        let column = ListColumnSchema::new(
            LIST_FIELD,
            DataType::Float64,
            Nullability::Nullable,
            Nullability::NotNullable,
        );
        crate::utils::test_utils::assert_result_error_with_message(
            column.physical_type(ListPhysicalLayout::ThreeLevel),
            "expected Int32, Int64 or Utf8",
        );
    }

    #[test]
    fn unify_two_and_three_level_file_schemas() {
        // the arrow schemas the parquet reader infers for each layout
        let two_level = ArrowSchema::new(vec![
            Field::new(KEY_FIELD, DataType::Int64, false),
            Field::new_list(
                LIST_FIELD,
                Field::new(TWO_LEVEL_ELEMENT_NAME, DataType::Int32, false),
                true,
            ),
        ]);
        let three_level = ArrowSchema::new(vec![
            Field::new(KEY_FIELD, DataType::Int64, false),
            Field::new_list(
                LIST_FIELD,
                Field::new(THREE_LEVEL_ELEMENT_NAME, DataType::Int32, true),
                true,
            ),
        ]);
        let unified = unify_schemas([&two_level, &three_level]).unwrap().unwrap();
        let expected = ListColumnSchema::new(
            LIST_FIELD,
            DataType::Int32,
            Nullability::Nullable,
            Nullability::Nullable,
        )
        .to_arrow_field();
        assert_eq!(unified.field_with_name(LIST_FIELD).unwrap(), &expected);

        let only_two_level = unify_schemas([&two_level]).unwrap().unwrap();
        let list = only_two_level.field_with_name(LIST_FIELD).unwrap();
        let DataType::List(element) = list.data_type() else {
            panic!("expected a list, got {list:?}");
        };
        assert_eq!(element.name(), THREE_LEVEL_ELEMENT_NAME);
        assert!(!element.is_nullable());

        assert!(unify_schemas(std::iter::empty()).unwrap().is_none());
    }
}
