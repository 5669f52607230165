//! Database type → GraphQL type materialization (the normative table of
//! the schema generator).

use async_graphql::dynamic::TypeRef;

use crate::graphql::naming;
use crate::meta::model::{ScalarKind, TypeDescriptor};

/// The custom JSON scalar's type name.
pub const JSON_SCALAR: &str = "JSON";

/// GraphQL named type for a scalar kind. 64-bit integers surface as `Int`;
/// the field description notes the width.
pub fn scalar_type_name(kind: &ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::SmallInt => TypeRef::INT,
        ScalarKind::Float32 | ScalarKind::Float64 | ScalarKind::Numeric { .. } => TypeRef::FLOAT,
        ScalarKind::Bool => TypeRef::BOOLEAN,
        ScalarKind::Uuid => TypeRef::ID,
        ScalarKind::Json | ScalarKind::Jsonb => JSON_SCALAR,
        // Dates, times, intervals, bytea, network addresses, bit strings
        // and XML all travel as strings.
        _ => TypeRef::STRING,
    }
}

/// The named output type for a descriptor (without nullability wrapping).
pub fn output_type_name(descriptor: &TypeDescriptor) -> String {
    match descriptor.base() {
        TypeDescriptor::Scalar(kind) => scalar_type_name(kind).to_string(),
        TypeDescriptor::Enum { name, .. } => naming::type_name(name),
        TypeDescriptor::Composite { name, .. } => naming::type_name(name),
        TypeDescriptor::Array(element) => output_type_name(element),
        TypeDescriptor::Domain(inner) => output_type_name(inner),
        TypeDescriptor::Unknown(_) => TypeRef::STRING.to_string(),
    }
}

/// Output [`TypeRef`] for a column descriptor, applying nullability.
/// Arrays become `[T]` (nullable elements — element nulls are legal in
/// Postgres arrays).
pub fn output_type_ref(descriptor: &TypeDescriptor, nullable: bool) -> TypeRef {
    match descriptor.base() {
        TypeDescriptor::Array(element) => {
            let name = output_type_name(element);
            if nullable {
                TypeRef::named_list(name)
            } else {
                TypeRef::named_list_nn(name)
            }
        }
        other => {
            let name = output_type_name(other);
            if nullable {
                TypeRef::named(name)
            } else {
                TypeRef::named_nn(name)
            }
        }
    }
}

/// Name of the filter input type matching a column descriptor.
///
/// Numeric columns get `IntFilter`/`FloatFilter`, temporal columns
/// `DateTimeFilter`, JSON columns `JsonFilter`, arrays an element-specific
/// `…ArrayFilter`; everything else compares as a string.
pub fn filter_type_name(descriptor: &TypeDescriptor) -> String {
    match descriptor.base() {
        TypeDescriptor::Scalar(kind) => match kind {
            ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::SmallInt => "IntFilter".into(),
            ScalarKind::Float32 | ScalarKind::Float64 | ScalarKind::Numeric { .. } => {
                "FloatFilter".into()
            }
            ScalarKind::Bool => "BooleanFilter".into(),
            ScalarKind::Json | ScalarKind::Jsonb => "JsonFilter".into(),
            k if k.is_temporal() => "DateTimeFilter".into(),
            _ => "StringFilter".into(),
        },
        TypeDescriptor::Array(element) => array_filter_name(element),
        // Enums and unknown types compare as text.
        _ => "StringFilter".into(),
    }
}

/// `IntArrayFilter`, `StringArrayFilter`, … keyed by the element's scalar
/// surface type.
pub fn array_filter_name(element: &TypeDescriptor) -> String {
    let base = match element.base() {
        TypeDescriptor::Scalar(kind) => match scalar_type_name(kind) {
            "Int" => "Int",
            "Float" => "Float",
            "Boolean" => "Boolean",
            "ID" => "Id",
            JSON_SCALAR => "Json",
            _ => "String",
        },
        _ => "String",
    };
    format!("{base}ArrayFilter")
}

/// The scalar element type name used inside an array filter.
pub fn array_element_type_name(element: &TypeDescriptor) -> String {
    match element.base() {
        TypeDescriptor::Scalar(kind) => scalar_type_name(kind).to_string(),
        _ => TypeRef::STRING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scalar_mapping_follows_the_table() {
        assert_eq!(scalar_type_name(&ScalarKind::Int64), "Int");
        assert_eq!(scalar_type_name(&ScalarKind::SmallInt), "Int");
        assert_eq!(
            scalar_type_name(&ScalarKind::Numeric { precision: Some(10), scale: Some(2) }),
            "Float"
        );
        assert_eq!(scalar_type_name(&ScalarKind::Uuid), "ID");
        assert_eq!(scalar_type_name(&ScalarKind::Jsonb), "JSON");
        assert_eq!(scalar_type_name(&ScalarKind::Bytea), "String");
        assert_eq!(scalar_type_name(&ScalarKind::Inet), "String");
        assert_eq!(scalar_type_name(&ScalarKind::TimestampTz), "String");
    }

    #[test]
    fn filter_names_by_kind() {
        assert_eq!(
            filter_type_name(&TypeDescriptor::Scalar(ScalarKind::Int32)),
            "IntFilter"
        );
        assert_eq!(
            filter_type_name(&TypeDescriptor::Scalar(ScalarKind::Date)),
            "DateTimeFilter"
        );
        assert_eq!(
            filter_type_name(&TypeDescriptor::Enum { name: "mood".into(), values: vec![] }),
            "StringFilter"
        );
        assert_eq!(
            filter_type_name(&TypeDescriptor::Array(Box::new(TypeDescriptor::Scalar(
                ScalarKind::Int32
            )))),
            "IntArrayFilter"
        );
    }

    #[test]
    fn enum_and_composite_types_are_pascal_cased() {
        let e = TypeDescriptor::Enum { name: "user_mood".into(), values: vec![] };
        assert_eq!(output_type_name(&e), "UserMood");
    }
}
