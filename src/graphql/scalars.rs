//! Custom scalars registered with every generated schema.

use async_graphql::dynamic::Scalar;

use crate::graphql::types::JSON_SCALAR;

/// The `JSON` scalar: accepts a string, object, array, number, boolean or
/// null on input and produces the same shape on output. Strings that parse
/// as JSON are stored parsed (see the input coercion path).
pub fn json_scalar() -> Scalar {
    Scalar::new(JSON_SCALAR).description(
        "Arbitrary JSON. String inputs that parse as JSON are preserved as the parsed value.",
    )
}
