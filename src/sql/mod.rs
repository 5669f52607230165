//! Deterministic, parameterized SQL fragment composition.
//!
//! Nothing in this module executes queries; it produces SQL text plus the
//! ordered parameter list the caller binds. User-supplied values never
//! appear lexically in the text.

mod cursor;
mod filter;
mod ident;
mod order;
pub mod value;

pub use cursor::{decode_cursor, encode_cursor};
pub use filter::build_where;
pub use ident::{build_column_list, comparison_expr, qualified, quote_ident, select_expr};
pub use order::{Direction, OrderSpec, build_cursor_predicate};
pub use value::{ParamCollector, SqlValue};
