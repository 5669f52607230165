//! Schema metadata: reflection, privileges and role-scoped filtering.

pub mod filter;
pub mod golden;
pub mod model;
pub mod privileges;
pub mod reflector;

pub use filter::{FilteredModel, filter_model};
pub use golden::FullSchemaService;
pub use model::{DatabaseModel, RolePrivileges, TableEntry};
pub use privileges::RolePrivilegeService;
pub use reflector::SchemaReflector;
