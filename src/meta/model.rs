//! The reflected database model.
//!
//! Tables are keyed by name in a map and foreign keys hold names, not
//! handles, so cyclic references (self-joins, mutual references) need no
//! special casing; consumers resolve names lazily against the model.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Concrete scalar kinds the reflector understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    Int32,
    Int64,
    SmallInt,
    Float32,
    Float64,
    Numeric { precision: Option<u32>, scale: Option<u32> },
    Bool,
    Text,
    Varchar(Option<u32>),
    Char(Option<u32>),
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
    Time,
    TimeTz,
    Interval,
    Json,
    Jsonb,
    Bytea,
    Inet,
    Cidr,
    MacAddr,
    Bit,
    VarBit,
    Xml,
}

impl ScalarKind {
    /// True for kinds surfaced as GraphQL `String` that must be selected
    /// with a text cast because sqlx has no native decode for them.
    pub fn needs_text_cast(&self) -> bool {
        matches!(
            self,
            ScalarKind::TimeTz
                | ScalarKind::Inet
                | ScalarKind::Cidr
                | ScalarKind::MacAddr
                | ScalarKind::Bit
                | ScalarKind::VarBit
                | ScalarKind::Xml
        )
    }

    /// True for textual kinds that accept string pattern operators.
    pub fn is_textual(&self) -> bool {
        matches!(self, ScalarKind::Text | ScalarKind::Varchar(_) | ScalarKind::Char(_))
    }

    /// True for kinds ordered and compared numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::SmallInt
                | ScalarKind::Float32
                | ScalarKind::Float64
                | ScalarKind::Numeric { .. }
        )
    }

    /// True for date/time kinds rendered as ISO-8601 strings.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ScalarKind::Date
                | ScalarKind::Timestamp
                | ScalarKind::TimestampTz
                | ScalarKind::Time
                | ScalarKind::TimeTz
                | ScalarKind::Interval
        )
    }

    pub fn is_json(&self) -> bool {
        matches!(self, ScalarKind::Json | ScalarKind::Jsonb)
    }
}

/// Attribute of a composite type, in ordinal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeAttribute {
    pub name: String,
    pub type_descriptor: TypeDescriptor,
    pub order: i32,
    pub nullable: bool,
}

/// Tagged column type. `Domain` collapses to its base type everywhere except
/// input casting; `Unknown` keeps the raw catalog string for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeDescriptor {
    Scalar(ScalarKind),
    Array(Box<TypeDescriptor>),
    Enum { name: String, values: Vec<String> },
    Composite { name: String, fields: Vec<CompositeAttribute> },
    Domain(Box<TypeDescriptor>),
    Unknown(String),
}

impl TypeDescriptor {
    /// Resolve domains down to the underlying descriptor.
    pub fn base(&self) -> &TypeDescriptor {
        match self {
            TypeDescriptor::Domain(inner) => inner.base(),
            other => other,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarKind> {
        match self.base() {
            TypeDescriptor::Scalar(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.base(), TypeDescriptor::Array(_))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.base(), TypeDescriptor::Enum { .. })
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.base(), TypeDescriptor::Composite { .. })
    }

    pub fn is_json(&self) -> bool {
        self.as_scalar().is_some_and(ScalarKind::is_json)
    }

    pub fn is_textual(&self) -> bool {
        self.as_scalar().is_some_and(ScalarKind::is_textual)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEntry {
    pub name: String,
    pub type_descriptor: TypeDescriptor,
    pub is_primary_key: bool,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing column on the owning table.
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub name: String,
    pub is_view: bool,
    pub columns: Vec<ColumnEntry>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableEntry {
    pub fn column(&self, name: &str) -> Option<&ColumnEntry> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnEntry> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Foreign key whose referencing column is `column`, if any.
    pub fn foreign_key_on(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }
}

/// A named enum type with its ordered, stable value list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEnum {
    pub name: String,
    pub schema: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomComposite {
    pub name: String,
    pub schema: String,
    pub attributes: Vec<CompositeAttribute>,
}

/// Row-level security policy, carried for completeness. Enforcement stays
/// in the database; the engine only sets the role on the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlsPolicy {
    pub policy_name: String,
    pub table: String,
    pub schema: String,
    pub permissive: bool,
    pub roles: Vec<String>,
    pub command: String,
    pub using_expression: Option<String>,
    pub with_check_expression: Option<String>,
}

/// The full reflected model of one database schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseModel {
    pub schema: String,
    pub tables: BTreeMap<String, TableEntry>,
    pub enums: BTreeMap<String, CustomEnum>,
    pub composites: BTreeMap<String, CustomComposite>,
}

impl DatabaseModel {
    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.get(name)
    }

    /// Check the structural invariants the reflector promises.
    ///
    /// Returns the first violation as a message; used by tests and by the
    /// golden service after reflection.
    pub fn check_invariants(&self) -> Result<(), String> {
        for table in self.tables.values() {
            let mut seen = BTreeSet::new();
            for column in &table.columns {
                if !seen.insert(column.name.as_str()) {
                    return Err(format!(
                        "duplicate column {} on table {}",
                        column.name, table.name
                    ));
                }
                if column.is_primary_key && column.is_nullable {
                    return Err(format!(
                        "primary key column {}.{} marked nullable",
                        table.name, column.name
                    ));
                }
            }
            if table.is_view && !table.foreign_keys.is_empty() {
                return Err(format!("view {} carries foreign keys", table.name));
            }
            if table.is_view && table.columns.iter().any(|c| c.is_primary_key) {
                return Err(format!("view {} carries a primary key", table.name));
            }
            for fk in &table.foreign_keys {
                if table.column(&fk.column).is_none() {
                    return Err(format!(
                        "foreign key column {}.{} does not exist",
                        table.name, fk.column
                    ));
                }
                let Some(target) = self.tables.get(&fk.referenced_table) else {
                    return Err(format!(
                        "foreign key {}.{} references missing table {}",
                        table.name, fk.column, fk.referenced_table
                    ));
                };
                if target.column(&fk.referenced_column).is_none() {
                    return Err(format!(
                        "foreign key {}.{} references missing column {}.{}",
                        table.name, fk.column, fk.referenced_table, fk.referenced_column
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Operations a role can hold privileges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableOp {
    Select,
    Insert,
    Update,
    Delete,
}

/// Privileges one role holds over the reflected schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolePrivileges {
    pub role: String,
    pub is_superuser: bool,
    pub selectable: BTreeSet<String>,
    pub insertable: BTreeSet<String>,
    pub updatable: BTreeSet<String>,
    pub deletable: BTreeSet<String>,
    /// Explicit column-level grants, keyed by operation and table.
    pub column_grants: BTreeMap<(TableOp, String), BTreeSet<String>>,
    pub policies: Vec<RlsPolicy>,
}

impl RolePrivileges {
    pub fn superuser(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            is_superuser: true,
            ..Default::default()
        }
    }

    pub fn table_set(&self, op: TableOp) -> &BTreeSet<String> {
        match op {
            TableOp::Select => &self.selectable,
            TableOp::Insert => &self.insertable,
            TableOp::Update => &self.updatable,
            TableOp::Delete => &self.deletable,
        }
    }

    pub fn has_table_privilege(&self, op: TableOp, table: &str) -> bool {
        self.is_superuser || self.table_set(op).contains(table)
    }

    /// Any privilege at all: table-level or an explicit column grant.
    pub fn has_any_privilege(&self, table: &str) -> bool {
        self.is_superuser
            || [TableOp::Select, TableOp::Insert, TableOp::Update, TableOp::Delete]
                .iter()
                .any(|op| self.table_set(*op).contains(table))
            || self
                .column_grants
                .iter()
                .any(|((_, t), cols)| t == table && !cols.is_empty())
    }

    pub fn column_allowed(&self, op: TableOp, table: &str, column: &str) -> bool {
        if self.is_superuser || self.has_table_privilege(op, table) {
            return true;
        }
        self.column_grants
            .get(&(op, table.to_string()))
            .is_some_and(|cols| cols.contains(column))
    }

    pub fn table_has_rls(&self, table: &str) -> bool {
        self.policies.iter().any(|p| p.table == table)
    }
}

/// Per-table operation capabilities derived by the schema filter; the
/// generator consults these to decide which root fields to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCapabilities {
    pub can_query: bool,
    pub can_create: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub has_rls: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCapabilities {
    pub can_select: bool,
    pub can_insert: bool,
    pub can_update: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn column(name: &str, kind: ScalarKind, pk: bool, nullable: bool) -> ColumnEntry {
        ColumnEntry {
            name: name.into(),
            type_descriptor: TypeDescriptor::Scalar(kind),
            is_primary_key: pk,
            is_nullable: nullable,
        }
    }

    fn sample_model() -> DatabaseModel {
        let mut tables = BTreeMap::new();
        tables.insert(
            "customer".to_string(),
            TableEntry {
                name: "customer".into(),
                is_view: false,
                columns: vec![
                    column("customer_id", ScalarKind::Int32, true, false),
                    column("first_name", ScalarKind::Varchar(Some(45)), false, false),
                    column("address_id", ScalarKind::Int32, false, true),
                ],
                foreign_keys: vec![ForeignKey {
                    column: "address_id".into(),
                    referenced_table: "address".into(),
                    referenced_column: "address_id".into(),
                }],
            },
        );
        tables.insert(
            "address".to_string(),
            TableEntry {
                name: "address".into(),
                is_view: false,
                columns: vec![
                    column("address_id", ScalarKind::Int32, true, false),
                    column("city", ScalarKind::Text, false, false),
                ],
                foreign_keys: vec![],
            },
        );
        DatabaseModel {
            schema: "public".into(),
            tables,
            ..Default::default()
        }
    }

    #[test]
    fn invariants_hold_for_sample() {
        assert_eq!(sample_model().check_invariants(), Ok(()));
    }

    #[test]
    fn invariants_reject_dangling_fk() {
        let mut model = sample_model();
        model.tables.remove("address");
        assert!(model.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_nullable_pk() {
        let mut model = sample_model();
        model
            .tables
            .get_mut("customer")
            .unwrap()
            .columns
            .get_mut(0)
            .unwrap()
            .is_nullable = true;
        assert!(model.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_view_with_fk() {
        let mut model = sample_model();
        model.tables.get_mut("customer").unwrap().is_view = true;
        let err = model.check_invariants().unwrap_err();
        assert!(err.contains("view"), "{err}");
    }

    #[test]
    fn domain_resolves_to_base() {
        let ty = TypeDescriptor::Domain(Box::new(TypeDescriptor::Domain(Box::new(
            TypeDescriptor::Scalar(ScalarKind::Uuid),
        ))));
        assert_eq!(ty.as_scalar(), Some(&ScalarKind::Uuid));
    }

    #[test]
    fn column_grants_do_not_imply_table_grant() {
        let mut priv_ = RolePrivileges {
            role: "reporting".into(),
            ..Default::default()
        };
        priv_
            .column_grants
            .entry((TableOp::Select, "customer".into()))
            .or_default()
            .insert("first_name".into());

        assert!(priv_.has_any_privilege("customer"));
        assert!(!priv_.has_table_privilege(TableOp::Select, "customer"));
        assert!(priv_.column_allowed(TableOp::Select, "customer", "first_name"));
        assert!(!priv_.column_allowed(TableOp::Select, "customer", "address_id"));
    }
}
