//! Role-scoped schema filtering (C6).
//!
//! A pure function from (golden model, role privileges) to the restricted
//! model a role may see, plus the operation capabilities the GraphQL
//! generator consults when deciding which fields to emit.

use std::collections::BTreeMap;

use crate::meta::model::{
    ColumnCapabilities, DatabaseModel, RolePrivileges, TableCapabilities, TableEntry, TableOp,
};

/// A role's view of the schema: the filtered model plus capability maps
/// keyed by table name and `(table, column)`.
#[derive(Debug, Clone, Default)]
pub struct FilteredModel {
    pub model: DatabaseModel,
    pub table_caps: BTreeMap<String, TableCapabilities>,
    pub column_caps: BTreeMap<(String, String), ColumnCapabilities>,
}

impl FilteredModel {
    pub fn capabilities(&self, table: &str) -> TableCapabilities {
        self.table_caps.get(table).copied().unwrap_or_default()
    }

    pub fn column_capabilities(&self, table: &str, column: &str) -> ColumnCapabilities {
        self.column_caps
            .get(&(table.to_string(), column.to_string()))
            .copied()
            .unwrap_or_default()
    }
}

/// Produce the role-scoped model.
///
/// Tables without any privilege disappear; kept tables lose columns the
/// role cannot select; foreign keys survive only when both endpoints do.
pub fn filter_model(model: &DatabaseModel, privileges: &RolePrivileges) -> FilteredModel {
    let mut tables: BTreeMap<String, TableEntry> = BTreeMap::new();
    let mut table_caps = BTreeMap::new();
    let mut column_caps = BTreeMap::new();

    for (name, table) in &model.tables {
        if !privileges.has_any_privilege(name) {
            continue;
        }

        let columns: Vec<_> = table
            .columns
            .iter()
            .filter(|c| privileges.column_allowed(TableOp::Select, name, &c.name))
            .cloned()
            .collect();
        if columns.is_empty() {
            continue;
        }

        for column in &columns {
            column_caps.insert(
                (name.clone(), column.name.clone()),
                ColumnCapabilities {
                    can_select: true,
                    can_insert: privileges.column_allowed(TableOp::Insert, name, &column.name),
                    can_update: privileges.column_allowed(TableOp::Update, name, &column.name),
                },
            );
        }

        table_caps.insert(
            name.clone(),
            TableCapabilities {
                can_query: privileges.is_superuser
                    || privileges.has_table_privilege(TableOp::Select, name)
                    || columns.iter().any(|c| {
                        privileges.column_allowed(TableOp::Select, name, &c.name)
                    }),
                can_create: !table.is_view
                    && privileges.has_table_privilege(TableOp::Insert, name),
                can_update: !table.is_view
                    && privileges.has_table_privilege(TableOp::Update, name),
                // Delete goes through a single `id` argument, so tables
                // without exactly one primary-key column never advertise it.
                can_delete: !table.is_view
                    && table.primary_key_columns().len() == 1
                    && privileges.has_table_privilege(TableOp::Delete, name),
                has_rls: privileges.table_has_rls(name),
            },
        );

        tables.insert(
            name.clone(),
            TableEntry {
                name: table.name.clone(),
                is_view: table.is_view,
                columns,
                foreign_keys: table.foreign_keys.clone(),
            },
        );
    }

    // Second pass: prune foreign keys whose endpoints did not survive.
    let surviving: Vec<String> = tables.keys().cloned().collect();
    for name in &surviving {
        let keep: Vec<_> = {
            let table = &tables[name];
            table
                .foreign_keys
                .iter()
                .filter(|fk| {
                    table.column(&fk.column).is_some()
                        && tables
                            .get(&fk.referenced_table)
                            .is_some_and(|t| t.column(&fk.referenced_column).is_some())
                })
                .cloned()
                .collect()
        };
        tables.get_mut(name).unwrap().foreign_keys = keep;
    }

    FilteredModel {
        model: DatabaseModel {
            schema: model.schema.clone(),
            tables,
            enums: model.enums.clone(),
            composites: model.composites.clone(),
        },
        table_caps,
        column_caps,
    }
}
