//! GraphQL schema synthesis (C7).
//!
//! The schema is built dynamically at runtime because nothing about the
//! database is known at compile time. Build order keeps type references
//! resolvable: scalars → enums → composites → table objects → filter
//! inputs → connection/edge types → order-by inputs → mutation inputs →
//! root Query/Mutation/Subscription. Output is deterministic for a given
//! filtered model.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_graphql::dynamic::{
    Enum, Field, FieldFuture, FieldValue, InputObject, InputValue, Object, Schema,
    SubscriptionField, SubscriptionFieldFuture, TypeRef,
};
use async_graphql::dynamic::Subscription as SubscriptionRoot;
use async_graphql::{Name, Value};
use futures::StreamExt;
use indexmap::IndexMap;
use tokio_stream::wrappers::BroadcastStream;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::convert::Record;
use crate::error::{ApiError, ApiResult};
use crate::fetch::{
    BatchLoader, ConnectionArgs, ConnectionPage, DataFetcher, FetchArgs, RelationshipRequest,
};
use crate::graphql::naming;
use crate::graphql::scalars::json_scalar;
use crate::graphql::subscriptions::{ChangeBroker, ChangeEvent};
use crate::graphql::types::{
    JSON_SCALAR, array_element_type_name, array_filter_name, filter_type_name, output_type_ref,
    scalar_type_name,
};
use crate::meta::model::{
    ColumnEntry, DatabaseModel, RolePrivileges, ScalarKind, TableEntry, TypeDescriptor,
};
use crate::meta::{FilteredModel, FullSchemaService, RolePrivilegeService, filter_model};
use crate::mutate::Mutator;

/// The opaque role attached to each request; `None` keeps the pool role.
#[derive(Debug, Clone, Default)]
pub struct RequestRole(pub Option<String>);

impl RequestRole {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Shared resolver dependencies, inserted into schema data once per
/// compiled schema.
pub struct GqlContext {
    pub model: Arc<DatabaseModel>,
    pub fetcher: DataFetcher,
    pub mutator: Mutator,
}

/// Parent value for `TSubscriptionData`: the row plus its pre/post images.
#[derive(Clone)]
struct SubscriptionPayload {
    current: Record,
    old: Option<Record>,
    new: Option<Record>,
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arg_value(args: &IndexMap<Name, Value>, name: &str) -> Option<Value> {
    args.get(name).filter(|v| !matches!(v, Value::Null)).cloned()
}

fn arg_i64(args: &IndexMap<Name, Value>, name: &str) -> Option<i64> {
    match args.get(name) {
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    }
}

fn arg_string(args: &IndexMap<Name, Value>, name: &str) -> Option<String> {
    match args.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn fetch_args(args: &IndexMap<Name, Value>) -> FetchArgs {
    FetchArgs {
        filter: arg_value(args, "where"),
        order_by: arg_value(args, "orderBy"),
        limit: arg_i64(args, "limit"),
        offset: arg_i64(args, "offset"),
    }
}

fn connection_args(args: &IndexMap<Name, Value>) -> ConnectionArgs {
    ConnectionArgs {
        filter: arg_value(args, "where"),
        order_by: arg_value(args, "orderBy"),
        first: arg_i64(args, "first"),
        after: arg_string(args, "after"),
        last: arg_i64(args, "last"),
        before: arg_string(args, "before"),
        offset: arg_i64(args, "offset"),
    }
}

/// The relationship fields present in a node-level selection.
fn relationship_requests(
    model: &DatabaseModel,
    table: &TableEntry,
    selected: &BTreeSet<String>,
) -> Vec<RelationshipRequest> {
    let mut requests = Vec::new();
    for fk in &table.foreign_keys {
        if selected.contains(&naming::forward_relationship_field(&fk.referenced_table)) {
            requests.push(RelationshipRequest::Forward { fk: fk.clone() });
        }
    }
    for (child_name, child) in &model.tables {
        for fk in &child.foreign_keys {
            if fk.referenced_table == table.name
                && selected.contains(&naming::reverse_relationship_field(child_name))
            {
                requests.push(RelationshipRequest::Reverse {
                    source_table: child_name.clone(),
                    fk_column: fk.column.clone(),
                    referenced_column: fk.referenced_column.clone(),
                });
            }
        }
    }
    requests
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Generate the executable schema for one role-scoped model view.
pub fn generate_schema(
    filtered: &FilteredModel,
    shared: Arc<GqlContext>,
    broker: Arc<ChangeBroker>,
) -> ApiResult<Schema> {
    let model = &filtered.model;
    let has_mutations = model.tables.keys().any(|t| {
        let caps = filtered.capabilities(t);
        caps.can_create || caps.can_update || caps.can_delete
    });

    let mut builder = Schema::build(
        "Query",
        if has_mutations { Some("Mutation") } else { None },
        Some("Subscription"),
    )
    .data(shared.clone())
    .data(broker.clone());

    // Scalars and shared inputs.
    builder = builder.register(json_scalar());
    builder = builder.register(order_direction_enum());
    for input in shared_filter_inputs(model) {
        builder = builder.register(input);
    }
    builder = builder.register(page_info_object());

    // Enums.
    for custom in model.enums.values() {
        let mut gql_enum = Enum::new(naming::type_name(&custom.name));
        for value in &custom.values {
            gql_enum = gql_enum.item(value.as_str());
        }
        builder = builder.register(gql_enum);
    }

    // Composites.
    for custom in model.composites.values() {
        let mut object = Object::new(naming::type_name(&custom.name));
        for attr in &custom.attributes {
            object = object.field(composite_field(attr.name.clone(), &attr.type_descriptor));
        }
        builder = builder.register(object);
    }

    // Table objects, filter inputs, connections, order-bys, mutation
    // inputs, change-event types. Mutation inputs are registered only when
    // the matching capability exists, so no empty input object can reach
    // the schema.
    for (name, table) in &model.tables {
        let caps = filtered.capabilities(name);
        builder = builder.register(table_object(model, table));
        builder = builder.register(table_filter_input(table));
        builder = builder.register(edge_object(table));
        builder = builder.register(connection_object(table));
        builder = builder.register(order_by_input(table));
        if !table.is_view {
            builder = builder.register(connect_input_object(table));
            if caps.can_create {
                builder = builder.register(create_input_object(filtered, table));
                builder = builder.register(relationship_input_object(filtered, model, table));
            }
            if caps.can_update {
                builder = builder.register(update_input_object(filtered, table));
            }
        }
        builder = builder.register(change_operation_enum(table));
        builder = builder.register(subscription_data_object(table));
        builder = builder.register(change_event_object(table));
    }

    // Roots.
    builder = builder.register(query_root(filtered));
    if has_mutations {
        builder = builder.register(mutation_root(filtered));
    }
    builder = builder.register(subscription_root(model));

    builder
        .finish()
        .map_err(|e| ApiError::Internal(format!("schema build failed: {e}")))
}

fn order_direction_enum() -> Enum {
    Enum::new("OrderDirection").item("ASC").item("DESC")
}

/// PageInfo resolvers downcast the shared [`ConnectionPage`].
fn page_info_object() -> Object {
    let flag =
        |name: &'static str, extract: fn(&ConnectionPage) -> Value| {
            Field::new(name, TypeRef::named_nn(TypeRef::BOOLEAN), move |ctx| {
                FieldFuture::new(async move {
                    let page = ctx.parent_value.try_downcast_ref::<ConnectionPage>()?;
                    Ok(Some(FieldValue::value(extract(page))))
                })
            })
        };
    let cursor =
        |name: &'static str, extract: fn(&ConnectionPage) -> Option<String>| {
            Field::new(name, TypeRef::named(TypeRef::STRING), move |ctx| {
                FieldFuture::new(async move {
                    let page = ctx.parent_value.try_downcast_ref::<ConnectionPage>()?;
                    Ok(extract(page).map(|c| FieldValue::value(Value::String(c))))
                })
            })
        };

    Object::new("PageInfo")
        .field(cursor("startCursor", |p| p.start_cursor.clone()))
        .field(cursor("endCursor", |p| p.end_cursor.clone()))
        .field(flag("hasNextPage", |p| Value::Boolean(p.has_next_page)))
        .field(flag("hasPreviousPage", |p| Value::Boolean(p.has_previous_page)))
}

/// The fixed per-kind filter inputs, plus one array filter per element
/// type appearing in the model.
fn shared_filter_inputs(model: &DatabaseModel) -> Vec<InputObject> {
    let mut inputs = Vec::new();

    let comparison = |input: InputObject, ty: &str| {
        input
            .field(InputValue::new("eq", TypeRef::named(ty)))
            .field(InputValue::new("neq", TypeRef::named(ty)))
            .field(InputValue::new("gt", TypeRef::named(ty)))
            .field(InputValue::new("gte", TypeRef::named(ty)))
            .field(InputValue::new("lt", TypeRef::named(ty)))
            .field(InputValue::new("lte", TypeRef::named(ty)))
            .field(InputValue::new("in", TypeRef::named_nn_list(ty)))
            .field(InputValue::new(
                "notIn",
                TypeRef::named_nn_list(ty),
            ).description("NULL entries are dropped before binding"))
            .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN)))
    };

    inputs.push(comparison(InputObject::new("IntFilter"), TypeRef::INT));
    inputs.push(comparison(InputObject::new("FloatFilter"), TypeRef::FLOAT));
    inputs.push(comparison(InputObject::new("DateTimeFilter"), TypeRef::STRING));

    inputs.push(
        comparison(InputObject::new("StringFilter"), TypeRef::STRING)
            .field(InputValue::new("contains", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("startsWith", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("endsWith", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("like", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("ilike", TypeRef::named(TypeRef::STRING))),
    );

    inputs.push(
        InputObject::new("BooleanFilter")
            .field(InputValue::new("eq", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("neq", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN))),
    );

    inputs.push(
        InputObject::new("JsonFilter")
            .field(InputValue::new("eq", TypeRef::named(JSON_SCALAR)))
            .field(InputValue::new("neq", TypeRef::named(JSON_SCALAR)))
            .field(InputValue::new("contains", TypeRef::named(JSON_SCALAR)))
            .field(InputValue::new("hasKey", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("path", TypeRef::named_nn_list(TypeRef::STRING)))
            .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN))),
    );

    // Array filters for the element types actually present.
    let mut seen = BTreeSet::new();
    for table in model.tables.values() {
        for column in &table.columns {
            if let TypeDescriptor::Array(element) = column.type_descriptor.base() {
                let name = array_filter_name(element);
                if !seen.insert(name.clone()) {
                    continue;
                }
                let element_ty = array_element_type_name(element);
                inputs.push(
                    InputObject::new(name)
                        .field(InputValue::new("contains", TypeRef::named(&element_ty)))
                        .field(InputValue::new("hasAny", TypeRef::named_nn_list(&element_ty)))
                        .field(InputValue::new("length", TypeRef::named(TypeRef::INT)))
                        .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
                        .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN))),
                );
            }
        }
    }

    inputs
}

/// Field on a composite object: reads the attribute out of the parent
/// object value.
fn composite_field(attr_name: String, descriptor: &TypeDescriptor) -> Field {
    let ty = output_type_ref(descriptor, true);
    let key = attr_name.clone();
    Field::new(attr_name, ty, move |ctx| {
        let key = key.clone();
        FieldFuture::new(async move {
            let Some(Value::Object(map)) = ctx.parent_value.as_value() else {
                return Ok(None);
            };
            match map.get(key.as_str()) {
                Some(Value::Null) | None => Ok(None),
                Some(v) => Ok(Some(FieldValue::value(v.clone()))),
            }
        })
    })
}

/// The object type for one table: a field per accessible column plus
/// relationship fields derived from foreign keys.
fn table_object(model: &DatabaseModel, table: &TableEntry) -> Object {
    let mut object = Object::new(naming::type_name(&table.name));
    let mut used: BTreeSet<String> = table.columns.iter().map(|c| c.name.clone()).collect();

    for column in &table.columns {
        object = object.field(column_field(column));
    }

    // Forward relationships: one nullable field per FK.
    for fk in &table.foreign_keys {
        let field_name = naming::forward_relationship_field(&fk.referenced_table);
        if !used.insert(field_name.clone()) {
            continue;
        }
        let target_type = naming::type_name(&fk.referenced_table);
        let fk = fk.clone();
        object = object.field(Field::new(
            field_name,
            TypeRef::named(target_type),
            move |ctx| {
                let fk = fk.clone();
                FieldFuture::new(async move {
                    let parent = ctx.parent_value.try_downcast_ref::<Record>()?;
                    let shared = ctx.data::<Arc<GqlContext>>()?;
                    let loader = ctx.data::<Arc<BatchLoader>>()?;
                    let role = ctx.data::<RequestRole>()?.clone();
                    let target = shared.model.table(&fk.referenced_table).ok_or_else(|| {
                        async_graphql::Error::new(format!(
                            "unknown table {}",
                            fk.referenced_table
                        ))
                    })?;
                    let record = shared
                        .fetcher
                        .resolve_forward_relationship(
                            role.as_deref(),
                            loader,
                            parent,
                            &fk,
                            target,
                        )
                        .await.map_err(ApiError::into_graphql_error)?;
                    Ok(record.map(FieldValue::owned_any))
                })
            },
        ));
    }

    // Reverse relationships: a non-null list per referencing table.
    for (child_name, child) in &model.tables {
        for fk in &child.foreign_keys {
            if fk.referenced_table != table.name {
                continue;
            }
            let field_name = naming::reverse_relationship_field(child_name);
            if !used.insert(field_name.clone()) {
                continue;
            }
            let child_type = naming::type_name(child_name);
            let child_name = child_name.clone();
            let fk = fk.clone();
            object = object.field(Field::new(
                field_name,
                TypeRef::named_nn_list_nn(child_type),
                move |ctx| {
                    let fk = fk.clone();
                    let child_name = child_name.clone();
                    FieldFuture::new(async move {
                        let parent = ctx.parent_value.try_downcast_ref::<Record>()?;
                        let shared = ctx.data::<Arc<GqlContext>>()?;
                        let loader = ctx.data::<Arc<BatchLoader>>()?;
                        let role = ctx.data::<RequestRole>()?.clone();
                        let source = shared.model.table(&child_name).ok_or_else(|| {
                            async_graphql::Error::new(format!("unknown table {child_name}"))
                        })?;
                        let records = shared
                            .fetcher
                            .resolve_reverse_relationship(
                                role.as_deref(),
                                loader,
                                parent,
                                source,
                                &fk.column,
                                &fk.referenced_column,
                            )
                            .await.map_err(ApiError::into_graphql_error)?;
                        Ok(Some(FieldValue::list(
                            records.into_iter().map(FieldValue::owned_any),
                        )))
                    })
                },
            ));
        }
    }

    object
}

/// One column field reading from the parent [`Record`].
fn column_field(column: &ColumnEntry) -> Field {
    let ty = output_type_ref(&column.type_descriptor, column.is_nullable);
    let name = column.name.clone();
    let mut field = Field::new(column.name.clone(), ty, move |ctx| {
        let name = name.clone();
        FieldFuture::new(async move {
            let record = ctx.parent_value.try_downcast_ref::<Record>()?;
            match record.get(&name) {
                Some(Value::Null) | None => Ok(None),
                Some(v) => Ok(Some(FieldValue::value(v.clone()))),
            }
        })
    });
    if matches!(column.type_descriptor.as_scalar(), Some(ScalarKind::Int64)) {
        field = field.description("64-bit integer");
    }
    field
}

fn table_filter_input(table: &TableEntry) -> InputObject {
    let name = naming::filter_input(&table.name);
    let mut input = InputObject::new(name.clone());
    for column in &table.columns {
        input = input.field(InputValue::new(
            column.name.clone(),
            TypeRef::named(filter_type_name(&column.type_descriptor)),
        ));
    }
    input.field(InputValue::new("or", TypeRef::named_nn_list(name)))
}

fn order_by_input(table: &TableEntry) -> InputObject {
    let mut input = InputObject::new(naming::order_by_input(&table.name));
    for column in &table.columns {
        input = input.field(InputValue::new(
            column.name.clone(),
            TypeRef::named("OrderDirection"),
        ));
    }
    input
}

fn edge_object(table: &TableEntry) -> Object {
    let node_type = naming::type_name(&table.name);
    Object::new(naming::edge_type(&table.name))
        .field(Field::new("cursor", TypeRef::named(TypeRef::STRING), move |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<crate::fetch::Edge>()?;
                Ok(edge
                    .cursor
                    .clone()
                    .map(|c| FieldValue::value(Value::String(c))))
            })
        }))
        .field(Field::new("node", TypeRef::named(node_type), move |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<crate::fetch::Edge>()?;
                Ok(Some(FieldValue::owned_any(edge.node.clone())))
            })
        }))
}

fn connection_object(table: &TableEntry) -> Object {
    let edge_type = naming::edge_type(&table.name);
    Object::new(naming::connection_type(&table.name))
        .field(Field::new(
            "edges",
            TypeRef::named_nn_list_nn(edge_type),
            move |ctx| {
                FieldFuture::new(async move {
                    let page = ctx.parent_value.try_downcast_ref::<ConnectionPage>()?;
                    Ok(Some(FieldValue::list(
                        page.edges.iter().cloned().map(FieldValue::owned_any),
                    )))
                })
            },
        ))
        .field(Field::new("pageInfo", TypeRef::named_nn("PageInfo"), move |ctx| {
            FieldFuture::new(async move {
                let page = ctx.parent_value.try_downcast_ref::<ConnectionPage>()?;
                Ok(Some(FieldValue::owned_any(page.clone())))
            })
        }))
        .field(Field::new("totalCount", TypeRef::named_nn(TypeRef::INT), move |ctx| {
            FieldFuture::new(async move {
                let page = ctx.parent_value.try_downcast_ref::<ConnectionPage>()?;
                Ok(Some(FieldValue::value(Value::from(page.total_count))))
            })
        }))
}

/// Required iff non-nullable and neither a primary key (often serial) nor
/// an auto-filled timestamp/date column.
fn create_field_required(column: &ColumnEntry) -> bool {
    if column.is_nullable || column.is_primary_key {
        return false;
    }
    !matches!(
        column.type_descriptor.as_scalar(),
        Some(ScalarKind::Timestamp | ScalarKind::TimestampTz | ScalarKind::Date)
    )
}

fn input_type_ref(column: &ColumnEntry, required: bool) -> TypeRef {
    // Composite inputs travel as JSON and are populated server-side.
    if column.type_descriptor.is_composite() {
        return if required {
            TypeRef::named_nn(JSON_SCALAR)
        } else {
            TypeRef::named(JSON_SCALAR)
        };
    }
    output_type_ref(&column.type_descriptor, !required)
}

fn create_input_object(filtered: &FilteredModel, table: &TableEntry) -> InputObject {
    let mut input = InputObject::new(naming::create_input(&table.name));
    for column in &table.columns {
        if !filtered.column_capabilities(&table.name, &column.name).can_insert {
            continue;
        }
        input = input.field(InputValue::new(
            column.name.clone(),
            input_type_ref(column, create_field_required(column)),
        ));
    }
    input
}

fn update_input_object(filtered: &FilteredModel, table: &TableEntry) -> InputObject {
    let mut input = InputObject::new(naming::update_input(&table.name));
    for column in &table.columns {
        let caps = filtered.column_capabilities(&table.name, &column.name);
        if !column.is_primary_key && !caps.can_update {
            continue;
        }
        input = input.field(InputValue::new(
            column.name.clone(),
            input_type_ref(column, column.is_primary_key),
        ));
    }
    input
}

fn connect_input_object(table: &TableEntry) -> InputObject {
    let mut input = InputObject::new(naming::connect_input(&table.name));
    let pk: Vec<_> = table.primary_key_columns();
    if pk.is_empty() {
        // Connectable by any column value; fall back to every column.
        for column in &table.columns {
            input = input.field(InputValue::new(
                column.name.clone(),
                input_type_ref(column, false),
            ));
        }
    } else {
        for column in pk {
            input = input.field(InputValue::new(
                column.name.clone(),
                input_type_ref(column, false),
            ));
        }
    }
    input
}

fn relationship_input_object(
    filtered: &FilteredModel,
    model: &DatabaseModel,
    table: &TableEntry,
) -> InputObject {
    let mut input = InputObject::new(naming::relationship_input(&table.name));
    let fk_columns: BTreeSet<&str> =
        table.foreign_keys.iter().map(|fk| fk.column.as_str()).collect();

    for column in &table.columns {
        if !filtered.column_capabilities(&table.name, &column.name).can_insert {
            continue;
        }
        // FK columns may be satisfied by connect/create, so never required.
        let required = create_field_required(column) && !fk_columns.contains(column.name.as_str());
        input = input.field(InputValue::new(
            column.name.clone(),
            input_type_ref(column, required),
        ));
    }

    for fk in &table.foreign_keys {
        let Some(target) = model.table(&fk.referenced_table) else {
            continue;
        };
        if target.is_view {
            continue;
        }
        input = input.field(InputValue::new(
            format!("{}_connect", fk.referenced_table),
            TypeRef::named(naming::connect_input(&fk.referenced_table)),
        ));
        // Nested creation needs the target's create input to exist.
        if filtered.capabilities(&fk.referenced_table).can_create {
            input = input.field(InputValue::new(
                format!("{}_create", fk.referenced_table),
                TypeRef::named(naming::create_input(&fk.referenced_table)),
            ));
        }
    }

    for (child_name, child) in &model.tables {
        if child.is_view || !filtered.capabilities(child_name).can_create {
            continue;
        }
        if child.foreign_keys.iter().any(|fk| fk.referenced_table == table.name) {
            input = input.field(InputValue::new(
                format!("{}_createMany", naming::plural(child_name)),
                TypeRef::named_nn_list(naming::create_input(child_name)),
            ));
        }
    }

    input
}

// ---------------------------------------------------------------------------
// Roots
// ---------------------------------------------------------------------------

fn query_root(filtered: &FilteredModel) -> Object {
    let mut query = Object::new("Query");
    let mut any_field = false;

    for (name, table) in &filtered.model.tables {
        if !filtered.capabilities(name).can_query {
            continue;
        }
        any_field = true;
        query = query
            .field(list_query_field(table))
            .field(connection_query_field(table));
    }

    if !any_field {
        query = query.field(health_field());
    }
    query
}

fn health_field() -> Field {
    Field::new("health", TypeRef::named(TypeRef::STRING), |_| {
        FieldFuture::new(async move { Ok(Some(FieldValue::value(Value::String("ok".into())))) })
    })
}

/// `t(where, orderBy, limit, offset): [T!]!`
fn list_query_field(table: &TableEntry) -> Field {
    let table_name = table.name.clone();
    let field = Field::new(
        naming::root_field(&table.name),
        TypeRef::named_nn_list_nn(naming::type_name(&table.name)),
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let shared = ctx.data::<Arc<GqlContext>>()?;
                let loader = ctx.data::<Arc<BatchLoader>>()?;
                let role = ctx.data::<RequestRole>()?.clone();
                let table = shared.model.table(&table_name).ok_or_else(|| {
                    async_graphql::Error::new(format!("unknown table {table_name}"))
                })?;

                let args = ctx.args.as_index_map();
                let fetch = fetch_args(&args);
                let records =
                    shared.fetcher.resolve_table(role.as_deref(), table, &fetch).await.map_err(ApiError::into_graphql_error)?;

                let selected: BTreeSet<String> =
                    ctx.field().selection_set().map(|f| f.name().to_string()).collect();
                let requests = relationship_requests(&shared.model, table, &selected);
                shared
                    .fetcher
                    .preload_relationships(
                        role.as_deref(),
                        &shared.model,
                        table,
                        &records,
                        &requests,
                        loader,
                    )
                    .await.map_err(ApiError::into_graphql_error)?;

                Ok(Some(FieldValue::list(
                    records.into_iter().map(FieldValue::owned_any),
                )))
            })
        },
    );
    field
        .argument(InputValue::new("where", TypeRef::named(naming::filter_input(&table.name))))
        .argument(InputValue::new(
            "orderBy",
            TypeRef::named(naming::order_by_input(&table.name)),
        ))
        .argument(InputValue::new("limit", TypeRef::named(TypeRef::INT)))
        .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)))
}

/// `tConnection(where, orderBy, first, after, last, before, offset)`
fn connection_query_field(table: &TableEntry) -> Field {
    let table_name = table.name.clone();
    let field = Field::new(
        naming::connection_field(&table.name),
        TypeRef::named_nn(naming::connection_type(&table.name)),
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let shared = ctx.data::<Arc<GqlContext>>()?;
                let loader = ctx.data::<Arc<BatchLoader>>()?;
                let role = ctx.data::<RequestRole>()?.clone();
                let table = shared.model.table(&table_name).ok_or_else(|| {
                    async_graphql::Error::new(format!("unknown table {table_name}"))
                })?;

                let args = ctx.args.as_index_map();
                let conn_args = connection_args(&args);
                let page = shared
                    .fetcher
                    .resolve_connection(role.as_deref(), table, &conn_args)
                    .await.map_err(ApiError::into_graphql_error)?;

                // Relationship preloads look through edges → node.
                let mut selected = BTreeSet::new();
                for field in ctx.field().selection_set() {
                    if field.name() == "edges" {
                        for edge_field in field.selection_set() {
                            if edge_field.name() == "node" {
                                selected.extend(
                                    edge_field.selection_set().map(|f| f.name().to_string()),
                                );
                            }
                        }
                    }
                }
                let requests = relationship_requests(&shared.model, table, &selected);
                let nodes: Vec<Record> =
                    page.edges.iter().map(|e| e.node.clone()).collect();
                shared
                    .fetcher
                    .preload_relationships(
                        role.as_deref(),
                        &shared.model,
                        table,
                        &nodes,
                        &requests,
                        loader,
                    )
                    .await.map_err(ApiError::into_graphql_error)?;

                Ok(Some(FieldValue::owned_any(page)))
            })
        },
    );
    field
        .argument(InputValue::new("where", TypeRef::named(naming::filter_input(&table.name))))
        .argument(InputValue::new(
            "orderBy",
            TypeRef::named(naming::order_by_input(&table.name)),
        ))
        .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
        .argument(InputValue::new("after", TypeRef::named(TypeRef::STRING)))
        .argument(InputValue::new("last", TypeRef::named(TypeRef::INT)))
        .argument(InputValue::new("before", TypeRef::named(TypeRef::STRING)))
        .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)))
}

fn mutation_root(filtered: &FilteredModel) -> Object {
    let mut mutation = Object::new("Mutation");

    for (name, table) in &filtered.model.tables {
        let caps = filtered.capabilities(name);
        if table.is_view {
            continue;
        }
        if caps.can_create {
            mutation = mutation
                .field(create_mutation_field(table))
                .field(create_many_mutation_field(table))
                .field(create_with_relations_field(table));
        }
        if caps.can_update {
            mutation = mutation.field(update_mutation_field(table));
        }
        if caps.can_delete {
            mutation = mutation.field(delete_mutation_field(table));
        }
    }

    mutation
}

fn create_mutation_field(table: &TableEntry) -> Field {
    let table_name = table.name.clone();
    Field::new(
        naming::create_field(&table.name),
        TypeRef::named_nn(naming::type_name(&table.name)),
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let shared = ctx.data::<Arc<GqlContext>>()?;
                let role = ctx.data::<RequestRole>()?.clone();
                let table = shared.model.table(&table_name).ok_or_else(|| {
                    async_graphql::Error::new(format!("unknown table {table_name}"))
                })?;
                let args = ctx.args.as_index_map();
                let input = arg_value(&args, "input")
                    .ok_or_else(|| async_graphql::Error::new("input is required"))?;
                let record = shared.mutator.create(role.as_deref(), table, &input).await.map_err(ApiError::into_graphql_error)?;
                Ok(Some(FieldValue::owned_any(record)))
            })
        },
    )
    .argument(InputValue::new(
        "input",
        TypeRef::named_nn(naming::create_input(&table.name)),
    ))
}

fn update_mutation_field(table: &TableEntry) -> Field {
    let table_name = table.name.clone();
    Field::new(
        naming::update_field(&table.name),
        TypeRef::named_nn(naming::type_name(&table.name)),
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let shared = ctx.data::<Arc<GqlContext>>()?;
                let role = ctx.data::<RequestRole>()?.clone();
                let table = shared.model.table(&table_name).ok_or_else(|| {
                    async_graphql::Error::new(format!("unknown table {table_name}"))
                })?;
                let args = ctx.args.as_index_map();
                let input = arg_value(&args, "input")
                    .ok_or_else(|| async_graphql::Error::new("input is required"))?;
                let record = shared.mutator.update(role.as_deref(), table, &input).await.map_err(ApiError::into_graphql_error)?;
                Ok(Some(FieldValue::owned_any(record)))
            })
        },
    )
    .argument(InputValue::new(
        "input",
        TypeRef::named_nn(naming::update_input(&table.name)),
    ))
}

fn delete_mutation_field(table: &TableEntry) -> Field {
    let table_name = table.name.clone();
    let id_type = table
        .primary_key_columns()
        .first()
        .map(|pk| scalar_type_name(pk.type_descriptor.as_scalar().unwrap_or(&ScalarKind::Text)))
        .unwrap_or(TypeRef::ID);
    Field::new(
        naming::delete_field(&table.name),
        TypeRef::named_nn(TypeRef::BOOLEAN),
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let shared = ctx.data::<Arc<GqlContext>>()?;
                let role = ctx.data::<RequestRole>()?.clone();
                let table = shared.model.table(&table_name).ok_or_else(|| {
                    async_graphql::Error::new(format!("unknown table {table_name}"))
                })?;
                let args = ctx.args.as_index_map();
                let id = arg_value(&args, "id")
                    .ok_or_else(|| async_graphql::Error::new("id is required"))?;
                let affected = shared.mutator.delete(role.as_deref(), table, &id).await.map_err(ApiError::into_graphql_error)?;
                Ok(Some(FieldValue::value(Value::Boolean(affected))))
            })
        },
    )
    .argument(InputValue::new("id", TypeRef::named_nn(id_type)))
}

fn create_many_mutation_field(table: &TableEntry) -> Field {
    let table_name = table.name.clone();
    Field::new(
        naming::create_many_field(&table.name),
        TypeRef::named_nn_list_nn(naming::type_name(&table.name)),
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let shared = ctx.data::<Arc<GqlContext>>()?;
                let role = ctx.data::<RequestRole>()?.clone();
                let table = shared.model.table(&table_name).ok_or_else(|| {
                    async_graphql::Error::new(format!("unknown table {table_name}"))
                })?;
                let args = ctx.args.as_index_map();
                let inputs = match arg_value(&args, "inputs") {
                    Some(Value::List(items)) => items,
                    _ => return Err(async_graphql::Error::new("inputs must be a list")),
                };
                let records =
                    shared.mutator.bulk_create(role.as_deref(), table, &inputs).await.map_err(ApiError::into_graphql_error)?;
                Ok(Some(FieldValue::list(
                    records.into_iter().map(FieldValue::owned_any),
                )))
            })
        },
    )
    .argument(InputValue::new(
        "inputs",
        TypeRef::named_nn_list_nn(naming::create_input(&table.name)),
    ))
}

fn create_with_relations_field(table: &TableEntry) -> Field {
    let table_name = table.name.clone();
    Field::new(
        naming::create_with_relations_field(&table.name),
        TypeRef::named_nn(naming::type_name(&table.name)),
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let shared = ctx.data::<Arc<GqlContext>>()?;
                let role = ctx.data::<RequestRole>()?.clone();
                let table = shared.model.table(&table_name).ok_or_else(|| {
                    async_graphql::Error::new(format!("unknown table {table_name}"))
                })?;
                let args = ctx.args.as_index_map();
                let input = arg_value(&args, "input")
                    .ok_or_else(|| async_graphql::Error::new("input is required"))?;
                let record = shared
                    .mutator
                    .create_with_relationships(role.as_deref(), &shared.model, table, &input)
                    .await.map_err(ApiError::into_graphql_error)?;
                Ok(Some(FieldValue::owned_any(record)))
            })
        },
    )
    .argument(InputValue::new(
        "input",
        TypeRef::named_nn(naming::relationship_input(&table.name)),
    ))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

fn change_operation_enum(table: &TableEntry) -> Enum {
    Enum::new(naming::change_operation_enum(&table.name))
        .item("INSERT")
        .item("UPDATE")
        .item("DELETE")
        .item("ERROR")
}

fn subscription_data_object(table: &TableEntry) -> Object {
    let type_name = naming::subscription_data_type(&table.name);
    let mut object = Object::new(type_name.clone());

    for column in &table.columns {
        let name = column.name.clone();
        // Every mirror field is nullable regardless of the column.
        let ty = output_type_ref(&column.type_descriptor, true);
        object = object.field(Field::new(column.name.clone(), ty, move |ctx| {
            let name = name.clone();
            FieldFuture::new(async move {
                let payload = ctx.parent_value.try_downcast_ref::<SubscriptionPayload>()?;
                match payload.current.get(&name) {
                    Some(Value::Null) | None => Ok(None),
                    Some(v) => Ok(Some(FieldValue::value(v.clone()))),
                }
            })
        }));
    }

    let mirror = |field_name: &'static str,
                  mirror_type: String,
                  extract: fn(&SubscriptionPayload) -> Option<Record>| {
        Field::new(field_name, TypeRef::named(mirror_type), move |ctx| {
            FieldFuture::new(async move {
                let payload = ctx.parent_value.try_downcast_ref::<SubscriptionPayload>()?;
                Ok(extract(payload).map(|record| {
                    FieldValue::owned_any(SubscriptionPayload {
                        current: record,
                        old: None,
                        new: None,
                    })
                }))
            })
        })
    };
    object = object.field(mirror("old", type_name.clone(), |p| p.old.clone()));
    object = object.field(mirror("new", type_name, |p| p.new.clone()));

    object
}

fn change_event_object(table: &TableEntry) -> Object {
    let op_enum = naming::change_operation_enum(&table.name);
    let data_type = naming::subscription_data_type(&table.name);
    Object::new(naming::change_event_type(&table.name))
        .field(Field::new("operation", TypeRef::named_nn(op_enum), move |ctx| {
            FieldFuture::new(async move {
                let event = ctx.parent_value.try_downcast_ref::<ChangeEvent>()?;
                Ok(Some(FieldValue::value(Value::Enum(Name::new(event.op.as_str())))))
            })
        }))
        .field(Field::new("table", TypeRef::named(TypeRef::STRING), move |ctx| {
            FieldFuture::new(async move {
                let event = ctx.parent_value.try_downcast_ref::<ChangeEvent>()?;
                Ok(Some(FieldValue::value(Value::String(event.table.clone()))))
            })
        }))
        .field(Field::new("timestamp", TypeRef::named(TypeRef::STRING), move |ctx| {
            FieldFuture::new(async move {
                let event = ctx.parent_value.try_downcast_ref::<ChangeEvent>()?;
                Ok(Some(FieldValue::value(Value::String(event.timestamp.to_rfc3339()))))
            })
        }))
        .field(Field::new("data", TypeRef::named(data_type), move |ctx| {
            FieldFuture::new(async move {
                let event = ctx.parent_value.try_downcast_ref::<ChangeEvent>()?;
                Ok(Some(FieldValue::owned_any(SubscriptionPayload {
                    current: event.data.clone(),
                    old: event.old.clone(),
                    new: event.new.clone(),
                })))
            })
        }))
}

fn subscription_root(model: &DatabaseModel) -> SubscriptionRoot {
    let mut root = SubscriptionRoot::new("Subscription");
    let mut any_field = false;

    for (name, table) in &model.tables {
        any_field = true;
        let table_name = name.clone();
        let event_type = naming::change_event_type(&table.name);
        root = root.field(
            SubscriptionField::new(
                naming::changes_field(&table.name),
                TypeRef::named_nn(event_type),
                move |ctx| {
                    let table_name = table_name.clone();
                    SubscriptionFieldFuture::new(async move {
                        let broker = ctx.data::<Arc<ChangeBroker>>()?;
                        let rx = broker.subscribe();
                        let stream = BroadcastStream::new(rx)
                            .filter_map(|item| async move { item.ok() })
                            .filter(move |event: &ChangeEvent| {
                                let keep = event.table == table_name;
                                async move { keep }
                            })
                            .map(|event| {
                                async_graphql::Result::Ok(FieldValue::owned_any(event))
                            });
                        Ok(stream)
                    })
                },
            )
            .description(
                "Row changes applied through this server; changes made \
                 outside this process are not observed.",
            ),
        );
    }

    if !any_field {
        root = root.field(SubscriptionField::new(
            "health",
            TypeRef::named(TypeRef::STRING),
            |_| {
                SubscriptionFieldFuture::new(async move {
                    let stream = futures::stream::once(async {
                        async_graphql::Result::Ok(FieldValue::value(Value::String("ok".into())))
                    });
                    Ok(stream)
                })
            },
        ));
    }

    root
}

// ---------------------------------------------------------------------------
// Per-role schema service
// ---------------------------------------------------------------------------

/// Cache key for the unfiltered golden schema.
const FULL_SCHEMA_KEY: &str = "\u{0}__full__";

/// Builds and caches one compiled GraphQL schema per role (C7 cache).
pub struct SchemaService {
    golden: FullSchemaService,
    privileges: RolePrivilegeService,
    schemas: TtlCache<String, Schema>,
    fetcher: DataFetcher,
    mutator: Mutator,
    broker: Arc<ChangeBroker>,
    config: Arc<Config>,
}

impl SchemaService {
    pub fn new(
        golden: FullSchemaService,
        privileges: RolePrivilegeService,
        fetcher: DataFetcher,
        mutator: Mutator,
        broker: Arc<ChangeBroker>,
        config: Arc<Config>,
    ) -> Self {
        let ttl = config.schema_ttl();
        Self {
            golden,
            privileges,
            schemas: TtlCache::new(ttl),
            fetcher,
            mutator,
            broker,
            config,
        }
    }

    /// The compiled schema serving `role`, together with the effective role
    /// that chose it. With role-based schemas off (or no role supplied) the
    /// golden schema is served and the effective role is `None`; callers
    /// must apply exactly that role on the connection, never the raw
    /// request value.
    pub async fn schema_for_role(
        &self,
        role: Option<&str>,
    ) -> ApiResult<(Schema, Option<String>)> {
        let effective = match role {
            Some(r) if self.config.role_based_schema && !r.is_empty() => Some(r.to_string()),
            _ => None,
        };
        let key = effective.clone().unwrap_or_else(|| FULL_SCHEMA_KEY.to_string());

        let schema = self
            .schemas
            .compute_if_absent(key, || async {
                let golden = self.golden.get_full().await?;
                let privileges = match &effective {
                    Some(role) => (*self.privileges.get(role).await?).clone(),
                    None => RolePrivileges::superuser("postgres"),
                };
                let filtered = filter_model(&golden, &privileges);
                let schema = self.build(&filtered)?;
                tracing::info!(
                    role = effective.as_deref().unwrap_or("<full>"),
                    tables = filtered.model.tables.len(),
                    "compiled GraphQL schema"
                );
                Ok(Some(schema))
            })
            .await?;
        let schema = schema
            .ok_or_else(|| ApiError::Internal("schema generation yielded nothing".into()))?;
        Ok((schema, effective))
    }

    fn build(&self, filtered: &FilteredModel) -> ApiResult<Schema> {
        let shared = Arc::new(GqlContext {
            model: Arc::new(filtered.model.clone()),
            fetcher: self.fetcher.clone(),
            mutator: self.mutator.clone(),
        });
        generate_schema(filtered, shared, self.broker.clone())
    }

    /// Drop the cached schema for one role; the golden model itself stays.
    pub async fn invalidate_role(&self, role: &str) {
        self.privileges.invalidate(role).await;
        self.schemas.remove(&role.to_string()).await;
    }

    /// Drop everything derived: golden model, privileges and compiled
    /// schemas all refresh on next use.
    pub async fn clear(&self) {
        self.golden.clear().await;
        self.privileges.clear();
        self.schemas.clear();
    }

    pub async fn cache_stats(&self) -> crate::cache::CacheStats {
        self.schemas.stats().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
