//! Naming rules for the generated GraphQL surface.
//!
//! Tables keep their lower-cased name for root fields and get PascalCase
//! for type names. Plurals append `s` unless the name already ends in one.

/// `tv_shows` → `TvShows`, `customer` → `Customer`.
pub fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Root query field name for a table.
pub fn root_field(table: &str) -> String {
    table.to_lowercase()
}

/// Plural used for bulk and reverse-relationship field names.
pub fn plural(name: &str) -> String {
    if name.ends_with('s') {
        name.to_string()
    } else {
        format!("{name}s")
    }
}

pub fn type_name(table: &str) -> String {
    pascal_case(table)
}

pub fn connection_type(table: &str) -> String {
    format!("{}Connection", type_name(table))
}

pub fn edge_type(table: &str) -> String {
    format!("{}Edge", type_name(table))
}

pub fn filter_input(table: &str) -> String {
    format!("{}Filter", type_name(table))
}

pub fn order_by_input(table: &str) -> String {
    format!("{}OrderByInput", type_name(table))
}

pub fn create_input(table: &str) -> String {
    format!("{}CreateInput", type_name(table))
}

pub fn update_input(table: &str) -> String {
    format!("{}UpdateInput", type_name(table))
}

pub fn relationship_input(table: &str) -> String {
    format!("{}RelationshipInput", type_name(table))
}

pub fn connect_input(table: &str) -> String {
    format!("{}ConnectInput", type_name(table))
}

pub fn change_event_type(table: &str) -> String {
    format!("{}ChangeEvent", type_name(table))
}

pub fn change_operation_enum(table: &str) -> String {
    format!("{}ChangeOperation", type_name(table))
}

pub fn subscription_data_type(table: &str) -> String {
    format!("{}SubscriptionData", type_name(table))
}

pub fn connection_field(table: &str) -> String {
    format!("{}Connection", root_field(table))
}

pub fn create_field(table: &str) -> String {
    format!("create{}", type_name(table))
}

pub fn update_field(table: &str) -> String {
    format!("update{}", type_name(table))
}

pub fn delete_field(table: &str) -> String {
    format!("delete{}", type_name(table))
}

pub fn create_many_field(table: &str) -> String {
    format!("createMany{}", pascal_case(&plural(table)))
}

pub fn create_with_relations_field(table: &str) -> String {
    format!("create{}WithRelations", type_name(table))
}

pub fn changes_field(table: &str) -> String {
    format!("{}_changes", root_field(table))
}

/// Forward relationship field on the referencing table.
pub fn forward_relationship_field(referenced_table: &str) -> String {
    root_field(referenced_table)
}

/// Reverse relationship field on the referenced table.
pub fn reverse_relationship_field(referencing_table: &str) -> String {
    plural(&root_field(referencing_table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pascal_case_splits_on_underscores() {
        assert_eq!(pascal_case("customer"), "Customer");
        assert_eq!(pascal_case("tv_shows"), "TvShows");
        assert_eq!(pascal_case("rss_feed_item"), "RssFeedItem");
    }

    #[test]
    fn plural_appends_s_once() {
        assert_eq!(plural("customer"), "customers");
        assert_eq!(plural("address"), "address");
        assert_eq!(plural("payments"), "payments");
    }

    #[test]
    fn derived_names() {
        assert_eq!(connection_type("customer"), "CustomerConnection");
        assert_eq!(filter_input("customer"), "CustomerFilter");
        assert_eq!(create_many_field("customer"), "createManyCustomers");
        assert_eq!(create_with_relations_field("customer"), "createCustomerWithRelations");
        assert_eq!(changes_field("Customer"), "customer_changes");
        assert_eq!(connection_field("customer"), "customerConnection");
    }
}
