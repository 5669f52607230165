//! Query depth and complexity estimation.
//!
//! The executor enforces its own depth/complexity limits (configured at
//! schema build time); this walk mirrors the costing contract so requests
//! can be rejected before execution — important for the WebSocket path,
//! which builds requests outside the HTTP adapter.
//!
//! Costing: a scalar field costs 1, a field with a sub-selection costs 3,
//! each limit-like argument adds `min(value / 10, 20)`, and costs sum
//! across siblings and children.

use async_graphql::parser::types::{
    DocumentOperations, ExecutableDocument, Selection, SelectionSet,
};
use async_graphql::{Name, Value};
use std::collections::HashMap;

use crate::error::{ApiError, ApiResult};

const LIST_FIELD_COST: usize = 3;
const SCALAR_FIELD_COST: usize = 1;
const LIMIT_ARG_CAP: usize = 20;

/// Arguments treated as page-size hints.
const LIMIT_ARGS: [&str; 3] = ["limit", "first", "last"];

/// Reject a parsed document that exceeds either budget.
pub fn check_limits(
    doc: &ExecutableDocument,
    max_depth: usize,
    max_complexity: usize,
) -> ApiResult<()> {
    let depth = document_depth(doc);
    if depth > max_depth {
        return Err(ApiError::Validation(format!(
            "query depth {depth} exceeds the maximum of {max_depth}"
        )));
    }
    let complexity = document_complexity(doc);
    if complexity > max_complexity {
        return Err(ApiError::Validation(format!(
            "query complexity {complexity} exceeds the maximum of {max_complexity}"
        )));
    }
    Ok(())
}

type Fragments<'a> = HashMap<&'a str, &'a SelectionSet>;

fn fragments(doc: &ExecutableDocument) -> Fragments<'_> {
    doc.fragments
        .iter()
        .map(|(name, fragment)| (name.as_str(), &fragment.node.selection_set.node))
        .collect()
}

fn for_each_operation<'a>(
    doc: &'a ExecutableDocument,
    mut f: impl FnMut(&'a SelectionSet),
) {
    match &doc.operations {
        DocumentOperations::Single(op) => f(&op.node.selection_set.node),
        DocumentOperations::Multiple(ops) => {
            for op in ops.values() {
                f(&op.node.selection_set.node);
            }
        }
    }
}

/// Maximum selection-set nesting across the document's operations.
pub fn document_depth(doc: &ExecutableDocument) -> usize {
    let fragments = fragments(doc);
    let mut max = 0;
    for_each_operation(doc, |set| {
        max = max.max(set_depth(set, &fragments, 0));
    });
    max
}

fn set_depth(set: &SelectionSet, fragments: &Fragments<'_>, guard: usize) -> usize {
    if guard > 64 {
        // Cyclic fragment spreads are invalid GraphQL; stop counting.
        return 0;
    }
    set.items
        .iter()
        .map(|item| match &item.node {
            Selection::Field(field) => {
                let sub = &field.node.selection_set.node;
                if sub.items.is_empty() {
                    1
                } else {
                    1 + set_depth(sub, fragments, guard + 1)
                }
            }
            Selection::FragmentSpread(spread) => fragments
                .get(spread.node.fragment_name.node.as_str())
                .map(|set| set_depth(set, fragments, guard + 1))
                .unwrap_or(0),
            Selection::InlineFragment(inline) => {
                set_depth(&inline.node.selection_set.node, fragments, guard + 1)
            }
        })
        .max()
        .unwrap_or(0)
}

/// Total cost across the document's operations.
pub fn document_complexity(doc: &ExecutableDocument) -> usize {
    let fragments = fragments(doc);
    let mut total = 0;
    for_each_operation(doc, |set| {
        total += set_complexity(set, &fragments, 0);
    });
    total
}

fn set_complexity(set: &SelectionSet, fragments: &Fragments<'_>, guard: usize) -> usize {
    if guard > 64 {
        return 0;
    }
    set.items
        .iter()
        .map(|item| match &item.node {
            Selection::Field(field) => {
                let sub = &field.node.selection_set.node;
                let base = if sub.items.is_empty() { SCALAR_FIELD_COST } else { LIST_FIELD_COST };
                let args: usize = field
                    .node
                    .arguments
                    .iter()
                    .map(|(name, value)| {
                        limit_cost(&name.node, value.node.clone().into_const())
                    })
                    .sum();
                base + args + set_complexity(sub, fragments, guard + 1)
            }
            Selection::FragmentSpread(spread) => fragments
                .get(spread.node.fragment_name.node.as_str())
                .map(|set| set_complexity(set, fragments, guard + 1))
                .unwrap_or(0),
            Selection::InlineFragment(inline) => {
                set_complexity(&inline.node.selection_set.node, fragments, guard + 1)
            }
        })
        .sum()
}

fn limit_cost(name: &Name, value: Option<Value>) -> usize {
    if !LIMIT_ARGS.contains(&name.as_str()) {
        return 0;
    }
    match value {
        Some(Value::Number(n)) => {
            let v = n.as_i64().unwrap_or(0).max(0) as usize;
            (v / 10).min(LIMIT_ARG_CAP)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::parser::parse_query;

    #[test]
    fn scalar_fields_cost_one() {
        let doc = parse_query("{ a b c }").unwrap();
        assert_eq!(document_complexity(&doc), 3);
        assert_eq!(document_depth(&doc), 1);
    }

    #[test]
    fn nested_fields_cost_three_plus_children() {
        let doc = parse_query("{ customers { id name } }").unwrap();
        // customers = 3, id + name = 2
        assert_eq!(document_complexity(&doc), 5);
        assert_eq!(document_depth(&doc), 2);
    }

    #[test]
    fn limit_arguments_add_scaled_cost() {
        let doc = parse_query("{ customers(limit: 100) { id } }").unwrap();
        // 3 + min(100/10, 20) + 1
        assert_eq!(document_complexity(&doc), 14);

        let doc = parse_query("{ customers(first: 10000) { id } }").unwrap();
        assert_eq!(document_complexity(&doc), 24);
    }

    #[test]
    fn fragments_are_followed() {
        let doc = parse_query(
            "query { customers { ...cols } } fragment cols on Customer { id name }",
        )
        .unwrap();
        assert_eq!(document_complexity(&doc), 5);
        assert_eq!(document_depth(&doc), 2);
    }

    #[test]
    fn limits_are_enforced() {
        let doc = parse_query("{ a { b { c { d } } } }").unwrap();
        assert!(check_limits(&doc, 10, 1000).is_ok());
        let err = check_limits(&doc, 3, 1000).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let doc = parse_query("{ customers(limit: 200) { id } }").unwrap();
        let err = check_limits(&doc, 10, 10).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
