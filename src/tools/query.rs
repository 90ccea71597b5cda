//! Collection query tool.
//!
//! Tools: query_collection

use serde_json::{json, Map, Value as JsonValue};

use crate::convert::{get_optional_u64, get_string_arg};
use crate::error::{McpError, Result};
use crate::schema;
use crate::store::{collection_path, Filter, FilterOp, Query, StoreConnector};
use crate::tools::ToolDef;

/// Get all query tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![ToolDef::new(
        "query_collection",
        "Query Collection",
        "Query a Firestore collection with filters. All filters must match. Returns the \
         matching documents, each tagged with its id.",
        schema!(object {
            required: {
                "collection": string = "The Firestore collection to query"
            },
            optional: {
                "filters": array_filter = "Array of filter objects with field, operator, and value",
                "limit": positive_integer = "Maximum number of documents to return"
            }
        }),
        schema!(object {
            required: { "documents": array_object }
        }),
    )]
}

/// Dispatch a query tool call.
pub async fn dispatch(
    store: &StoreConnector,
    name: &str,
    args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "query_collection" => {
            let query = Query {
                collection: collection_path(&get_string_arg(&args, "collection")?)?,
                filters: parse_filters(args.get("filters"))?,
                limit: get_optional_u64(&args, "limit"),
            };

            let docs = store.handle().await?.query(&query).await?;
            tracing::debug!(
                collection = %query.collection,
                filters = query.filters.len(),
                matched = docs.len(),
                "Queried collection"
            );
            let documents: Vec<JsonValue> = docs.into_iter().map(|d| d.into_tagged()).collect();
            Ok(json!({ "documents": documents }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

/// Turn the `filters` argument into typed conditions.
fn parse_filters(raw: Option<&JsonValue>) -> Result<Vec<Filter>> {
    let items = match raw {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items,
        Some(_) => {
            return Err(McpError::InvalidArg {
                name: "filters".to_string(),
                reason: "Expected an array".to_string(),
            })
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let field = item
                .get("field")
                .and_then(|f| f.as_str())
                .ok_or_else(|| McpError::MissingArg(format!("filters[{}].field", i)))?;
            let op_name = item
                .get("operator")
                .and_then(|o| o.as_str())
                .ok_or_else(|| McpError::MissingArg(format!("filters[{}].operator", i)))?;
            let op = FilterOp::parse(op_name).ok_or_else(|| McpError::InvalidArg {
                name: format!("filters[{}].operator", i),
                reason: format!("unsupported operator '{}'", op_name),
            })?;
            let value = item.get("value").cloned().unwrap_or(JsonValue::Null);
            if op.takes_list() && !value.is_array() {
                return Err(McpError::InvalidArg {
                    name: format!("filters[{}].value", i),
                    reason: format!("operator '{}' needs an array value", op_name),
                });
            }
            Ok(Filter {
                field: field.to_string(),
                op,
                value,
            })
        })
        .collect()
}
