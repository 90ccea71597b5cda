//! Single-document tools.
//!
//! Tools: get_document, set_document, delete_document, add_document

use serde_json::{json, Map, Value as JsonValue};

use crate::convert::{get_object_arg, get_optional_bool, get_string_arg};
use crate::error::{McpError, Result};
use crate::schema;
use crate::store::{collection_path, document_path, StoreConnector};
use crate::tools::ToolDef;

/// Get all document tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "get_document",
            "Get Document",
            "Retrieve a document from Firestore by its path. Returns {exists: false} when \
             nothing is stored there.",
            schema!(object {
                required: { "path": string = "Document path, e.g. users/alice" }
            }),
            schema!(object {
                required: { "exists": boolean },
                optional: { "data": object }
            }),
        ),
        ToolDef::new(
            "set_document",
            "Set Document",
            "Create or overwrite a document in Firestore. With merge=true only the given \
             fields are written and nested maps are merged.",
            schema!(object {
                required: {
                    "path": string = "Document path, e.g. users/alice",
                    "data": object = "Fields to write"
                },
                optional: {
                    "merge": boolean = "Merge into an existing document instead of replacing it"
                }
            }),
            schema!(object {
                required: { "success": boolean }
            }),
        ),
        ToolDef::new(
            "delete_document",
            "Delete Document",
            "Delete a document from Firestore. Deleting a missing document succeeds.",
            schema!(object {
                required: { "path": string = "Document path, e.g. users/alice" }
            }),
            schema!(object {
                required: { "success": boolean }
            }),
        ),
        ToolDef::new(
            "add_document",
            "Add Document",
            "Add a new document to a collection under a generated id. Returns the new id.",
            schema!(object {
                required: {
                    "collection": string = "Collection path, e.g. users or users/alice/posts",
                    "data": object = "Fields of the new document"
                }
            }),
            schema!(object {
                required: { "id": string }
            }),
        ),
    ]
}

/// Dispatch a document tool call.
pub async fn dispatch(
    store: &StoreConnector,
    name: &str,
    args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "get_document" => {
            let path = document_path(&get_string_arg(&args, "path")?)?;

            let doc = store.handle().await?.get(&path).await?;
            Ok(match doc {
                Some(data) => json!({ "exists": true, "data": data }),
                None => json!({ "exists": false }),
            })
        }

        "set_document" => {
            let path = document_path(&get_string_arg(&args, "path")?)?;
            let data = get_object_arg(&args, "data")?;
            let merge = get_optional_bool(&args, "merge").unwrap_or(false);

            store.handle().await?.set(&path, data, merge).await?;
            Ok(json!({ "success": true }))
        }

        "delete_document" => {
            let path = document_path(&get_string_arg(&args, "path")?)?;

            store.handle().await?.delete(&path).await?;
            Ok(json!({ "success": true }))
        }

        "add_document" => {
            let collection = collection_path(&get_string_arg(&args, "collection")?)?;
            let data = get_object_arg(&args, "data")?;

            let id = store.handle().await?.add(&collection, data).await?;
            tracing::debug!(collection = %collection, id = %id, "Added document");
            Ok(json!({ "id": id }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}
