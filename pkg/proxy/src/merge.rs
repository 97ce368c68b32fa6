//! Merging per-namespace list responses into one list.

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::GatewayError;
use crate::gateway::ProxyResponse;

/// List returned when there is nothing to merge.
pub fn empty_list() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": {},
        "items": [],
    })
}

/// Merge `results`, given in namespace order.
///
/// - A transport failure or a non-2xx status other than 403 aborts the
///   whole merge.
/// - A 403 is skipped, unless it came from the only namespace attempted.
/// - Items are concatenated in namespace order. The envelope (`kind`,
///   `apiVersion`, `metadata`) comes from the first successful response.
pub fn merge_lists(
    results: Vec<(String, Result<ProxyResponse, GatewayError>)>,
) -> Result<Value, GatewayError> {
    let attempted = results.len();
    let mut envelope: Option<Map<String, Value>> = None;
    let mut items = Vec::new();

    for (namespace, result) in results {
        let response = result?;
        if response.status == 403 {
            if attempted == 1 {
                return Err(GatewayError::Forbidden(namespace));
            }
            warn!("Skipping namespace {}: forbidden", namespace);
            continue;
        }
        if !(200..300).contains(&response.status) {
            return Err(GatewayError::MergeAbort {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let mut list: Map<String, Value> = serde_json::from_slice(&response.body).map_err(|e| {
            GatewayError::Upstream(format!(
                "namespace {} returned an unreadable list: {}",
                namespace, e
            ))
        })?;
        if let Some(Value::Array(chunk)) = list.remove("items") {
            items.extend(chunk);
        }
        if envelope.is_none() {
            envelope = Some(list);
        }
    }

    let mut merged = match envelope {
        Some(envelope) => Value::Object(envelope),
        None => empty_list(),
    };
    merged["items"] = Value::Array(items);
    Ok(merged)
}
