use serde_json::Value;

use pkg_types::page::{Page, PageWindow};

use crate::error::GatewayError;

/// Slice a decoded list envelope's `items` to `window`.
pub fn paginate_value(mut list: Value, window: PageWindow) -> Page<Value> {
    let items = match list.get_mut("items").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    window.apply(items)
}

/// Decode `body` as a list envelope and re-encode the requested page.
pub fn paginate_body(body: &[u8], window: PageWindow) -> Result<Vec<u8>, GatewayError> {
    let list: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Upstream(format!("response is not a JSON list: {}", e)))?;
    serde_json::to_vec(&paginate_value(list, window))
        .map_err(|e| GatewayError::Upstream(e.to_string()))
}
