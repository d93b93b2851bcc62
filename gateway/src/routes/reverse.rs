use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use common::api_error::ApiError;
use common::constants::{API_VERSION, HDR_NODE_ID, HDR_NODE_URL};

use crate::core::node::Net;
use crate::core::state::GatewayState;

/// ANY /v1/reverse/{path}: relay `/v1/<path>` to the node named by the
/// `x-node-id` header (or, for nodes already gone from the map, to an
/// explicit `x-node-url`).
#[tracing::instrument(name = "reverse.any", skip(state, headers, body), fields(rest = %rest))]
pub async fn any_reverse(
    Path(rest): Path<String>,
    State(state): State<GatewayState>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    let mut path = format!("/{}/{}", API_VERSION, rest);
    if let Some(q) = uri.query() {
        path.push('?');
        path.push_str(q);
    }

    if let Some(node_id) = headers.get(HDR_NODE_ID).and_then(|v| v.to_str().ok()) {
        let smap = state.owners.smap.get();
        let Some(node) = smap.get_node(node_id) else {
            return Err(ApiError::NodeNotFound {
                action: "reverse".to_string(),
                id: node_id.to_string(),
                self_id: state.me.id.clone(),
                smap_version: smap.version,
            });
        };
        return state
            .rproxy
            .reverse_to_node(node, Net::IntraControl, method, &path, &headers, body.to_vec())
            .await;
    }
    if let Some(node_url) = headers.get(HDR_NODE_URL).and_then(|v| v.to_str().ok()) {
        return state
            .rproxy
            .reverse_request(node_url, method, &path, &headers, body.to_vec())
            .await;
    }
    Err(ApiError::BadRequest(format!(
        "missing {} or {} header",
        HDR_NODE_ID, HDR_NODE_URL
    )))
}
