use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use common::api_error::ApiError;
use common::constants::QPARAM_UUID;

use crate::core::ic::{redirect_to_ic, reverse_to_owner, IcMsg};
use crate::core::state::GatewayState;
use crate::routes::{path_and_query, query_param};

/// POST /v1/ic: listener registration mirror or a full ownership table.
#[tracing::instrument(name = "ic.post", skip(state, body))]
pub async fn post_ic(State(state): State<GatewayState>, body: Bytes) -> Result<Response, ApiError> {
    let msg: IcMsg = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("cannot parse ic message: {}", e)))?;
    match msg {
        IcMsg::Listen { nl } => {
            state.notifs.add(nl);
        }
        IcMsg::OwnershipTbl { table } => {
            state.notifs.merge_table(table);
        }
    }
    Ok(StatusCode::OK.into_response())
}

/// GET /v1/ic?uuid=: job status. Non-IC proxies relay to the council, IC
/// members relay to the listener's owner, the owner answers from its table.
#[tracing::instrument(name = "ic.get", skip(state, headers))]
pub async fn get_ic(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let uuid = query_param(&uri, QPARAM_UUID)
        .ok_or_else(|| ApiError::BadRequest("missing uuid parameter".to_string()))?;
    if let Some(resp) =
        redirect_to_ic(&state, Method::GET, &path_and_query(&uri), &headers, Bytes::new()).await?
    {
        return Ok(resp);
    }
    if let Some(resp) =
        reverse_to_owner(&state, &uuid, Method::GET, &path_and_query(&uri), &headers, Bytes::new())
            .await?
    {
        return Ok(resp);
    }
    match state.notifs.get(&uuid) {
        Some(nl) => Ok(axum::Json(nl).into_response()),
        None => Err(ApiError::NotFound(format!("job {} does not exist", uuid))),
    }
}
