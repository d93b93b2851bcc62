use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use common::api_error::ApiError;
use common::schemas::{ActionMsg, ACT_REVOKE_TOKEN};

use crate::core::metasync::{RevsPair, KIND_TOKENS};
use crate::core::state::GatewayState;
use crate::routes::forward_cp;

#[derive(Deserialize)]
struct TokenMsg {
    token: String,
}

/// DELETE /v1/tokens: revoke a token cluster-wide.
#[tracing::instrument(name = "tokens.delete", skip(state, headers, body))]
pub async fn delete_token(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let msg: TokenMsg = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("cannot parse token message: {}", e)))?;
    if msg.token.is_empty() {
        return Err(ApiError::BadRequest("empty token".to_string()));
    }
    if let Some(resp) = forward_cp(&state, Method::DELETE, &uri, &headers, &body).await? {
        return Ok(resp);
    }
    let tokens = state.owners.tokens.revoke(&msg.token);
    let amsg = ActionMsg::new(ACT_REVOKE_TOKEN);
    let pairs = vec![(KIND_TOKENS.to_string(), RevsPair::new(tokens.version, &*tokens, &amsg))];
    state.metasync.sync(pairs).await?;
    Ok(StatusCode::OK.into_response())
}
