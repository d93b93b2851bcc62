use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use common::api_error::ApiError;

use crate::core::election::{handle_vote, VoteMsg};
use crate::core::state::GatewayState;

/// POST /v1/vote: vote requests and result announcements.
#[tracing::instrument(name = "vote.post", skip(state, msg))]
pub async fn post_vote(
    State(state): State<GatewayState>,
    Json(msg): Json<VoteMsg>,
) -> Result<Response, ApiError> {
    match handle_vote(&state, msg).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok(StatusCode::OK.into_response()),
    }
}
