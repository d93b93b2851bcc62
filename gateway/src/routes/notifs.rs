use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use common::api_error::ApiError;
use common::schemas::{NotifMsg, ACT_RENAME_BUCKET};

use crate::core::state::GatewayState;
use crate::routes::bucket::finish_pending_rename;

/// POST /v1/notifs: targets report job progress and completion here.
#[tracing::instrument(name = "notifs.post", skip(state, msg), fields(uuid = %msg.uuid, node = %msg.node_id))]
pub async fn post_notifs(
    State(state): State<GatewayState>,
    Json(msg): Json<NotifMsg>,
) -> Result<Response, ApiError> {
    if !state.notifs.update_progress(&msg) {
        return Err(ApiError::NotFound(format!("job {} does not exist", msg.uuid)));
    }
    let Some(nl) = state.notifs.get(&msg.uuid) else {
        return Ok(StatusCode::OK.into_response());
    };
    let expected = state.owners.smap.get().count_targets();
    if nl.all_finished(expected) {
        tracing::info!("job {} ({}) finished on all targets", nl.uuid, nl.action);
        if nl.action == ACT_RENAME_BUCKET {
            if let Some(bck) = &nl.bck {
                if state.is_primary() {
                    finish_pending_rename(&state, bck).await;
                }
            }
        }
    }
    Ok(StatusCode::OK.into_response())
}
