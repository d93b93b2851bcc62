use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use common::api_error::ApiError;
use common::constants::QPARAM_CLUSTER_INFO;
use common::schemas::ClusterInfo;

use crate::core::state::GatewayState;
use crate::routes::query_flag;

/// GET /v1/health: 503 until the cluster started; `?cluster-info=true`
/// returns version/uuid details for split-brain diagnostics.
pub async fn get_health(State(state): State<GatewayState>, uri: Uri) -> Result<Response, ApiError> {
    if query_flag(&uri, QPARAM_CLUSTER_INFO) {
        let smap = state.owners.smap.get();
        let bmd = state.owners.bmd.get();
        let cii = ClusterInfo {
            smap_version: smap.version,
            smap_uuid: smap.uuid.clone(),
            primary_url: smap.primary().map(|p| p.public.url.clone()).unwrap_or_default(),
            bmd_version: bmd.version,
            bmd_uuid: bmd.uuid.clone(),
        };
        return Ok(axum::Json(cii).into_response());
    }
    if !state.cluster_started() && !state.is_primary() {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }
    Ok(StatusCode::OK.into_response())
}
