use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use common::api_error::ApiError;
use common::constants::{
    QPARAM_FORCE, QPARAM_PREPARE, QPARAM_PRIMARY_CANDIDATE, QPARAM_WHAT, WHAT_BMD, WHAT_RMD,
    WHAT_SMAP, WHAT_SNODE, WHAT_STATUS,
};

use crate::core::primary::{daemon_set_primary, forceful_join};
use crate::core::state::GatewayState;
use crate::routes::{query_flag, query_param};

#[derive(Serialize)]
struct DaemonStatus<'a> {
    node: &'a crate::core::node::Snode,
    smap_version: i64,
    bmd_version: i64,
    cluster_started: bool,
    is_primary: bool,
}

/// GET /v1/daemon?what=smap|bmd|rmd|snode|status
#[tracing::instrument(name = "daemon.get", skip(state))]
pub async fn get_daemon(State(state): State<GatewayState>, uri: Uri) -> Result<Response, ApiError> {
    let what = query_param(&uri, QPARAM_WHAT).unwrap_or_default();
    match what.as_str() {
        WHAT_SMAP => Ok(axum::Json(&*state.owners.smap.get()).into_response()),
        WHAT_BMD => Ok(axum::Json(&*state.owners.bmd.get()).into_response()),
        WHAT_RMD => Ok(axum::Json(&*state.owners.rmd.get()).into_response()),
        WHAT_SNODE => Ok(axum::Json(&*state.me).into_response()),
        WHAT_STATUS | "" => {
            let status = DaemonStatus {
                node: &state.me,
                smap_version: state.owners.smap.get().version,
                bmd_version: state.owners.bmd.get().version,
                cluster_started: state.cluster_started(),
                is_primary: state.is_primary(),
            };
            Ok(axum::Json(status).into_response())
        }
        other => Err(ApiError::BadRequest(format!("unexpected query [what={}]", other))),
    }
}

/// PUT /v1/daemon/proxy/{id}: the per-node half of a primary change, and
/// the forceful-rejoin entry point (`?force=true`).
#[tracing::instrument(name = "daemon.set_primary", skip(state), fields(proxy_id = %proxy_id))]
pub async fn put_daemon_proxy(
    Path(proxy_id): Path<String>,
    State(state): State<GatewayState>,
    uri: Uri,
) -> Result<Response, ApiError> {
    if query_flag(&uri, QPARAM_FORCE) {
        // Split-brain recovery: only a (stale) primary may be re-pointed.
        if !state.is_primary() {
            return Err(ApiError::BadRequest(format!("{} is not the primary", state.me)));
        }
        let candidate = query_param(&uri, QPARAM_PRIMARY_CANDIDATE).unwrap_or_default();
        forceful_join(&state, &proxy_id, &candidate).await?;
        return Ok(StatusCode::OK.into_response());
    }

    let prepare = match query_param(&uri, QPARAM_PREPARE).as_deref() {
        Some("true") => true,
        Some("false") => false,
        other => {
            return Err(ApiError::BadRequest(format!(
                "failed to parse prepare parameter: {:?}",
                other
            )))
        }
    };
    if state.is_primary() {
        return Err(ApiError::BadRequest(
            "expecting 'cluster' resource when designating primary via API".to_string(),
        ));
    }
    daemon_set_primary(&state, &proxy_id, prepare).await?;
    Ok(StatusCode::OK.into_response())
}

/// DELETE /v1/daemon/unregister: the primary told this node it is out.
#[tracing::instrument(name = "daemon.unregister", skip(state))]
pub async fn delete_daemon(State(state): State<GatewayState>) -> Result<Response, ApiError> {
    tracing::warn!("{}: unregistered by the primary", state.me);
    Ok(StatusCode::OK.into_response())
}
