use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use reqwest::Method as RMethod;
use uuid::Uuid;

use common::api_error::ApiError;
use common::constants::{CONTENT_JSON, DL_ABORT, DL_REMOVE, QPARAM_UUID, ROUTE_DOWNLOAD};
use common::schemas::{
    DlAdminBody, DlJobInfo, DlJobMap, DlPostResp, DlStatusResp, ACCESS_DOWNLOAD,
};
use common::url_utils::url_path;

use crate::core::bcast::{bcast_group, drain_call_results, gather, BcastArgs};
use crate::core::ic::{redirect_to_ic, register_equal};
use crate::core::notifs::NotifListener;
use crate::core::state::GatewayState;
use crate::routes::{check_access, path_and_query};

/// Local fast path: when this proxy holds the listener and only active
/// tasks are wanted, the answer comes from the in-process snapshots with
/// no broadcast at all.
fn status_from_listener(state: &GatewayState, id: &str) -> Option<DlStatusResp> {
    let stats = state.notifs.query_stats(id)?;
    let mut resp: Option<DlStatusResp> = None;
    for snapshot in stats {
        let status: DlStatusResp = serde_json::from_value(snapshot).unwrap_or_default();
        resp = Some(match resp {
            None => status,
            Some(acc) => acc.aggregate(&status),
        });
    }
    resp
}

async fn bcast_download_admin(
    state: &GatewayState,
    method: RMethod,
    path: &str,
    payload: &DlAdminBody,
) -> Result<(Vec<u8>, StatusCode), ApiError> {
    if !payload.id.is_empty() && method == RMethod::GET && payload.only_active {
        if let Some(resp) = status_from_listener(state, &payload.id) {
            let body = serde_json::to_vec(&resp).expect("serializable status");
            return Ok((body, StatusCode::OK));
        }
    }

    let smap = state.owners.smap.get();
    let mut args = BcastArgs::to_targets(&state.me, path, state.config.max_host_busy);
    args.method = method.clone();
    args.body = Some(serde_json::to_vec(payload).expect("serializable admin body"));
    let valid = gather(bcast_group(&state.client, &smap, args)).await?;
    if valid.is_empty() {
        return Err(ApiError::BadRequest("no registered targets".to_string()));
    }

    match method {
        RMethod::GET if payload.id.is_empty() => {
            // Merge per-target {job id -> info} maps.
            let mut aggregate = DlJobMap::new();
            for res in &valid {
                let parsed: DlJobMap = res.parse()?;
                for (k, v) in parsed {
                    let merged = match aggregate.remove(&k) {
                        Some(old) => v.aggregate(&old),
                        None => v,
                    };
                    aggregate.insert(k, merged);
                }
            }
            let jobs: Vec<&DlJobInfo> = aggregate.values().collect();
            let body = serde_json::to_vec(&jobs).expect("serializable job list");
            Ok((body, StatusCode::OK))
        }
        RMethod::GET => {
            let mut resp: Option<DlStatusResp> = None;
            for res in &valid {
                let status: DlStatusResp = res.parse()?;
                resp = Some(match resp {
                    None => status,
                    Some(acc) => acc.aggregate(&status),
                });
            }
            let body =
                serde_json::to_vec(&resp.unwrap_or_default()).expect("serializable status");
            Ok((body, StatusCode::OK))
        }
        RMethod::DELETE => {
            // abort/remove: the first successful response wins.
            let res = &valid[0];
            let status =
                StatusCode::from_u16(res.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok((res.bytes.clone(), status))
        }
        other => Err(ApiError::Any(anyhow::anyhow!("unexpected method {}", other))),
    }
}

fn admin_response(body: Vec<u8>, status: StatusCode) -> Response {
    (status, [(header::CONTENT_TYPE, CONTENT_JSON)], body).into_response()
}

/// GET /v1/download?id=...: job list or per-job status.
#[tracing::instrument(name = "download.get", skip(state, headers, body))]
pub async fn get_download(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    check_access(&state, &headers, None, ACCESS_DOWNLOAD)?;
    let payload = parse_admin_body(&uri, &body)?;
    if !payload.id.is_empty() {
        if let Some(resp) =
            redirect_to_ic(&state, Method::GET, &path_and_query(&uri), &headers, body).await?
        {
            return Ok(resp);
        }
    }
    let (bytes, status) =
        bcast_download_admin(&state, RMethod::GET, &url_path(&[ROUTE_DOWNLOAD]), &payload).await?;
    Ok(admin_response(bytes, status))
}

/// DELETE /v1/download/{abort|remove}?id=...
#[tracing::instrument(name = "download.delete", skip(state, headers, body), fields(action = %action))]
pub async fn delete_download(
    Path(action): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    check_access(&state, &headers, None, ACCESS_DOWNLOAD)?;
    if action != DL_ABORT && action != DL_REMOVE {
        return Err(ApiError::BadRequest(format!(
            "invalid action {:?} (expected {} or {})",
            action, DL_ABORT, DL_REMOVE
        )));
    }
    let payload = parse_admin_body(&uri, &body)?;
    if payload.id.is_empty() {
        return Err(ApiError::BadRequest("missing download job id".to_string()));
    }
    if let Some(resp) =
        redirect_to_ic(&state, Method::DELETE, &path_and_query(&uri), &headers, body).await?
    {
        return Ok(resp);
    }
    let path = url_path(&[ROUTE_DOWNLOAD, &action]);
    let (bytes, status) = bcast_download_admin(&state, RMethod::DELETE, &path, &payload).await?;
    if action == DL_REMOVE {
        state.notifs.remove(&payload.id);
    }
    Ok(admin_response(bytes, status))
}

/// POST /v1/download: start a new download job on every target and register
/// an equal-ownership listener for it.
#[tracing::instrument(name = "download.post", skip(state, headers, body))]
pub async fn post_download(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    check_access(&state, &headers, None, ACCESS_DOWNLOAD)?;
    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        return Err(ApiError::BadRequest("cannot parse download request".to_string()));
    }

    let id = Uuid::new_v4().to_string();
    let smap = state.owners.smap.get();
    let mut args =
        BcastArgs::to_targets(&state.me, &url_path(&[ROUTE_DOWNLOAD]), state.config.max_host_busy);
    args.method = RMethod::POST;
    args.query = vec![(QPARAM_UUID.to_string(), id.clone())];
    args.body = Some(body.to_vec());
    let mut rx = bcast_group(&state.client, &smap, args);
    while let Some(res) = rx.recv().await {
        if !res.is_ok() {
            let err = res.to_api_error();
            drain_call_results(&mut rx).await;
            return Err(ApiError::Any(anyhow::anyhow!("error starting download: {}", err)));
        }
    }

    let nl = NotifListener::new(&id, "download", None, smap.version);
    register_equal(&state, nl).await?;
    Ok(axum::Json(DlPostResp { id }).into_response())
}

/// The admin body may arrive as JSON or as bare query parameters.
fn parse_admin_body(uri: &Uri, body: &[u8]) -> Result<DlAdminBody, ApiError> {
    if !body.is_empty() {
        return serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("cannot parse admin body: {}", e)));
    }
    Ok(DlAdminBody {
        id: crate::routes::query_param(uri, common::constants::QPARAM_ID).unwrap_or_default(),
        regex: String::new(),
        only_active: crate::routes::query_flag(uri, common::constants::QPARAM_ONLY_ACTIVE),
    })
}
