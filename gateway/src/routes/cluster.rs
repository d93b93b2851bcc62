use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use reqwest::Method as RMethod;

use common::api_error::ApiError;
use common::constants::{
    AUTO_REGISTER, KEEPALIVE, QPARAM_FORCE, QPARAM_NON_ELECTABLE, QPARAM_WHAT, ROUTE_CLUSTER,
    ROUTE_DAEMON, USER_REGISTER, WHAT_BMD, WHAT_RMD, WHAT_SMAP, WHAT_STATUS,
};
use common::schemas::{
    ActionMsg, ACT_REBALANCE, ACT_RECOVER_BMD, ACT_SEND_OWNERSHIP_TBL, ACT_SHUTDOWN,
    ACT_UNREG_PROXY, ACT_UNREG_TARGET, ACT_XACT_START, ACT_XACT_STOP,
};
use common::url_utils::url_path;

use crate::core::bcast::{bcast_group, gather, BcastArgs};
use crate::core::bmd::{resolve_uuid_bmd, resolve_uuid_bmd_force, Bmd};
use crate::core::ic::send_ownership_tbl;
use crate::core::membership::{
    handle_join_kalive, unregister_node, update_and_distribute, JoinReq, JoinVerdict, RegMeta,
};
use crate::core::metasync::{RevsPair, KIND_BMD, KIND_RMD};
use crate::core::primary::set_primary_two_phase;
use crate::core::state::GatewayState;
use crate::routes::{forward_cp, query_flag};

/// GET /v1/cluster?what=smap|bmd|rmd|status
#[tracing::instrument(name = "cluster.get", skip(state))]
pub async fn get_cluster(
    State(state): State<GatewayState>,
    uri: Uri,
) -> Result<Response, ApiError> {
    let what = crate::routes::query_param(&uri, QPARAM_WHAT).unwrap_or_default();
    match what.as_str() {
        WHAT_SMAP => Ok(axum::Json(&*state.owners.smap.get()).into_response()),
        WHAT_BMD => Ok(axum::Json(&*state.owners.bmd.get()).into_response()),
        WHAT_RMD => Ok(axum::Json(&*state.owners.rmd.get()).into_response()),
        WHAT_STATUS => {
            // Fan the daemon query out to every target; collect raw replies.
            let smap = state.owners.smap.get();
            let mut args = BcastArgs::to_targets(
                &state.me,
                &url_path(&[ROUTE_DAEMON]),
                state.config.max_host_busy,
            );
            args.query = vec![(QPARAM_WHAT.to_string(), WHAT_STATUS.to_string())];
            let results = gather(bcast_group(&state.client, &smap, args)).await?;
            let raw: Vec<serde_json::Value> = results
                .iter()
                .filter_map(|r| serde_json::from_slice(&r.bytes).ok())
                .collect();
            Ok(axum::Json(raw).into_response())
        }
        other => Err(ApiError::BadRequest(format!("unexpected query [what={}]", other))),
    }
}

/// POST /v1/cluster/{autoreg|keepalive|join}: join, keepalive, re-join.
#[tracing::instrument(name = "cluster.post", skip(state, headers, body), fields(tag = %tag))]
pub async fn post_cluster(
    Path(tag): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let keepalive = match tag.as_str() {
        AUTO_REGISTER | USER_REGISTER => false,
        KEEPALIVE => true,
        other => {
            return Err(ApiError::BadRequest(format!("invalid cluster route {:?}", other)))
        }
    };
    if let Some(resp) = forward_cp(&state, Method::POST, &uri, &headers, &body).await? {
        return Ok(resp);
    }
    let req: JoinReq = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("cannot parse join request: {}", e)))?;
    let non_electable = query_flag(&uri, QPARAM_NON_ELECTABLE);

    match handle_join_kalive(&state, &req, keepalive).await? {
        JoinVerdict::HeardFrom | JoinVerdict::NoOp => Ok(StatusCode::OK.into_response()),
        JoinVerdict::Update => {
            let is_target = req.node.is_target();
            // Self-registering targets get the current Smap and BMD back.
            let reply = if is_target && !keepalive {
                let meta = RegMeta {
                    smap: (*state.owners.smap.get()).clone(),
                    bmd: (*state.owners.bmd.get()).clone(),
                    reply_by: Some(state.me.id.clone()),
                };
                axum::Json(meta).into_response()
            } else {
                StatusCode::OK.into_response()
            };
            let st = state.clone();
            let nsi = req.node.clone();
            tokio::spawn(async move {
                update_and_distribute(&st, nsi, non_electable).await;
            });
            Ok(reply)
        }
    }
}

/// PUT /v1/cluster (JSON action): shutdown, rebalance, recover-buckets,
/// ownership-table push, xact start/stop.
#[tracing::instrument(name = "cluster.put", skip(state, headers, body))]
pub async fn put_cluster(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let msg: ActionMsg = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("cannot parse action message: {}", e)))?;
    match msg.action.as_str() {
        ACT_SHUTDOWN => {
            if let Some(resp) = forward_cp(&state, Method::PUT, &uri, &headers, &body).await? {
                return Ok(resp);
            }
            let smap = state.owners.smap.get();
            let mut args = BcastArgs::to_all(
                &state.me,
                &url_path(&[ROUTE_DAEMON]),
                state.config.cplane_timeout,
            );
            args.method = RMethod::PUT;
            args.body = Some(body.to_vec());
            let mut rx = bcast_group(&state.client, &smap, args);
            while rx.recv().await.is_some() {}
            Ok(StatusCode::OK.into_response())
        }
        ACT_REBALANCE => {
            if let Some(resp) = forward_cp(&state, Method::PUT, &uri, &headers, &body).await? {
                return Ok(resp);
            }
            let rmd = state.owners.rmd.modify(|r| r.target_ids = None);
            let pairs = vec![(KIND_RMD.to_string(), RevsPair::new(rmd.version, &*rmd, &msg))];
            state.metasync.sync(pairs).await?;
            Ok(StatusCode::OK.into_response())
        }
        ACT_RECOVER_BMD => recover_buckets(&state, &msg, &uri, &headers, &body).await,
        ACT_SEND_OWNERSHIP_TBL => {
            let dst_id = msg
                .value
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| msg.name.clone());
            let smap = state.owners.smap.get();
            let dst = smap.get_node(&dst_id).ok_or_else(|| ApiError::NodeNotFound {
                action: ACT_SEND_OWNERSHIP_TBL.to_string(),
                id: dst_id.clone(),
                self_id: state.me.id.clone(),
                smap_version: smap.version,
            })?;
            send_ownership_tbl(&state, dst).await?;
            Ok(StatusCode::OK.into_response())
        }
        ACT_XACT_START | ACT_XACT_STOP => {
            let smap = state.owners.smap.get();
            let mut args = BcastArgs::to_targets(
                &state.me,
                &url_path(&[ROUTE_CLUSTER]),
                state.config.long_timeout,
            );
            args.method = RMethod::PUT;
            args.body = Some(body.to_vec());
            gather(bcast_group(&state.client, &smap, args)).await?;
            Ok(StatusCode::OK.into_response())
        }
        other => Err(ApiError::BadRequest(format!("unexpected action {:?}", other))),
    }
}

/// PUT /v1/cluster/proxy/{id}: two-phase primary change.
#[tracing::instrument(name = "cluster.set_primary", skip(state, headers), fields(proxy_id = %proxy_id))]
pub async fn put_cluster_proxy(
    Path(proxy_id): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    if let Some(resp) = forward_cp(&state, Method::PUT, &uri, &headers, &[]).await? {
        return Ok(resp);
    }
    set_primary_two_phase(&state, &proxy_id).await?;
    Ok(StatusCode::OK.into_response())
}

/// DELETE /v1/cluster/daemon/{id}: unregister a member.
#[tracing::instrument(name = "cluster.unregister", skip(state, headers), fields(sid = %sid))]
pub async fn delete_cluster_daemon(
    Path(sid): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let smap = state.owners.smap.get();
    let node = smap.get_node(&sid).ok_or_else(|| ApiError::NodeNotFound {
        action: "remove".to_string(),
        id: sid.clone(),
        self_id: state.me.id.clone(),
        smap_version: smap.version,
    })?;
    let action = if node.is_proxy() { ACT_UNREG_PROXY } else { ACT_UNREG_TARGET };
    if let Some(resp) = forward_cp(&state, Method::DELETE, &uri, &headers, &[]).await? {
        return Ok(resp);
    }
    unregister_node(&state, &sid, action).await?;
    Ok(StatusCode::OK.into_response())
}

/// Primary collects target BMDs and re-installs the best one (+100 so it
/// supersedes every reply it picked from).
async fn recover_buckets(
    state: &GatewayState,
    msg: &ActionMsg,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ApiError> {
    if let Some(resp) = forward_cp(state, Method::PUT, uri, headers, body).await? {
        return Ok(resp);
    }
    let smap = state.owners.smap.get();
    let mut args = BcastArgs::to_targets(
        &state.me,
        &url_path(&[ROUTE_DAEMON]),
        state.config.cplane_timeout,
    );
    args.query = vec![(QPARAM_WHAT.to_string(), WHAT_BMD.to_string())];
    let results = gather(bcast_group(&state.client, &smap, args)).await?;

    let mut bmds: Vec<(String, Bmd)> = Vec::with_capacity(results.len());
    for res in &results {
        match res.parse::<Bmd>() {
            Ok(bmd) => bmds.push((res.node.id.clone(), bmd)),
            Err(e) => tracing::error!("recover-buckets: {}", e),
        }
    }

    let force = query_flag(uri, QPARAM_FORCE);
    let mut rbmd = match resolve_uuid_bmd(&bmds) {
        Ok(bmd) => bmd,
        Err(err) => {
            if !force {
                return Err(err);
            }
            tracing::error!("recover-buckets: {} - force-resolving", err);
            resolve_uuid_bmd_force(&bmds)
                .ok_or_else(|| ApiError::NotFound("no BMD replies to recover from".to_string()))?
        }
    };
    rbmd.version += 100;
    state.owners.bmd.put_force(rbmd.clone());
    let pairs = vec![(KIND_BMD.to_string(), RevsPair::new(rbmd.version, &rbmd, msg))];
    state.metasync.sync(pairs).await?;
    Ok(axum::Json(rbmd).into_response())
}
