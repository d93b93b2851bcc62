use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use rand::seq::IteratorRandom;
use reqwest::Method as RMethod;
use std::sync::Arc;
use uuid::Uuid;

use common::api_error::ApiError;
use common::constants::{
    CONTENT_MSGPACK, DEFAULT_PAGE_SIZE, HDR_BUCKET_PROPS, QPARAM_CHECK_EXISTS, QPARAM_ORIG_URL,
    QPARAM_PROVIDER, QPARAM_TASK_ACTION, QPARAM_UUID, ROUTE_BUCKETS, TASK_START, TASK_STATUS,
};
use common::schemas::{
    aggregate_summaries, ActionMsg, Bck, BucketsSummaries, ListObjectsMsg, ObjEntry, ObjectList,
    Provider, ACCESS_ADMIN, ACCESS_DELETE, ACCESS_HEAD, ACCESS_LIST, ACT_COPY_BUCKET,
    ACT_CREATE_BUCKET, ACT_DELETE_RANGE, ACT_DESTROY_BUCKET, ACT_EC_ENCODE, ACT_INVALIDATE_CACHE,
    ACT_LIST_OBJECTS, ACT_MAKE_N_COPIES, ACT_PREFETCH, ACT_REGISTER_CLOUD, ACT_RENAME_BUCKET,
    ACT_SUMMARY,
};
use common::time_utils::utc_now_ms;
use common::url_utils::url_path;

use crate::core::bcast::{bcast_group, call, drain_call_results, gather, BcastArgs};
use crate::core::bmd::{Bmd, BucketProps};
use crate::core::hrw::hrw_target;
use crate::core::ic::register_equal;
use crate::core::listing::CacheId;
use crate::core::metasync::{RevsPair, KIND_BMD};
use crate::core::node::{Net, Snode};
use crate::core::notifs::NotifListener;
use crate::core::state::GatewayState;
use crate::routes::{bck_from_query, check_access, forward_cp, query_param};

async fn sync_bmd(state: &GatewayState, bmd: Arc<Bmd>, msg: &ActionMsg) {
    let pairs = vec![(KIND_BMD.to_string(), RevsPair::new(bmd.version, &*bmd, msg))];
    if let Err(e) = state.metasync.sync(pairs).await {
        tracing::error!("metasync of {} failed: {}", bmd, e);
    }
}

/// Create a local BMD entry; `Conflict` means another request won the race.
pub async fn create_bucket(
    state: &GatewayState,
    bck: &Bck,
    props: BucketProps,
    msg: &ActionMsg,
) -> Result<(), ApiError> {
    let bck = bck.clone();
    let installed = state.owners.bmd.modify::<ApiError>(
        |clone| {
            if clone.buckets.contains_key(&bck) {
                return Err(ApiError::Conflict(format!("bucket {:?} already exists", bck.name)));
            }
            let mut props = props.clone();
            props.created_ms = utc_now_ms();
            clone.buckets.insert(bck.clone(), props);
            Ok(())
        },
        |_| {},
    )?;
    sync_bmd(state, installed, msg).await;
    Ok(())
}

fn random_target(smap: &crate::core::smap::Smap) -> Result<Snode, ApiError> {
    smap.targets
        .values()
        .choose(&mut rand::rng())
        .cloned()
        .ok_or_else(|| ApiError::NotReady("no registered targets".to_string()))
}

/// On-the-fly remote bucket registration: a random target looks the bucket
/// up over the intra-data network; its reply either becomes the new BMD
/// entry or maps to the 404/410 taxonomy.
async fn lookup_remote_bucket(
    state: &GatewayState,
    bck: &Bck,
    orig_url: Option<&str>,
) -> Result<BucketProps, ApiError> {
    let smap = state.owners.smap.get();
    let tsi = random_target(&smap)?;
    let mut query = vec![(
        QPARAM_PROVIDER.to_string(),
        format!("{:?}", bck.provider).to_lowercase(),
    )];
    if let Some(u) = orig_url {
        query.push((QPARAM_ORIG_URL.to_string(), u.to_string()));
    }
    let res = call(
        &state.client,
        &tsi,
        Net::IntraData,
        RMethod::HEAD,
        &url_path(&[ROUTE_BUCKETS, &bck.name]),
        &query,
        None,
        state.config.cplane_timeout,
        &state.me.id,
    )
    .await;
    match res.status {
        404 => Err(ApiError::NotFound(format!("remote bucket {:?} does not exist", bck.name))),
        410 => Err(ApiError::Gone(format!("cloud bucket {:?} is offline", bck.name))),
        _ if !res.is_ok() => Err(res.to_api_error()),
        _ => {
            // Cloud props travel back in the reply body (if any).
            let mut props: BucketProps = if res.bytes.is_empty() {
                BucketProps::default()
            } else {
                serde_json::from_slice(&res.bytes).unwrap_or_default()
            };
            if let Some(u) = orig_url {
                props.orig_url = Some(u.to_string());
            }
            Ok(props)
        }
    }
}

/// Initialize the bucket for a request. Known buckets come straight from
/// the BMD; unknown remote buckets are looked up and registered on the fly
/// (on the primary; anyone else forwards the original request). The
/// forwarded response is handed back through `Err`.
pub async fn init_and_try(
    state: &GatewayState,
    bck: &Bck,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Result<BucketProps, Response>, ApiError> {
    if let Some(props) = state.owners.bmd.get().get(bck) {
        return Ok(Ok(props.clone()));
    }
    if !bck.provider.is_remote() {
        return Err(ApiError::NotFound(format!("bucket {:?} does not exist", bck.name)));
    }
    if let Some(resp) = forward_cp(state, method, uri, headers, body).await? {
        return Ok(Err(resp));
    }
    let orig_url = query_param(uri, QPARAM_ORIG_URL);
    let props = lookup_remote_bucket(state, bck, orig_url.as_deref()).await?;
    let msg = ActionMsg::new(ACT_REGISTER_CLOUD);
    match create_bucket(state, bck, props.clone(), &msg).await {
        Ok(()) => {}
        // Lost the registration race; the other side's entry is as good.
        Err(ApiError::Conflict(_)) => {}
        Err(e) => return Err(e),
    }
    Ok(Ok(props))
}

fn listing_response(headers: &HeaderMap, list: &ObjectList) -> Response {
    let wants_msgpack = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(CONTENT_MSGPACK));
    if wants_msgpack {
        match rmp_serde::to_vec_named(list) {
            Ok(buf) => {
                return ([(header::CONTENT_TYPE, CONTENT_MSGPACK)], buf).into_response()
            }
            Err(e) => {
                tracing::error!("msgpack encode failed, falling back to json: {}", e);
            }
        }
    }
    axum::Json(list).into_response()
}

/// GET /v1/buckets: names in the BMD, or via a random target for remote
/// providers the gateway does not own.
#[tracing::instrument(name = "buckets.list", skip(state, headers))]
pub async fn list_buckets(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    check_access(&state, &headers, None, ACCESS_LIST)?;
    let provider = query_param(&uri, QPARAM_PROVIDER)
        .map(|p| {
            Provider::parse(&p)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid provider {:?}", p)))
        })
        .transpose()?
        .unwrap_or(Provider::Local);

    if provider.is_remote() {
        let smap = state.owners.smap.get();
        let tsi = random_target(&smap)?;
        return state
            .rproxy
            .reverse_to_node(
                &tsi,
                Net::IntraData,
                Method::GET,
                &crate::routes::path_and_query(&uri),
                &headers,
                Vec::new(),
            )
            .await;
    }
    let bmd = state.owners.bmd.get();
    let bcks: Vec<&Bck> = bmd.buckets.keys().filter(|b| b.provider == provider).collect();
    Ok(axum::Json(&bcks).into_response())
}

/// GET /v1/buckets/{bucket}: paged object listing driven by query params.
#[tracing::instrument(name = "buckets.get", skip(state, headers), fields(bucket = %bucket))]
pub async fn get_bucket(
    Path(bucket): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    let bck = bck_from_query(&bucket, &uri)?;
    let props = match init_and_try(&state, &bck, Method::GET, &uri, &headers, &Bytes::new()).await? {
        Ok(p) => p,
        Err(forwarded) => return Ok(forwarded),
    };
    check_access(&state, &headers, Some(&props), ACCESS_LIST)?;
    let msg = ListObjectsMsg {
        uuid: query_param(&uri, QPARAM_UUID).unwrap_or_default(),
        prefix: query_param(&uri, "prefix").unwrap_or_default(),
        page_size: query_param(&uri, "page-size").and_then(|v| v.parse().ok()).unwrap_or(0),
        continuation_token: query_param(&uri, "token").unwrap_or_default(),
        props: query_param(&uri, "props").unwrap_or_default(),
        use_cache: crate::routes::query_flag(&uri, "cached"),
    };
    let list = list_objects(&state, &bck, msg).await?;
    Ok(listing_response(&headers, &list))
}

/// POST /v1/buckets/{bucket}: admin action dispatch.
#[tracing::instrument(name = "buckets.post", skip(state, headers, body), fields(bucket = %bucket))]
pub async fn post_bucket(
    Path(bucket): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    let msg: ActionMsg = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("cannot parse action message: {}", e)))?;
    let bck = bck_from_query(&bucket, &uri)?;

    match msg.action.as_str() {
        ACT_CREATE_BUCKET => {
            check_access(&state, &headers, None, ACCESS_ADMIN)?;
            if let Some(resp) = forward_cp(&state, Method::POST, &uri, &headers, &body).await? {
                return Ok(resp);
            }
            if bck.provider.is_remote() && !crate::routes::query_flag(&uri, QPARAM_CHECK_EXISTS) {
                return Err(ApiError::BadRequest(format!(
                    "{:?} buckets are registered, not created",
                    bck.provider
                )));
            }
            create_bucket(&state, &bck, BucketProps::default(), &msg).await?;
            Ok(StatusCode::OK.into_response())
        }
        ACT_REGISTER_CLOUD => {
            check_access(&state, &headers, None, ACCESS_ADMIN)?;
            if let Some(resp) = forward_cp(&state, Method::POST, &uri, &headers, &body).await? {
                return Ok(resp);
            }
            let props = lookup_remote_bucket(&state, &bck, None).await?;
            create_bucket(&state, &bck, props, &msg).await?;
            Ok(StatusCode::OK.into_response())
        }
        ACT_RENAME_BUCKET => rename_bucket(&state, &bck, &msg, &uri, &headers, &body).await,
        ACT_COPY_BUCKET => copy_bucket(&state, &bck, &msg, &uri, &headers, &body).await,
        ACT_LIST_OBJECTS => {
            let props =
                match init_and_try(&state, &bck, Method::POST, &uri, &headers, &body).await? {
                    Ok(p) => p,
                    Err(forwarded) => return Ok(forwarded),
                };
            check_access(&state, &headers, Some(&props), ACCESS_LIST)?;
            let lmsg: ListObjectsMsg = serde_json::from_value(msg.value.clone())
                .map_err(|e| ApiError::BadRequest(format!("cannot parse listing message: {}", e)))?;
            let list = list_objects(&state, &bck, lmsg).await?;
            Ok(listing_response(&headers, &list))
        }
        ACT_INVALIDATE_CACHE => {
            state.qm.cache_invalidate(&bck);
            Ok(StatusCode::OK.into_response())
        }
        ACT_SUMMARY => bucket_summary(&state, &bck, &msg, &headers).await,
        ACT_MAKE_N_COPIES | ACT_EC_ENCODE => {
            check_access(&state, &headers, None, ACCESS_ADMIN)?;
            if let Some(resp) = forward_cp(&state, Method::POST, &uri, &headers, &body).await? {
                return Ok(resp);
            }
            let xact_id = start_bucket_xact(&state, &bck, &msg).await?;
            // Props follow the xact so every node sees the new layout.
            let installed = state.owners.bmd.modify::<ApiError>(
                |clone| {
                    let props = clone.buckets.get_mut(&bck).ok_or_else(|| {
                        ApiError::NotFound(format!("bucket {:?} does not exist", bck.name))
                    })?;
                    match msg.action.as_str() {
                        ACT_EC_ENCODE => props.ec_enabled = true,
                        _ => {
                            props.mirror_count =
                                msg.value.as_u64().unwrap_or(1).max(1) as u32;
                        }
                    }
                    Ok(())
                },
                |_| {},
            )?;
            sync_bmd(&state, installed, &msg).await;
            Ok(xact_id.into_response())
        }
        ACT_PREFETCH | ACT_DELETE_RANGE => {
            let props =
                match init_and_try(&state, &bck, Method::POST, &uri, &headers, &body).await? {
                    Ok(p) => p,
                    Err(forwarded) => return Ok(forwarded),
                };
            let bits = if msg.action == ACT_PREFETCH { ACCESS_LIST } else { ACCESS_DELETE };
            check_access(&state, &headers, Some(&props), bits)?;
            let xact_id = do_list_range(&state, &bck, &msg, &body).await?;
            Ok(xact_id.into_response())
        }
        other => Err(ApiError::BadRequest(format!("unexpected action {:?}", other))),
    }
}

/// DELETE /v1/buckets/{bucket}: destroy.
#[tracing::instrument(name = "buckets.delete", skip(state, headers), fields(bucket = %bucket))]
pub async fn delete_bucket(
    Path(bucket): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    check_access(&state, &headers, None, ACCESS_ADMIN)?;
    if let Some(resp) = forward_cp(&state, Method::DELETE, &uri, &headers, &[]).await? {
        return Ok(resp);
    }
    let bck = bck_from_query(&bucket, &uri)?;
    let msg = ActionMsg::new(ACT_DESTROY_BUCKET);
    let installed = state.owners.bmd.modify::<ApiError>(
        |clone| {
            if clone.buckets.remove(&bck).is_none() {
                return Err(ApiError::NotFound(format!("bucket {:?} does not exist", bck.name)));
            }
            Ok(())
        },
        |_| {},
    )?;
    state.qm.cache_invalidate(&bck);
    sync_bmd(&state, installed, &msg).await;
    Ok(StatusCode::OK.into_response())
}

/// HEAD /v1/buckets/{bucket}: props in a response header.
#[tracing::instrument(name = "buckets.head", skip(state, headers), fields(bucket = %bucket))]
pub async fn head_bucket(
    Path(bucket): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    let bck = bck_from_query(&bucket, &uri)?;
    let props =
        match init_and_try(&state, &bck, Method::HEAD, &uri, &headers, &Bytes::new()).await? {
            Ok(p) => p,
            Err(forwarded) => return Ok(forwarded),
        };
    check_access(&state, &headers, Some(&props), ACCESS_HEAD)?;
    let encoded = serde_json::to_string(&props).expect("serializable props");
    Ok(([(HDR_BUCKET_PROPS, encoded)], StatusCode::OK).into_response())
}

/// PATCH /v1/buckets/{bucket}: set props.
#[tracing::instrument(name = "buckets.patch", skip(state, headers, body), fields(bucket = %bucket))]
pub async fn patch_bucket(
    Path(bucket): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.ensure_started()?;
    check_access(&state, &headers, None, ACCESS_ADMIN)?;
    if let Some(resp) = forward_cp(&state, Method::PATCH, &uri, &headers, &body).await? {
        return Ok(resp);
    }
    let bck = bck_from_query(&bucket, &uri)?;
    let new_props: BucketProps = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("cannot parse bucket props: {}", e)))?;
    let msg = ActionMsg::new("set-bucket-props");
    let installed = state.owners.bmd.modify::<ApiError>(
        |clone| {
            let props = clone.buckets.get_mut(&bck).ok_or_else(|| {
                ApiError::NotFound(format!("bucket {:?} does not exist", bck.name))
            })?;
            let created = props.created_ms;
            *props = new_props.clone();
            props.created_ms = created;
            Ok(())
        },
        |_| {},
    )?;
    sync_bmd(&state, installed, &msg).await;
    Ok(StatusCode::OK.into_response())
}

async fn rename_bucket(
    state: &GatewayState,
    bck: &Bck,
    msg: &ActionMsg,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ApiError> {
    check_access(state, headers, None, ACCESS_ADMIN)?;
    if let Some(resp) = forward_cp(state, Method::POST, uri, headers, body).await? {
        return Ok(resp);
    }
    let to = msg.name.clone();
    if to.is_empty() {
        return Err(ApiError::BadRequest("rename: missing destination name".to_string()));
    }
    let dst = Bck { name: to.clone(), ..bck.clone() };
    let installed = state.owners.bmd.modify::<ApiError>(
        |clone| {
            let src = clone
                .buckets
                .get_mut(bck)
                .ok_or_else(|| ApiError::NotFound(format!("bucket {:?} does not exist", bck.name)))?;
            if src.renamed_to.is_some() {
                return Err(ApiError::Conflict(format!("bucket {:?} is being renamed", bck.name)));
            }
            src.renamed_to = Some(to.clone());
            let props = BucketProps { renamed_to: None, ..src.clone() };
            if clone.buckets.contains_key(&dst) {
                return Err(ApiError::Conflict(format!("bucket {:?} already exists", dst.name)));
            }
            clone.buckets.insert(dst.clone(), props);
            Ok(())
        },
        |_| {},
    )?;
    sync_bmd(state, installed, msg).await;

    let xact_id = start_bucket_xact(state, bck, msg).await?;
    let smap = state.owners.smap.get();
    let nl = NotifListener::new(&xact_id, ACT_RENAME_BUCKET, Some(bck.clone()), smap.version);
    register_equal(state, nl).await?;
    Ok(xact_id.into_response())
}

/// Once every target acknowledged the rename, the source entry (carrying
/// `renamed_to`) is dropped from the BMD. Exactly one lock acquisition.
pub async fn finish_pending_rename(state: &GatewayState, bck: &Bck) {
    let result = state.owners.bmd.modify::<ApiError>(
        |clone| {
            match clone.buckets.get(bck) {
                Some(props) if props.renamed_to.is_some() => {
                    clone.buckets.remove(bck);
                    Ok(())
                }
                _ => Err(ApiError::NotFound(format!("{:?}: no pending rename", bck.name))),
            }
        },
        |_| {},
    );
    match result {
        Ok(installed) => {
            sync_bmd(state, installed, &ActionMsg::new(ACT_RENAME_BUCKET)).await;
        }
        Err(e) => tracing::debug!("pending rename cleanup skipped: {}", e),
    }
}

async fn copy_bucket(
    state: &GatewayState,
    bck: &Bck,
    msg: &ActionMsg,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ApiError> {
    check_access(state, headers, None, ACCESS_ADMIN)?;
    if let Some(resp) = forward_cp(state, Method::POST, uri, headers, body).await? {
        return Ok(resp);
    }
    if msg.name.is_empty() {
        return Err(ApiError::BadRequest("copy: missing destination name".to_string()));
    }
    let dst = Bck { name: msg.name.clone(), ..bck.clone() };
    let src_props = state
        .owners
        .bmd
        .get()
        .get(bck)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("bucket {:?} does not exist", bck.name)))?;
    match create_bucket(state, &dst, src_props, msg).await {
        Ok(()) | Err(ApiError::Conflict(_)) => {}
        Err(e) => return Err(e),
    }
    let xact_id = start_bucket_xact(state, bck, msg).await?;
    let smap = state.owners.smap.get();
    let nl = NotifListener::new(&xact_id, ACT_COPY_BUCKET, Some(bck.clone()), smap.version);
    register_equal(state, nl).await?;
    Ok(xact_id.into_response())
}

/// Kick a bucket-scoped xact off on every target; replies must be drained
/// even on early abort.
async fn start_bucket_xact(
    state: &GatewayState,
    bck: &Bck,
    msg: &ActionMsg,
) -> Result<String, ApiError> {
    let xact_id = Uuid::new_v4().to_string();
    let smap = state.owners.smap.get();
    let mut args = BcastArgs::to_targets(
        &state.me,
        &url_path(&[ROUTE_BUCKETS, &bck.name]),
        state.config.max_host_busy,
    );
    args.method = RMethod::POST;
    args.query = vec![
        (QPARAM_UUID.to_string(), xact_id.clone()),
        (QPARAM_PROVIDER.to_string(), format!("{:?}", bck.provider).to_lowercase()),
    ];
    args.body = Some(serde_json::to_vec(msg).expect("serializable action"));
    let mut rx = bcast_group(&state.client, &smap, args);
    while let Some(res) = rx.recv().await {
        if !res.is_ok() {
            let err = res.to_api_error();
            drain_call_results(&mut rx).await;
            return Err(err);
        }
    }
    Ok(xact_id)
}

/// Prefetch / delete-range fan-out. Always the short control-plane timeout:
/// the ranged work itself runs asynchronously on the targets.
async fn do_list_range(
    state: &GatewayState,
    bck: &Bck,
    msg: &ActionMsg,
    body: &Bytes,
) -> Result<String, ApiError> {
    let xact_id = Uuid::new_v4().to_string();
    let smap = state.owners.smap.get();
    let mut args = BcastArgs::to_targets(
        &state.me,
        &url_path(&[ROUTE_BUCKETS, &bck.name]),
        state.config.cplane_timeout,
    );
    args.method = if msg.action == ACT_DELETE_RANGE { RMethod::DELETE } else { RMethod::POST };
    args.query = vec![
        (QPARAM_UUID.to_string(), xact_id.clone()),
        (QPARAM_PROVIDER.to_string(), format!("{:?}", bck.provider).to_lowercase()),
    ];
    args.body = Some(body.to_vec());
    gather(bcast_group(&state.client, &smap, args)).await?;
    Ok(xact_id)
}

//
// paged listing
//

pub async fn list_objects(
    state: &GatewayState,
    bck: &Bck,
    msg: ListObjectsMsg,
) -> Result<ObjectList, ApiError> {
    if bck.provider.is_remote() {
        list_objects_remote(state, bck, msg).await
    } else {
        list_objects_local(state, bck, msg).await
    }
}

/// Merge-and-buffer listing across all targets. Targets return
/// sorted pages; excess entries wait in per-target buffers so successive
/// pages never repeat.
async fn list_objects_local(
    state: &GatewayState,
    bck: &Bck,
    mut msg: ListObjectsMsg,
) -> Result<ObjectList, ApiError> {
    if msg.page_size == 0 {
        msg.page_size = DEFAULT_PAGE_SIZE;
    }
    let page_size = msg.page_size as usize;
    let token = msg.continuation_token.clone();

    if msg.uuid.is_empty() {
        msg.uuid = Uuid::new_v4().to_string();
        let smap = state.owners.smap.get();
        let nl = NotifListener::new(&msg.uuid, ACT_LIST_OBJECTS, Some(bck.clone()), smap.version);
        register_equal(state, nl).await?;
    }

    let cache_id = CacheId {
        bck: bck.clone(),
        prefix: msg.prefix.clone(),
        props: msg.props.clone(),
    };
    if msg.use_cache {
        if let Some(entries) = state.qm.cache_get(&cache_id, &token, page_size) {
            return Ok(finalize_page(&msg, entries, page_size));
        }
    }

    let (mut entries, mut has_enough) = state.qm.buf_get(&msg.uuid, &token, page_size);
    if !has_enough {
        // Ask targets for the page starting from what the buffers already
        // hold so nothing is requested twice.
        let refill = ListObjectsMsg {
            continuation_token: state.qm.buf_last(&msg.uuid, &token),
            ..msg.clone()
        };
        // Re-buffer what the first merge consumed.
        for e in entries.drain(..) {
            state.qm.buf_set(&msg.uuid, "_merged", vec![e], usize::MAX);
        }

        let smap = state.owners.smap.get();
        let amsg = ActionMsg::with_value(ACT_LIST_OBJECTS, &refill);
        let mut args = BcastArgs::to_targets(
            &state.me,
            &url_path(&[ROUTE_BUCKETS, &bck.name]),
            state.config.list_objects_timeout,
        );
        args.method = RMethod::POST;
        args.query = vec![(
            QPARAM_PROVIDER.to_string(),
            format!("{:?}", bck.provider).to_lowercase(),
        )];
        args.body = Some(serde_json::to_vec(&amsg).expect("serializable action"));
        let mut rx = bcast_group(&state.client, &smap, args);
        while let Some(res) = rx.recv().await {
            if !res.is_ok() {
                let err = res.to_api_error();
                drain_call_results(&mut rx).await;
                return Err(err);
            }
            let page: ObjectList = res.parse()?;
            state.qm.buf_set(&msg.uuid, &res.node.id, page.entries, page_size);
        }
        (entries, has_enough) = state.qm.buf_get(&msg.uuid, &token, page_size);
        debug_assert!(has_enough, "refill must satisfy the page");
    }

    if msg.use_cache {
        state.qm.cache_set(&cache_id, &token, entries.clone(), page_size);
    }
    let page = finalize_page(&msg, entries, page_size);
    if page.continuation_token.is_empty() {
        // Enumeration complete: release the buffers and the listener.
        state.qm.buf_drop(&msg.uuid);
        state.notifs.remove(&msg.uuid);
    }
    Ok(page)
}

fn finalize_page(msg: &ListObjectsMsg, entries: Vec<ObjEntry>, page_size: usize) -> ObjectList {
    let continuation_token = if entries.len() >= page_size {
        entries.last().map(|e| e.name.clone()).unwrap_or_default()
    } else {
        String::new()
    };
    ObjectList { uuid: msg.uuid.clone(), entries, continuation_token }
}

/// Remote bucket listing: broadcast when target-local props are requested,
/// otherwise a single random target performs the cloud listing.
async fn list_objects_remote(
    state: &GatewayState,
    bck: &Bck,
    mut msg: ListObjectsMsg,
) -> Result<ObjectList, ApiError> {
    if msg.page_size == 0 {
        msg.page_size = DEFAULT_PAGE_SIZE;
    }
    if msg.uuid.is_empty() {
        msg.uuid = Uuid::new_v4().to_string();
    }
    let smap = state.owners.smap.get();
    let amsg = ActionMsg::with_value(ACT_LIST_OBJECTS, &msg);
    let body = serde_json::to_vec(&amsg).expect("serializable action");
    let path = url_path(&[ROUTE_BUCKETS, &bck.name]);
    let query = vec![(
        QPARAM_PROVIDER.to_string(),
        format!("{:?}", bck.provider).to_lowercase(),
    )];

    let results = if msg.need_local_data() {
        let mut args =
            BcastArgs::to_targets(&state.me, &path, state.config.list_objects_timeout);
        args.method = RMethod::POST;
        args.query = query;
        args.body = Some(body);
        gather(bcast_group(&state.client, &smap, args)).await?
    } else {
        let tsi = random_target(&smap)?;
        let res = call(
            &state.client,
            &tsi,
            Net::IntraControl,
            RMethod::POST,
            &path,
            &query,
            Some(body),
            state.config.list_objects_timeout,
            &state.me.id,
        )
        .await;
        if !res.is_ok() {
            return Err(res.to_api_error());
        }
        vec![res]
    };

    let mut lists = Vec::with_capacity(results.len());
    for res in &results {
        lists.push(res.parse::<ObjectList>()?);
    }
    let mut merged = ObjectList::merge(lists, msg.page_size as usize);
    merged.uuid = msg.uuid.clone();

    if msg.props_set().iter().any(|p| p == "target_url") {
        for e in &mut merged.entries {
            if let Ok(si) = hrw_target(&bck.make_uname(&e.name), &smap) {
                e.target_url = Some(si.public.url.clone());
            }
        }
    }
    Ok(merged)
}

//
// bucket summary (async task with uuid)
//

async fn bucket_summary(
    state: &GatewayState,
    bck: &Bck,
    msg: &ActionMsg,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    check_access(state, headers, None, ACCESS_LIST)?;
    let uuid = msg
        .value
        .get("uuid")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let (uuid, task_action) = if uuid.is_empty() {
        let id = Uuid::new_v4().to_string();
        let smap = state.owners.smap.get();
        let nl = NotifListener::new(&id, ACT_SUMMARY, Some(bck.clone()), smap.version);
        register_equal(state, nl).await?;
        (id, TASK_START)
    } else {
        (uuid, TASK_STATUS)
    };

    let smap = state.owners.smap.get();
    let mut args = BcastArgs::to_targets(
        &state.me,
        &url_path(&[ROUTE_BUCKETS, &bck.name]),
        state.config.max_host_busy,
    );
    args.method = RMethod::POST;
    args.query = vec![
        (QPARAM_TASK_ACTION.to_string(), task_action.to_string()),
        (QPARAM_UUID.to_string(), uuid.clone()),
        (QPARAM_PROVIDER.to_string(), format!("{:?}", bck.provider).to_lowercase()),
    ];
    args.body = Some(serde_json::to_vec(msg).expect("serializable action"));

    // Targets reply 200 with a body once done, 202 while still running.
    let mut rx = bcast_group(&state.client, &smap, args);
    let mut all_done = true;
    let mut not_found = 0usize;
    let mut total = 0usize;
    let mut summaries: BucketsSummaries = Vec::new();
    while let Some(res) = rx.recv().await {
        total += 1;
        if res.status == 404 {
            not_found += 1;
            continue;
        }
        if !res.is_ok() {
            let err = res.to_api_error();
            drain_call_results(&mut rx).await;
            return Err(err);
        }
        if res.status == 202 {
            all_done = false;
            continue;
        }
        let part: BucketsSummaries = res.parse()?;
        summaries = aggregate_summaries(summaries, part);
    }
    if total > 0 && not_found == total {
        return Err(ApiError::NotFound(format!("task {} does not exist", uuid)));
    }
    if !all_done || task_action == TASK_START {
        return Ok((StatusCode::ACCEPTED, uuid).into_response());
    }
    state.notifs.remove(&uuid);
    Ok(axum::Json(summaries).into_response())
}
