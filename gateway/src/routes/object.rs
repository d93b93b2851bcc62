use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use common::api_error::ApiError;
use common::constants::{QPARAM_PROXY_ID, QPARAM_UNIX_TIME};
use common::schemas::{Bck, Provider, ACCESS_DELETE, ACCESS_GET, ACCESS_HEAD, ACCESS_PUT};
use common::time_utils::utc_now_ns;

use crate::core::hrw::hrw_target;
use crate::core::node::{Net, Snode};
use crate::core::state::GatewayState;
use crate::routes::bucket::init_and_try;
use crate::routes::check_access;

/// Build the redirect URL: target base + original path/query + the proxy id
/// and a wall-clock stamp targets use to order concurrent client writes.
/// Clients inside the cluster CIDR are sent to the intra-data network.
fn redirect_url(state: &GatewayState, si: &Snode, uri: &Uri, client: &SocketAddr) -> String {
    let net = match &state.config.local_net {
        Some(net) if net.contains(&client.ip()) => Net::IntraData,
        _ => Net::Public,
    };
    let mut redirect = format!("{}{}?", si.url(net), uri.path());
    if let Some(q) = uri.query() {
        redirect.push_str(q);
        redirect.push('&');
    }
    redirect.push_str(&format!(
        "{}={}&{}={}",
        QPARAM_PROXY_ID,
        state.me.id,
        QPARAM_UNIX_TIME,
        utc_now_ns()
    ));
    redirect
}

fn redirect_response(status: StatusCode, location: &str) -> Response {
    (
        status,
        [(axum::http::header::LOCATION, location.to_string())],
    )
        .into_response()
}

async fn resolve(
    state: &GatewayState,
    bucket: &str,
    uri: &Uri,
    method: Method,
    headers: &HeaderMap,
    body: &Bytes,
    access: u64,
) -> Result<Result<(Bck, crate::core::bmd::BucketProps), Response>, ApiError> {
    state.ensure_started()?;
    let bck = crate::routes::bck_from_query(bucket, uri)?;
    let props = match init_and_try(state, &bck, method, uri, headers, body).await? {
        Ok(props) => props,
        Err(forwarded) => return Ok(Err(forwarded)),
    };
    check_access(state, headers, Some(&props), access)?;
    Ok(Ok((bck, props)))
}

/// GET /v1/objects/{bucket}/{object}: 301 to the hrw target.
#[tracing::instrument(name = "objects.get", skip(state, headers), fields(bucket = %bucket, object = %object))]
pub async fn get_object(
    Path((bucket, object)): Path<(String, String)>,
    State(state): State<GatewayState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let (bck, props) = match resolve(
        &state,
        &bucket,
        &uri,
        Method::GET,
        &headers,
        &Bytes::new(),
        ACCESS_GET,
    )
    .await?
    {
        Ok(v) => v,
        Err(forwarded) => return Ok(forwarded),
    };

    // HTTP-origin buckets are served straight from their origin.
    if bck.provider == Provider::Http {
        if let Some(orig) = &props.orig_url {
            return state.rproxy.forward_origin(orig, &object, &headers).await;
        }
    }

    let smap = state.owners.smap.get();
    let si = hrw_target(&bck.make_uname(&object), &smap)?;
    tracing::debug!("GET {}/{} => {}", bucket, object, si);
    Ok(redirect_response(
        StatusCode::MOVED_PERMANENTLY,
        &redirect_url(&state, si, &uri, &client),
    ))
}

/// PUT/DELETE/HEAD redirect with 307 so the method and body survive.
async fn redirect_to_target(
    state: GatewayState,
    bucket: String,
    object: String,
    client: SocketAddr,
    headers: HeaderMap,
    uri: Uri,
    method: Method,
    body: Bytes,
    access: u64,
) -> Result<Response, ApiError> {
    let (bck, _props) =
        match resolve(&state, &bucket, &uri, method, &headers, &body, access).await? {
            Ok(v) => v,
            Err(forwarded) => return Ok(forwarded),
        };
    let smap = state.owners.smap.get();
    let si = hrw_target(&bck.make_uname(&object), &smap)?;
    Ok(redirect_response(
        StatusCode::TEMPORARY_REDIRECT,
        &redirect_url(&state, si, &uri, &client),
    ))
}

#[tracing::instrument(name = "objects.put", skip(state, headers, body), fields(bucket = %bucket, object = %object))]
pub async fn put_object(
    Path((bucket, object)): Path<(String, String)>,
    State(state): State<GatewayState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    redirect_to_target(state, bucket, object, client, headers, uri, Method::PUT, body, ACCESS_PUT)
        .await
}

#[tracing::instrument(name = "objects.delete", skip(state, headers), fields(bucket = %bucket, object = %object))]
pub async fn delete_object(
    Path((bucket, object)): Path<(String, String)>,
    State(state): State<GatewayState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    redirect_to_target(
        state,
        bucket,
        object,
        client,
        headers,
        uri,
        Method::DELETE,
        Bytes::new(),
        ACCESS_DELETE,
    )
    .await
}

#[tracing::instrument(name = "objects.head", skip(state, headers), fields(bucket = %bucket, object = %object))]
pub async fn head_object(
    Path((bucket, object)): Path<(String, String)>,
    State(state): State<GatewayState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    redirect_to_target(
        state,
        bucket,
        object,
        client,
        headers,
        uri,
        Method::HEAD,
        Bytes::new(),
        ACCESS_HEAD,
    )
    .await
}

/// POST /v1/objects/{bucket}/{object}: object rename; redirected to the
/// target owning the source name.
#[tracing::instrument(name = "objects.post", skip(state, headers, body), fields(bucket = %bucket, object = %object))]
pub async fn post_object(
    Path((bucket, object)): Path<(String, String)>,
    State(state): State<GatewayState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    redirect_to_target(state, bucket, object, client, headers, uri, Method::POST, body, ACCESS_PUT)
        .await
}
