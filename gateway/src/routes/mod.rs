pub mod bucket;
pub mod cluster;
pub mod daemon;
pub mod download;
pub mod health;
pub mod ic;
pub mod metasync;
pub mod notifs;
pub mod object;
pub mod reverse;
pub mod tokens;
pub mod vote;

use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use common::api_error::ApiError;
use common::constants::HDR_AUTH_TOKEN;
use common::schemas::{access_op_name, Bck, Provider};

use crate::core::bmd::BucketProps;
use crate::core::state::GatewayState;

pub fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Forward a control-plane write to the primary; `None` means this node is
/// the primary and should handle the request itself.
pub async fn forward_cp(
    state: &GatewayState,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Option<Response>, ApiError> {
    let smap = state.owners.smap.get();
    if !smap.is_valid() {
        return Err(ApiError::NotReady(format!(
            "{} must be starting up: cannot execute {}",
            state.me,
            uri.path()
        )));
    }
    if smap.is_primary(&state.me.id) {
        return Ok(None);
    }
    let resp = state
        .rproxy
        .forward_to_primary(&smap, method, &path_and_query(uri), headers, body.to_vec())
        .await?;
    Ok(Some(resp))
}

/// Token revocation check plus the bucket's access bits.
pub fn check_access(
    state: &GatewayState,
    headers: &HeaderMap,
    props: Option<&BucketProps>,
    bits: u64,
) -> Result<(), ApiError> {
    if let Some(tok) = headers.get(HDR_AUTH_TOKEN).and_then(|v| v.to_str().ok()) {
        let tok = tok.strip_prefix("Bearer ").unwrap_or(tok);
        if state.owners.tokens.is_revoked(tok) {
            return Err(ApiError::Unauthorized("token has been revoked".to_string()));
        }
    }
    if let Some(props) = props {
        if !props.allow(bits) {
            return Err(ApiError::Forbidden(format!(
                "operation {} is not allowed by bucket access settings",
                access_op_name(bits)
            )));
        }
    }
    Ok(())
}

pub fn bck_from_query(name: &str, uri: &Uri) -> Result<Bck, ApiError> {
    let mut provider = Provider::Local;
    let mut namespace = String::new();
    if let Some(q) = uri.query() {
        for pair in q.split('&') {
            let mut it = pair.splitn(2, '=');
            let (k, v) = (it.next().unwrap_or(""), it.next().unwrap_or(""));
            match k {
                common::constants::QPARAM_PROVIDER => {
                    provider = Provider::parse(v).ok_or_else(|| {
                        ApiError::BadRequest(format!("invalid provider {:?}", v))
                    })?;
                }
                common::constants::QPARAM_NAMESPACE => namespace = v.to_string(),
                _ => {}
            }
        }
    }
    Ok(Bck { provider, namespace, name: name.to_string() })
}

pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query().and_then(|q| {
        q.split('&').find_map(|pair| {
            let mut it = pair.splitn(2, '=');
            (it.next() == Some(name)).then(|| it.next().unwrap_or("").to_string())
        })
    })
}

pub fn query_flag(uri: &Uri, name: &str) -> bool {
    matches!(query_param(uri, name).as_deref(), Some("true") | Some("1") | Some(""))
}
