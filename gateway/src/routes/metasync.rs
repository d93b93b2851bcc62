use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use common::api_error::ApiError;
use common::constants::HDR_CALLER_NAME;

use crate::core::ic::sync_new_ic_owners;
use crate::core::metasync::{SyncEnvelope, KIND_BMD, KIND_RMD, KIND_SMAP, KIND_TOKENS};
use crate::core::state::GatewayState;

/// PUT /v1/metasync: one signed wave from the primary. Pairs are applied in
/// a fixed order (Smap first) so anything downstream observes the newest
/// membership.
#[tracing::instrument(name = "metasync.put", skip(state, headers, body))]
pub async fn put_metasync(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let smap = state.owners.smap.get();
    if smap.is_primary(&state.me.id) {
        return Err(ApiError::Conflict(format!(
            "{} is primary, cannot be on the receiving side of metasync",
            state.me
        )));
    }
    let env: SyncEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("cannot parse sync payload: {}", e)))?;
    if !env.verify(&state.config.cluster_secret) {
        return Err(ApiError::Unauthorized("sync payload failed signature check".to_string()));
    }
    let caller = headers
        .get(HDR_CALLER_NAME)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&env.sender_id)
        .to_string();

    let mut errs: Vec<String> = Vec::new();

    if let Some(pair) = env.pairs.get(KIND_SMAP) {
        match serde_json::from_value::<crate::core::smap::Smap>(pair.payload.clone()) {
            Ok(new_smap) => {
                tracing::debug!("received {} from {}", new_smap, caller);
                match state.owners.smap.synchronize(new_smap, true) {
                    Ok(()) => {
                        let new = state.owners.smap.get();
                        state.rproxy.prune(&smap, &new);
                        sync_new_ic_owners(&state, &smap, &new).await;
                        if smap.is_primary(&state.me.id) && !new.is_primary(&state.me.id) {
                            state.metasync.become_non_primary();
                        }
                    }
                    Err(e) => errs.push(e.to_string()),
                }
            }
            Err(e) => errs.push(format!("cannot decode Smap: {}", e)),
        }
    }

    if let Some(pair) = env.pairs.get(KIND_RMD) {
        match serde_json::from_value::<crate::core::rmd::Rmd>(pair.payload.clone()) {
            Ok(new_rmd) => {
                if let Err(e) = state.owners.rmd.synchronize(new_rmd) {
                    errs.push(e.to_string());
                }
            }
            Err(e) => errs.push(format!("cannot decode RMD: {}", e)),
        }
    }

    if let Some(pair) = env.pairs.get(KIND_BMD) {
        match serde_json::from_value::<crate::core::bmd::Bmd>(pair.payload.clone()) {
            Ok(new_bmd) => {
                let self_is_primary = state.owners.smap.get().is_primary(&state.me.id);
                if let Err(e) = state.owners.bmd.synchronize(
                    new_bmd,
                    self_is_primary,
                    &state.me.id,
                    &caller,
                ) {
                    errs.push(e.to_string());
                }
            }
            Err(e) => errs.push(format!("cannot decode BMD: {}", e)),
        }
    }

    if let Some(pair) = env.pairs.get(KIND_TOKENS) {
        match serde_json::from_value::<crate::core::tokens::TokenList>(pair.payload.clone()) {
            Ok(tokens) => state.owners.tokens.update_revoked(&tokens),
            Err(e) => errs.push(format!("cannot decode token list: {}", e)),
        }
    }

    if !errs.is_empty() {
        return Err(ApiError::Conflict(errs.join("; ")));
    }
    // Receiving a valid wave means the cluster is up.
    state.mark_cluster_started();
    Ok(StatusCode::OK.into_response())
}
