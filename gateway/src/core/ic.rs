use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use reqwest::Method as RMethod;
use serde::{Deserialize, Serialize};

use common::api_error::ApiError;
use common::constants::ROUTE_IC;
use common::url_utils::url_path;

use crate::core::bcast::call;
use crate::core::hrw::hrw_ic_member;
use crate::core::node::{Net, Snode};
use crate::core::notifs::NotifListener;
use crate::core::smap::Smap;
use crate::core::state::GatewayState;

/// Wire format for /v1/ic: either a single listener registration or the
/// full ownership table.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "what", rename_all = "kebab-case")]
pub enum IcMsg {
    Listen { nl: NotifListener },
    OwnershipTbl { table: Vec<NotifListener> },
}

/// Install `nl` under equal ownership: every IC member holds a mirror, the
/// rendezvous-hashed member owns the authoritative progress state.
pub async fn register_equal(state: &GatewayState, mut nl: NotifListener) -> Result<(), ApiError> {
    let smap = state.owners.smap.get();
    let owner = hrw_ic_member(&nl.uuid, &smap)?;
    nl.owner_id = owner.id.clone();
    nl.smap_version = smap.version;

    let msg = IcMsg::Listen { nl: nl.clone() };
    let body = serde_json::to_vec(&msg).expect("serializable ic message");
    for member in smap.ic_members() {
        if member.id == state.me.id {
            continue;
        }
        let res = call(
            &state.client,
            member,
            Net::IntraControl,
            RMethod::POST,
            &url_path(&[ROUTE_IC]),
            &[],
            Some(body.clone()),
            state.config.cplane_timeout,
            &state.me.id,
        )
        .await;
        if !res.is_ok() {
            tracing::warn!("failed to mirror listener {} to {}", nl.uuid, res.node);
        }
    }
    if smap.is_ic(&state.me.id) {
        state.notifs.add(nl);
    }
    Ok(())
}

/// When this proxy is outside the council, status queries are relayed to
/// any IC member. Returns None when the caller should handle the request
/// itself.
pub async fn redirect_to_ic(
    state: &GatewayState,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Option<Response>, ApiError> {
    let smap = state.owners.smap.get();
    if smap.is_ic(&state.me.id) {
        return Ok(None);
    }
    let Some(member) = smap.ic_members().into_iter().next() else {
        return Err(ApiError::NotReady("empty information council".to_string()));
    };
    let resp = state
        .rproxy
        .reverse_to_node(member, Net::IntraControl, method, path_and_query, headers, body.to_vec())
        .await?;
    Ok(Some(resp))
}

/// Within the council, relay a status call to the listener's owner.
pub async fn reverse_to_owner(
    state: &GatewayState,
    uuid: &str,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Option<Response>, ApiError> {
    let Some(nl) = state.notifs.get(uuid) else {
        return Ok(None);
    };
    if nl.owner_id == state.me.id {
        return Ok(None);
    }
    let smap = state.owners.smap.get();
    let Some(owner) = smap.get_node(&nl.owner_id) else {
        return Ok(None); // owner left; caller answers from the mirror
    };
    let resp = state
        .rproxy
        .reverse_to_node(owner, Net::IntraControl, method, path_and_query, headers, body.to_vec())
        .await?;
    Ok(Some(resp))
}

/// Push the full listener table to `dst` (new IC member, or on request).
pub async fn send_ownership_tbl(state: &GatewayState, dst: &Snode) -> Result<(), ApiError> {
    let msg = IcMsg::OwnershipTbl { table: state.notifs.entries() };
    let body = serde_json::to_vec(&msg).expect("serializable ic message");
    let res = call(
        &state.client,
        dst,
        Net::IntraControl,
        RMethod::POST,
        &url_path(&[ROUTE_IC]),
        &[],
        Some(body),
        state.config.cplane_timeout,
        &state.me.id,
    )
    .await;
    if !res.is_ok() {
        return Err(res.to_api_error());
    }
    Ok(())
}

/// After a map change: if this node stayed in the IC, hand the table to the
/// newly inducted members and re-elect owners for listeners whose owner
/// dropped out (the member with the higher age keeps ownership, which the
/// age-stamped rendezvous election makes deterministic).
pub async fn sync_new_ic_owners(state: &GatewayState, old: &Smap, new: &Smap) {
    if !old.is_ic(&state.me.id) || !new.is_ic(&state.me.id) {
        return;
    }
    for sid in new.ic.keys() {
        if old.is_ic(sid) || sid == &state.me.id {
            continue;
        }
        if let Some(node) = new.proxies.get(sid) {
            if let Err(e) = send_ownership_tbl(state, node).await {
                tracing::error!("failed to send ownership table to {}: {}", node, e);
            }
        }
    }
    state.notifs.reassign_owners(|nl| {
        if new.is_ic(&nl.owner_id) {
            return None;
        }
        hrw_ic_member(&nl.uuid, new).ok().map(|n| n.id.clone())
    });
}
