use reqwest::Method;
use serde::{Deserialize, Serialize};

use common::api_error::ApiError;
use common::constants::{QPARAM_WHAT, ROUTE_DAEMON, UNREGISTER, WHAT_SNODE};
use common::schemas::{ActionMsg, ACT_REG_PROXY, ACT_REG_TARGET, ACT_START_GFN};
use common::url_utils::url_path;

use crate::core::bcast::call;
use crate::core::ic::sync_new_ic_owners;
use crate::core::metasync::{RevsPair, KIND_BMD, KIND_RMD, KIND_SMAP, KIND_TOKENS};
use crate::core::node::{Net, Snode};
use crate::core::smap::Smap;
use crate::core::state::GatewayState;

/// Registration metadata exchanged on join: the self-registering node gets
/// the current Smap and BMD back.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegMeta {
    pub smap: Smap,
    pub bmd: crate::core::bmd::Bmd,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_by: Option<String>,
}

/// Join/keepalive request body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JoinReq {
    pub node: Snode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smap: Option<Smap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmd: Option<crate::core::bmd::Bmd>,
}

pub enum JoinVerdict {
    /// Install into a clone and distribute.
    Update,
    /// Heartbeat recorded, nothing changed.
    HeardFrom,
    /// Already registered with identical info.
    NoOp,
}

/// Validate a join/keepalive on the primary; the Smap write happens later in
/// `update_and_distribute` so the request path stays short.
pub async fn handle_join_kalive(
    state: &GatewayState,
    req: &JoinReq,
    keepalive: bool,
) -> Result<JoinVerdict, ApiError> {
    let nsi = &req.node;
    nsi.validate().map_err(ApiError::BadRequest)?;

    let smap = state.owners.smap.get();
    if !smap.is_primary(&state.me.id) {
        return Err(ApiError::BadRequest(format!(
            "{} is not the primary: cannot register {}",
            state.me, nsi
        )));
    }

    // Cluster-integrity checks against what the joining node carries.
    if let Some(reg_smap) = &req.smap {
        smap.validate_uuid(reg_smap, &state.me.id, &nsi.id)?;
    }
    if let Some(reg_bmd) = &req.bmd {
        state.owners.bmd.get().validate_uuid(reg_bmd, &state.me.id, &nsi.id)?;
    }

    let osi = smap.get_node(&nsi.id);
    if keepalive {
        return keepalive_verdict(state, osi, nsi).await;
    }

    if let Some(osi) = osi {
        if state.cluster_started() && !osi.info_changed(nsi) {
            tracing::info!("{}: {} is already registered", state.me, nsi);
            return Ok(JoinVerdict::NoOp);
        }
        tracing::warn!("{}: renewing registration of {} (info changed)", state.me, nsi);
    }

    if state.cluster_started() {
        if let Some(dup) = smap.is_duplicate_url(nsi) {
            return Err(ApiError::Duplicate(format!(
                "{} reuses URL {} of {}",
                nsi, nsi.public.url, dup
            )));
        }
    }
    Ok(JoinVerdict::Update)
}

async fn keepalive_verdict(
    state: &GatewayState,
    osi: Option<&Snode>,
    nsi: &Snode,
) -> Result<JoinVerdict, ApiError> {
    let Some(osi) = osi else {
        tracing::warn!("keepalive from unknown {}: adding back to the cluster map", nsi);
        return Ok(JoinVerdict::Update);
    };
    if !osi.info_changed(nsi) {
        state.keepalive.heard_from(&nsi.id);
        return Ok(JoinVerdict::HeardFrom);
    }
    // Descriptor changed: if the old URL still answers with the same id,
    // someone is trying to register a duplicate.
    if detect_duplicate(state, osi, nsi).await {
        return Err(ApiError::Duplicate(format!(
            "{} ({}) is trying to keepalive with a duplicate id",
            nsi, nsi.public.url
        )));
    }
    tracing::warn!("{}: renewing registration of {} (info changed)", state.me, nsi);
    Ok(JoinVerdict::Update)
}

/// Ask the old endpoint who it is: a live reply with unchanged info means
/// the new descriptor is an impostor.
async fn detect_duplicate(state: &GatewayState, osi: &Snode, nsi: &Snode) -> bool {
    let res = call(
        &state.client,
        osi,
        Net::IntraControl,
        Method::GET,
        &url_path(&[ROUTE_DAEMON]),
        &[(QPARAM_WHAT.to_string(), WHAT_SNODE.to_string())],
        None,
        state.config.cplane_timeout,
        &state.me.id,
    )
    .await;
    if !res.is_ok() {
        return false;
    }
    match res.parse::<Snode>() {
        Ok(si) => si.id == nsi.id && !si.info_changed(osi),
        Err(_) => false,
    }
}

/// Asynchronous half of a join: clone-put-publish the Smap, bump the RMD
/// when data must move, metasync the wave, hand IC tables to new members.
pub async fn update_and_distribute(state: &GatewayState, nsi: Snode, non_electable: bool) {
    let mut nsi = nsi;
    nsi.non_electable = non_electable;
    let is_target = nsi.is_target();
    let action = if is_target { ACT_REG_TARGET } else { ACT_REG_PROXY };
    let prev = state.owners.smap.get();

    let mut existed = false;
    let result = state.owners.smap.modify::<ApiError>(
        |clone| {
            if !clone.is_primary(&state.me.id) {
                return Err(ApiError::Conflict(format!(
                    "{} is no longer primary: cannot add {}",
                    state.me, nsi
                )));
            }
            existed = clone.put_node(nsi.clone());
            clone.staff_ic();
            Ok(())
        },
        |_| {},
    );
    let clone = match result {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("join of {} aborted: {}", nsi, e);
            return;
        }
    };
    state.keepalive.heard_from(&nsi.id);

    let msg = ActionMsg::new(action);
    if is_target {
        // Targets need GFN armed before the rebalance wave lands.
        let gfn = ActionMsg::new(ACT_START_GFN);
        let pairs = vec![(KIND_SMAP.to_string(), RevsPair::new(clone.version, &*clone, &gfn))];
        let _ = state.metasync.notify(true, pairs).await;
    }

    let bmd = state.owners.bmd.get();
    let mut pairs = vec![
        (KIND_SMAP.to_string(), RevsPair::new(clone.version, &*clone, &msg)),
        (KIND_BMD.to_string(), RevsPair::new(bmd.version, &*bmd, &msg)),
    ];
    if is_target && (existed || requires_rebalance(state, &prev, &clone)) {
        let rmd = state.owners.rmd.modify(|r| {
            r.target_ids = Some(vec![nsi.id.clone()]);
        });
        pairs.push((KIND_RMD.to_string(), RevsPair::new(rmd.version, &*rmd, &msg)));
    } else if !is_target {
        // A newly joined proxy can become primary in a second; make sure it
        // holds the latest RMD.
        let rmd = state.owners.rmd.get();
        pairs.push((KIND_RMD.to_string(), RevsPair::new(rmd.version, &*rmd, &msg)));
    }
    let tokens = state.owners.tokens.get();
    if !tokens.tokens.is_empty() {
        pairs.push((KIND_TOKENS.to_string(), RevsPair::new(tokens.version, &*tokens, &msg)));
    }
    if let Err(e) = state.metasync.sync(pairs).await {
        tracing::error!("metasync after join of {}: {}", nsi, e);
    }
    sync_new_ic_owners(state, &prev, &clone).await;
}

/// Remove `sid` from the map; the node is told first (best effort, 3 tries)
/// so it stops keepaliving itself back in.
pub async fn unregister_node(
    state: &GatewayState,
    sid: &str,
    action: &str,
) -> Result<(), ApiError> {
    let smap = state.owners.smap.get();
    let node = smap
        .get_node(sid)
        .ok_or_else(|| ApiError::NodeNotFound {
            action: action.to_string(),
            id: sid.to_string(),
            self_id: state.me.id.clone(),
            smap_version: smap.version,
        })?
        .clone();

    for attempt in 0..3 {
        let res = call(
            &state.client,
            &node,
            Net::IntraControl,
            Method::DELETE,
            &url_path(&[ROUTE_DAEMON, UNREGISTER]),
            &[],
            None,
            state.config.cplane_timeout,
            &state.me.id,
        )
        .await;
        if res.is_ok() {
            break;
        }
        tracing::warn!(
            "{} being unregistered failed to respond (attempt {}): {:?}",
            node,
            attempt + 1,
            res.err
        );
        tokio::time::sleep(state.config.cplane_timeout / 2).await;
    }

    let prev = state.owners.smap.get();
    let clone = state.owners.smap.modify::<ApiError>(
        |clone| {
            if !clone.is_primary(&state.me.id) {
                return Err(ApiError::Conflict(format!("{} is not a primary", state.me)));
            }
            if clone.get_node(sid).is_none() {
                return Err(ApiError::NodeNotFound {
                    action: "unregister".to_string(),
                    id: sid.to_string(),
                    self_id: state.me.id.clone(),
                    smap_version: clone.version,
                });
            }
            clone.del_node(sid);
            clone.staff_ic();
            Ok(())
        },
        |_| {},
    )?;
    state.keepalive.forget(sid);

    let msg = ActionMsg::new(action);
    let mut pairs = vec![(KIND_SMAP.to_string(), RevsPair::new(clone.version, &*clone, &msg))];
    if requires_rebalance(state, &prev, &clone) {
        let rmd = state.owners.rmd.modify(|r| r.target_ids = None);
        pairs.push((KIND_RMD.to_string(), RevsPair::new(rmd.version, &*rmd, &msg)));
    }
    state.metasync.sync(pairs).await?;
    sync_new_ic_owners(state, &prev, &clone).await;
    Ok(())
}

/// Data must be redistributed when a target was added, a target returned,
/// or (with erasure coding in use) a target went missing.
pub fn requires_rebalance(state: &GatewayState, prev: &Smap, cur: &Smap) -> bool {
    if !state.config.rebalance_enabled {
        return false;
    }
    if cur.count_targets() > prev.count_targets() {
        return true;
    }
    if cur.targets.keys().any(|id| !prev.targets.contains_key(id)) {
        return true;
    }
    if state.owners.bmd.get().is_ec_used()
        && prev.targets.keys().any(|id| !cur.targets.contains_key(id))
    {
        return true;
    }
    false
}
