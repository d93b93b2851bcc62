use reqwest::Method;

use common::api_error::ApiError;
use common::constants::{
    AUTO_REGISTER, PROXY, QPARAM_PREPARE, QPARAM_WHAT, ROUTE_CLUSTER, ROUTE_DAEMON, WHAT_SMAP,
};
use common::schemas::{ActionMsg, ACT_NEW_PRIMARY};
use common::url_utils::url_path;

use crate::core::bcast::{bcast_group, call, BcastArgs};
use crate::core::ic::sync_new_ic_owners;
use crate::core::membership::JoinReq;
use crate::core::metasync::{RevsPair, KIND_BMD, KIND_RMD, KIND_SMAP};
use crate::core::node::Net;
use crate::core::smap::Smap;
use crate::core::state::GatewayState;

/// Two-phase primary change, coordinated by the current primary.
/// Prepare touches no state anywhere; the commit phase is only entered once
/// every node acknowledged.
pub async fn set_primary_two_phase(state: &GatewayState, proxy_id: &str) -> Result<(), ApiError> {
    let smap = state.owners.smap.get();
    let psi = smap.proxies.get(proxy_id).ok_or_else(|| ApiError::NodeNotFound {
        action: "set-primary".to_string(),
        id: proxy_id.to_string(),
        self_id: state.me.id.clone(),
        smap_version: smap.version,
    })?;
    if psi.id == state.me.id {
        tracing::warn!("set-primary to self ({}): nothing to do", proxy_id);
        return Ok(());
    }

    let path = url_path(&[ROUTE_DAEMON, PROXY, proxy_id]);

    // (I) prepare
    let mut args = BcastArgs::to_all(&state.me, &path, state.config.cplane_timeout);
    args.method = Method::PUT;
    args.query = vec![(QPARAM_PREPARE.to_string(), "true".to_string())];
    let mut rx = bcast_group(&state.client, &smap, args.clone());
    while let Some(res) = rx.recv().await {
        if !res.is_ok() {
            let err = res.to_api_error();
            crate::core::bcast::drain_call_results(&mut rx).await;
            return Err(ApiError::Any(anyhow::anyhow!(
                "failed to set primary {}: prepare phase: {}",
                proxy_id,
                err
            )));
        }
    }

    // (I.5) commit locally: record the new primary, step down.
    let proxy_id_owned = proxy_id.to_string();
    state
        .owners
        .smap
        .modify::<ApiError>(
            |clone| {
                clone.primary_id = proxy_id_owned.clone();
                Ok(())
            },
            |_| {},
        )?;
    state.metasync.become_non_primary();

    // (II) commit
    args.query = vec![(QPARAM_PREPARE.to_string(), "false".to_string())];
    let mut rx = bcast_group(&state.client, &smap, args);
    let mut commit_err = None;
    while let Some(res) = rx.recv().await {
        if res.is_ok() {
            continue;
        }
        if res.node.id == proxy_id {
            // The designated primary did not take over: the transition is
            // abandoned and surfaced to the caller.
            commit_err = Some(ApiError::Any(anyhow::anyhow!(
                "commit phase failure: new primary {} replied: {}",
                proxy_id,
                res.to_api_error()
            )));
        } else {
            tracing::error!(
                "commit phase failure: {} failed to install primary {}: {:?}",
                res.node,
                proxy_id,
                res.err
            );
        }
    }
    match commit_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Daemon-side half of the two-phase change. Prepare merely validates; the
/// commit installs the new primary, and on the designated node itself
/// triggers the takeover.
pub async fn daemon_set_primary(
    state: &GatewayState,
    proxy_id: &str,
    prepare: bool,
) -> Result<(), ApiError> {
    if state.me.id == proxy_id {
        if !prepare {
            become_new_primary(state, "").await;
        }
        return Ok(());
    }

    let smap = state.owners.smap.get();
    if smap.proxies.get(proxy_id).is_none() {
        return Err(ApiError::NodeNotFound {
            action: "set-primary".to_string(),
            id: proxy_id.to_string(),
            self_id: state.me.id.clone(),
            smap_version: smap.version,
        });
    }
    if prepare {
        return Ok(());
    }
    let proxy_id = proxy_id.to_string();
    state
        .owners
        .smap
        .modify::<ApiError>(
            |clone| {
                clone.primary_id = proxy_id.clone();
                Ok(())
            },
            |_| {},
        )?;
    state.metasync.become_non_primary();
    Ok(())
}

/// Take over as primary: +100 version distance from any concurrent updates
/// of the previous one, restaff the IC, distribute everything.
pub async fn become_new_primary(state: &GatewayState, proxy_id_to_remove: &str) {
    let prev = state.owners.smap.get();
    let result = state.owners.smap.modify::<ApiError>(
        |clone| {
            if !clone.contains_id(&state.me.id) {
                return Err(ApiError::Any(anyhow::anyhow!(
                    "{} must be present in its own cluster map",
                    state.me
                )));
            }
            if !proxy_id_to_remove.is_empty() {
                tracing::info!("{}: removing failed primary {}", state.me, proxy_id_to_remove);
                clone.del_node(proxy_id_to_remove);
            }
            clone.primary_id = state.me.id.clone();
            clone.version += 100;
            clone.staff_ic();
            Ok(())
        },
        |_| {},
    );
    let clone = match result {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("cannot become primary: {}", e);
            return;
        }
    };

    let bmd = state.owners.bmd.get();
    let rmd = state.owners.rmd.get();
    tracing::info!("{}: distributing {} with newly elected primary (self)", state.me, clone);
    let msg = ActionMsg::new(ACT_NEW_PRIMARY);
    let pairs = vec![
        (KIND_SMAP.to_string(), RevsPair::new(clone.version, &*clone, &msg)),
        (KIND_BMD.to_string(), RevsPair::new(bmd.version, &*bmd, &msg)),
        (KIND_RMD.to_string(), RevsPair::new(rmd.version, &*rmd, &msg)),
    ];
    if let Err(e) = state.metasync.sync(pairs).await {
        tracing::error!("metasync after takeover: {}", e);
    }
    sync_new_ic_owners(state, &prev, &clone).await;
}

/// Fetch a cluster map straight from a node's daemon endpoint.
pub async fn smap_from_url(state: &GatewayState, base_url: &str) -> Result<Smap, ApiError> {
    let url = format!("{}{}", base_url, url_path(&[ROUTE_DAEMON]));
    let resp = state
        .client
        .get(&url)
        .query(&[(QPARAM_WHAT, WHAT_SMAP)])
        .timeout(state.config.cplane_timeout)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(ApiError::Upstream(
            resp.status().as_u16(),
            format!("failed to get smap from {}", base_url),
        ));
    }
    let smap: Smap = resp.json().await?;
    if !smap.is_valid() {
        return Err(ApiError::Any(anyhow::anyhow!("invalid smap from {}: {}", base_url, smap)));
    }
    Ok(smap)
}

/// Split-brain recovery on a returning primary: adopt the candidate's map,
/// step down, and re-join as a regular member.
pub async fn forceful_join(
    state: &GatewayState,
    proxy_id: &str,
    candidate_url: &str,
) -> Result<(), ApiError> {
    if state.me.id == proxy_id {
        tracing::warn!("{} is already the primary", state.me);
        return Ok(());
    }
    let smap = state.owners.smap.get();
    let candidate_url = if candidate_url.is_empty() {
        let psi = smap.proxies.get(proxy_id).ok_or_else(|| ApiError::NodeNotFound {
            action: "force-join".to_string(),
            id: proxy_id.to_string(),
            self_id: state.me.id.clone(),
            smap_version: smap.version,
        })?;
        psi.intra_control.url.clone()
    } else {
        candidate_url.to_string()
    };

    let new_smap = smap_from_url(state, &candidate_url).await?;
    if new_smap.primary_id != proxy_id {
        return Err(ApiError::BadRequest(format!(
            "proxy {} is not the primary of {}",
            proxy_id, new_smap
        )));
    }

    // Abandon own primary role before installing the fetched map.
    state.metasync.become_non_primary();
    state.owners.smap.put_force(new_smap.clone());

    let primary = new_smap.primary().expect("validated above").clone();
    let body = serde_json::to_vec(&JoinReq {
        node: (*state.me).clone(),
        smap: Some(new_smap),
        bmd: Some((*state.owners.bmd.get()).clone()),
    })
    .expect("serializable join request");
    let res = call(
        &state.client,
        &primary,
        Net::IntraControl,
        Method::POST,
        &url_path(&[ROUTE_CLUSTER, AUTO_REGISTER]),
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
