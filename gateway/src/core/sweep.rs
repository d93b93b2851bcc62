use reqwest::Method;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use common::constants::{KEEPALIVE, ROUTE_CLUSTER};
use common::schemas::{ACT_UNREG_PROXY, ACT_UNREG_TARGET};
use common::url_utils::url_path;

use crate::core::bcast::call;
use crate::core::election::start_election;
use crate::core::membership::{unregister_node, JoinReq};
use crate::core::node::Net;
use crate::core::state::GatewayState;

const KEEPALIVE_MISS_LIMIT: u32 = 3;

/// Background keepalive loop. A non-primary heartbeats the primary and
/// starts an election after repeated misses; the primary sweeps silent
/// members out of the map.
pub async fn keepalive_loop(state: GatewayState, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(state.config.keepalive_interval);
    let mut misses = 0u32;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        if state.is_primary() {
            misses = 0;
            sweep_silent_members(&state).await;
            state.metasync.retry_pending().await;
            continue;
        }
        if send_keepalive(&state).await {
            misses = 0;
        } else {
            misses += 1;
            tracing::warn!("keepalive to primary missed ({}/{})", misses, KEEPALIVE_MISS_LIMIT);
            if misses >= KEEPALIVE_MISS_LIMIT {
                misses = 0;
                if !state.me.non_electable {
                    start_election(&state).await;
                }
            }
        }
    }
}

async fn send_keepalive(state: &GatewayState) -> bool {
    let smap = state.owners.smap.get();
    let Some(primary) = smap.primary() else {
        return false;
    };
    let body = serde_json::to_vec(&JoinReq {
        node: (*state.me).clone(),
        smap: None,
        bmd: None,
    })
    .expect("serializable keepalive");
    let res = call(
        &state.client,
        primary,
        Net::IntraControl,
        Method::POST,
        &url_path(&[ROUTE_CLUSTER, KEEPALIVE]),
        &[],
        Some(body),
        state.config.cplane_timeout,
        &state.me.id,
    )
    .await;
    res.is_ok()
}

async fn sweep_silent_members(state: &GatewayState) {
    if !state.cluster_started() {
        return;
    }
    let smap = state.owners.smap.get();
    let down = state.config.keepalive_down;
    let mut expired: Vec<(String, &'static str)> = Vec::new();
    for (id, node) in smap.proxies.iter().chain(smap.targets.iter()) {
        if id == &state.me.id {
            continue;
        }
        match state.keepalive.silent_for(id) {
            Some(elapsed) if elapsed > down => {
                let action = if node.is_proxy() { ACT_UNREG_PROXY } else { ACT_UNREG_TARGET };
                expired.push((id.clone(), action));
            }
            Some(_) => {}
            // Never heard from since (re)start; begin the clock now.
            None => state.keepalive.heard_from(id),
        }
    }
    for (id, action) in expired {
        tracing::warn!("{}: dropping silent member {}", state.me, id);
        if let Err(e) = unregister_node(state, &id, action).await {
            tracing::error!("failed to drop {}: {}", id, e);
        }
    }
}
