use reqwest::Method;
use serde::{Deserialize, Serialize};

use common::api_error::ApiError;
use common::constants::ROUTE_VOTE;
use common::url_utils::url_path;

use crate::core::bcast::{bcast_group, BcastArgs, BcastScope};
use crate::core::hrw::hrw_proxy;
use crate::core::primary::become_new_primary;
use crate::core::state::GatewayState;

pub const VOTE_REQUEST: &str = "vote-request";
pub const VOTE_RESULT: &str = "vote-result";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VoteMsg {
    pub action: String,
    pub candidate_id: String,
    pub initiator_id: String,
    pub smap_version: i64,
    /// Primary presumed dead; removed from the map when the candidate wins.
    #[serde(default)]
    pub primary_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VoteRecord {
    pub yes: bool,
    pub voter_id: String,
}

/// A voter agrees when the candidate is the hrw-max electable proxy of its
/// own map (excluding the presumed-dead primary) and its map is not ahead
/// of the initiator's.
pub fn cast_vote(state: &GatewayState, msg: &VoteMsg) -> VoteRecord {
    let smap = state.owners.smap.get();
    let yes = smap.version <= msg.smap_version
        && hrw_proxy(&smap, &msg.primary_id)
            .map(|n| n.id == msg.candidate_id)
            .unwrap_or(false);
    VoteRecord { yes, voter_id: state.me.id.clone() }
}

/// Initiated when keepalives to the primary keep failing and this proxy is
/// the hrw-elected successor. Majority of reachable voters wins.
pub async fn start_election(state: &GatewayState) {
    let smap = state.owners.smap.get();
    let dead_primary = smap.primary_id.clone();
    match hrw_proxy(&smap, &dead_primary) {
        Ok(candidate) if candidate.id == state.me.id => {}
        Ok(candidate) => {
            tracing::info!("not the next primary ({} is): standing by", candidate);
            return;
        }
        Err(e) => {
            tracing::error!("cannot elect: {}", e);
            return;
        }
    }

    let msg = VoteMsg {
        action: VOTE_REQUEST.to_string(),
        candidate_id: state.me.id.clone(),
        initiator_id: state.me.id.clone(),
        smap_version: smap.version,
        primary_id: dead_primary.clone(),
    };
    let body = serde_json::to_vec(&msg).expect("serializable vote");
    let mut args = BcastArgs::to_all(&state.me, &url_path(&[ROUTE_VOTE]), state.config.cplane_timeout);
    args.method = Method::POST;
    args.scope = BcastScope::All;
    args.body = Some(body);

    let mut rx = bcast_group(&state.client, &smap, args);
    let (mut yes, mut voters) = (1usize, 1usize); // self
    while let Some(res) = rx.recv().await {
        if res.node.id == dead_primary {
            continue;
        }
        voters += 1;
        if let Ok(rec) = res.parse::<VoteRecord>() {
            if rec.yes {
                yes += 1;
            }
        }
    }
    if yes * 2 <= voters {
        tracing::warn!("election lost: {}/{} votes", yes, voters);
        return;
    }
    tracing::info!("election won: {}/{} votes; taking over", yes, voters);
    become_new_primary(state, &dead_primary).await;

    // Non-voters learn the outcome from the metasync wave; the explicit
    // result message only short-circuits their own election timers.
    let result = VoteMsg { action: VOTE_RESULT.to_string(), ..msg };
    let body = serde_json::to_vec(&result).expect("serializable vote");
    let smap = state.owners.smap.get();
    let mut args = BcastArgs::to_all(&state.me, &url_path(&[ROUTE_VOTE]), state.config.cplane_timeout);
    args.method = Method::POST;
    args.body = Some(body);
    let mut rx = bcast_group(&state.client, &smap, args);
    while rx.recv().await.is_some() {}
}

pub async fn handle_vote(state: &GatewayState, msg: VoteMsg) -> Result<Option<VoteRecord>, ApiError> {
    match msg.action.as_str() {
        VOTE_REQUEST => Ok(Some(cast_vote(state, &msg))),
        VOTE_RESULT => {
            tracing::info!("vote result: {} is the new primary", msg.candidate_id);
            Ok(None)
        }
        other => Err(ApiError::BadRequest(format!("unexpected vote action {:?}", other))),
    }
}
