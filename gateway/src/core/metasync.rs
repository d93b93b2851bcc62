use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use common::api_error::ApiError;
use common::constants::ROUTE_METASYNC;
use common::schemas::ActionMsg;
use common::url_utils::url_path;

use crate::core::bcast::{bcast_group, BcastArgs, BcastScope};
use crate::core::config::GatewayConfig;
use crate::core::node::{Net, Snode};
use crate::core::state::Owners;

pub const KIND_SMAP: &str = "smap";
pub const KIND_BMD: &str = "bmd";
pub const KIND_RMD: &str = "rmd";
pub const KIND_TOKENS: &str = "tokens";

/// One metadata snapshot plus the action that produced it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RevsPair {
    pub version: i64,
    pub payload: serde_json::Value,
    pub msg: ActionMsg,
}

impl RevsPair {
    pub fn new<T: Serialize>(version: i64, value: &T, msg: &ActionMsg) -> Self {
        RevsPair {
            version,
            payload: serde_json::to_value(value).expect("serializable metadata"),
            msg: msg.clone(),
        }
    }
}

/// All pairs of one `sync` call travel in a single signed envelope, so the
/// receiver applies them atomically relative to other waves.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncEnvelope {
    pub sender_id: String,
    pub pairs: BTreeMap<String, RevsPair>,
    #[serde(default)]
    pub signature: String,
}

impl SyncEnvelope {
    fn digest(&self, secret: &str) -> String {
        let key = blake3::hash(secret.as_bytes());
        let mut h = blake3::Hasher::new_keyed(key.as_bytes());
        h.update(self.sender_id.as_bytes());
        for (kind, pair) in &self.pairs {
            h.update(kind.as_bytes());
            h.update(&pair.version.to_be_bytes());
            h.update(pair.payload.to_string().as_bytes());
        }
        h.finalize().to_hex().to_string()
    }

    pub fn sign(&mut self, secret: &str) {
        self.signature = self.digest(secret);
    }

    pub fn verify(&self, secret: &str) -> bool {
        !self.signature.is_empty() && self.signature == self.digest(secret)
    }
}

/// Primary-side propagation engine for Smap/BMD/RMD/token-list waves.
/// Failed destinations are remembered and re-sent the latest snapshots by
/// the retry task until they catch up or leave the map.
pub struct Metasyncer {
    me: Arc<Snode>,
    client: reqwest::Client,
    config: Arc<GatewayConfig>,
    owners: Arc<Owners>,
    pending: Mutex<HashSet<String>>,
    /// Serializes waves so every destination sees versions in send order.
    send_gate: tokio::sync::Mutex<()>,
}

impl Metasyncer {
    pub fn new(
        me: Arc<Snode>,
        client: reqwest::Client,
        config: Arc<GatewayConfig>,
        owners: Arc<Owners>,
    ) -> Self {
        Metasyncer {
            me,
            client,
            config,
            owners,
            pending: Mutex::new(HashSet::new()),
            send_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// A wave that lost the race to a newer mutation of the same kind would
    /// be rejected everywhere; ship the owner's current snapshot instead.
    fn refresh_pair(&self, kind: &str, pair: RevsPair) -> RevsPair {
        match kind {
            KIND_SMAP => {
                let cur = self.owners.smap.get();
                if cur.version > pair.version {
                    return RevsPair::new(cur.version, &*cur, &pair.msg);
                }
            }
            KIND_BMD => {
                let cur = self.owners.bmd.get();
                if cur.version > pair.version {
                    return RevsPair::new(cur.version, &*cur, &pair.msg);
                }
            }
            KIND_RMD => {
                let cur = self.owners.rmd.get();
                if cur.version > pair.version {
                    return RevsPair::new(cur.version, &*cur, &pair.msg);
                }
            }
            KIND_TOKENS => {
                let cur = self.owners.tokens.get();
                if cur.version > pair.version {
                    return RevsPair::new(cur.version, &*cur, &pair.msg);
                }
            }
            _ => {}
        }
        pair
    }

    fn envelope(&self, pairs: Vec<(String, RevsPair)>) -> SyncEnvelope {
        let mut env = SyncEnvelope {
            sender_id: self.me.id.clone(),
            pairs: pairs.into_iter().collect(),
            signature: String::new(),
        };
        env.sign(&self.config.cluster_secret);
        env
    }

    /// Deliver `pairs` to every current Smap member. Only the primary may
    /// sync; calling this from a non-primary is a programming error.
    pub async fn sync(&self, pairs: Vec<(String, RevsPair)>) -> Result<(), ApiError> {
        let _gate = self.send_gate.lock().await;
        let smap = self.owners.smap.get();
        if !smap.is_primary(&self.me.id) {
            debug_assert!(false, "metasync sender must be primary");
            return Err(ApiError::Any(anyhow::anyhow!(
                "{} is not primary: refusing to metasync",
                self.me
            )));
        }
        let pairs = pairs
            .into_iter()
            .map(|(kind, pair)| {
                let pair = self.refresh_pair(&kind, pair);
                (kind, pair)
            })
            .collect();
        let env = self.envelope(pairs);
        let body = serde_json::to_vec(&env).expect("serializable envelope");
        let args = BcastArgs {
            method: Method::PUT,
            path: url_path(&[ROUTE_METASYNC]),
            query: Vec::new(),
            body: Some(body),
            timeout: self.config.cplane_timeout,
            scope: BcastScope::All,
            net: Net::IntraControl,
            skip_id: self.me.id.clone(),
            caller_id: self.me.id.clone(),
        };
        let mut rx = bcast_group(&self.client, &smap, args);
        let mut failed = Vec::new();
        while let Some(res) = rx.recv().await {
            if !res.is_ok() {
                tracing::warn!(
                    "metasync to {} failed: {}",
                    res.node,
                    res.err.as_deref().unwrap_or("?")
                );
                failed.push(res.node.id.clone());
            }
        }
        if !failed.is_empty() {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.extend(failed);
        }
        Ok(())
    }

    /// One-shot fan-out (GFN start and similar signals); no retry. The
    /// waiting form goes through the send gate like any other wave.
    pub async fn notify(&self, wait: bool, pairs: Vec<(String, RevsPair)>) -> Result<(), ApiError> {
        let gate = if wait { Some(self.send_gate.lock().await) } else { None };
        let smap = self.owners.smap.get();
        let pairs = pairs
            .into_iter()
            .map(|(kind, pair)| {
                let pair = self.refresh_pair(&kind, pair);
                (kind, pair)
            })
            .collect();
        let env = self.envelope(pairs);
        let body = serde_json::to_vec(&env).expect("serializable envelope");
        let args = BcastArgs {
            method: Method::PUT,
            path: url_path(&[ROUTE_METASYNC]),
            query: Vec::new(),
            body: Some(body),
            timeout: self.config.cplane_timeout,
            scope: BcastScope::All,
            net: Net::IntraControl,
            skip_id: self.me.id.clone(),
            caller_id: self.me.id.clone(),
        };
        let client = self.client.clone();
        if wait {
            let mut rx = bcast_group(&client, &smap, args);
            while rx.recv().await.is_some() {}
            drop(gate);
        } else {
            tokio::spawn(async move {
                let mut rx = bcast_group(&client, &smap, args);
                while rx.recv().await.is_some() {}
            });
        }
        Ok(())
    }

    /// Current owner snapshots as a full wave; what the retry task re-sends.
    pub fn latest_pairs(&self, msg: &ActionMsg) -> Vec<(String, RevsPair)> {
        let smap = self.owners.smap.get();
        let bmd = self.owners.bmd.get();
        let rmd = self.owners.rmd.get();
        let tokens = self.owners.tokens.get();
        let mut pairs = vec![
            (KIND_SMAP.to_string(), RevsPair::new(smap.version, &*smap, msg)),
            (KIND_BMD.to_string(), RevsPair::new(bmd.version, &*bmd, msg)),
            (KIND_RMD.to_string(), RevsPair::new(rmd.version, &*rmd, msg)),
        ];
        if !tokens.tokens.is_empty() {
            pairs.push((KIND_TOKENS.to_string(), RevsPair::new(tokens.version, &*tokens, msg)));
        }
        pairs
    }

    /// Re-send the latest snapshots to destinations that missed a wave.
    pub async fn retry_pending(&self) {
        let ids: Vec<String> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().collect()
        };
        if ids.is_empty() {
            return;
        }
        let _gate = self.send_gate.lock().await;
        let smap = self.owners.smap.get();
        if !smap.is_primary(&self.me.id) {
            return;
        }
        let env = self.envelope(self.latest_pairs(&ActionMsg::new("resync")));
        let body = serde_json::to_vec(&env).expect("serializable envelope");
        for id in ids {
            let Some(node) = smap.get_node(&id) else { continue };
            let res = crate::core::bcast::call(
                &self.client,
                node,
                Net::IntraControl,
                Method::PUT,
                &url_path(&[ROUTE_METASYNC]),
                &[],
                Some(body.clone()),
                self.config.cplane_timeout,
                &self.me.id,
            )
            .await;
            if !res.is_ok() {
                self.pending.lock().expect("pending lock poisoned").insert(id);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().expect("pending lock poisoned").is_empty()
    }

    /// Primary handover: cancel pending sync waves.
    pub fn become_non_primary(&self) {
        self.pending.lock().expect("pending lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_signature_roundtrip() {
        let msg = ActionMsg::new("test");
        let pair = RevsPair::new(3, &serde_json::json!({"version": 3}), &msg);
        let mut env = SyncEnvelope {
            sender_id: "p1".to_string(),
            pairs: [(KIND_SMAP.to_string(), pair)].into(),
            signature: String::new(),
        };
        env.sign("secret");
        assert!(env.verify("secret"));
        assert!(!env.verify("other-secret"));

        // Any tampering invalidates the signature.
        env.pairs.get_mut(KIND_SMAP).unwrap().version = 4;
        assert!(!env.verify("secret"));
    }
}
