use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use common::schemas::{Bck, NotifMsg};
use common::time_utils::utc_now_ms;

/// Server-side record tracking one long-running job. Owned by a single IC
/// proxy; mirrored to the other IC members through the ownership table.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotifListener {
    pub uuid: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bck: Option<Bck>,
    pub owner_id: String,
    /// Fallback when the owner leaves the IC: re-elected by rendezvous hash.
    #[serde(default)]
    pub smap_version: i64,
    /// Per-target progress snapshots.
    #[serde(default)]
    pub stats: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub finished: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(default)]
    pub added_ms: i128,
}

impl NotifListener {
    pub fn new(uuid: &str, action: &str, bck: Option<Bck>, smap_version: i64) -> Self {
        NotifListener {
            uuid: uuid.to_string(),
            action: action.to_string(),
            bck,
            owner_id: String::new(),
            smap_version,
            stats: BTreeMap::new(),
            finished: BTreeSet::new(),
            err: None,
            added_ms: utc_now_ms(),
        }
    }

    pub fn all_finished(&self, expected: usize) -> bool {
        expected > 0 && self.finished.len() >= expected
    }
}

/// UUID-keyed registry of listeners on this proxy.
#[derive(Default)]
pub struct NotifRegistry {
    m: RwLock<HashMap<String, NotifListener>>,
}

impl NotifRegistry {
    pub fn add(&self, nl: NotifListener) {
        self.m.write().expect("notifs lock poisoned").insert(nl.uuid.clone(), nl);
    }

    pub fn get(&self, uuid: &str) -> Option<NotifListener> {
        self.m.read().expect("notifs lock poisoned").get(uuid).cloned()
    }

    pub fn remove(&self, uuid: &str) -> Option<NotifListener> {
        self.m.write().expect("notifs lock poisoned").remove(uuid)
    }

    pub fn entries(&self) -> Vec<NotifListener> {
        self.m.read().expect("notifs lock poisoned").values().cloned().collect()
    }

    /// Merge an ownership table from another IC member. Existing local
    /// listeners keep whichever side carries more progress.
    pub fn merge_table(&self, table: Vec<NotifListener>) {
        let mut m = self.m.write().expect("notifs lock poisoned");
        for nl in table {
            match m.get_mut(&nl.uuid) {
                Some(cur) => {
                    if nl.stats.len() > cur.stats.len() || nl.finished.len() > cur.finished.len() {
                        *cur = nl;
                    }
                }
                None => {
                    m.insert(nl.uuid.clone(), nl);
                }
            }
        }
    }

    /// Apply a target progress update; returns false for unknown jobs.
    pub fn update_progress(&self, msg: &NotifMsg) -> bool {
        let mut m = self.m.write().expect("notifs lock poisoned");
        let Some(nl) = m.get_mut(&msg.uuid) else {
            return false;
        };
        nl.stats.insert(msg.node_id.clone(), msg.stats.clone());
        if msg.finished {
            nl.finished.insert(msg.node_id.clone());
        }
        if !msg.err.is_empty() {
            nl.err = Some(msg.err.clone());
        }
        true
    }

    pub fn query_stats(&self, uuid: &str) -> Option<Vec<serde_json::Value>> {
        self.m
            .read()
            .expect("notifs lock poisoned")
            .get(uuid)
            .map(|nl| nl.stats.values().cloned().collect())
    }

    /// Re-elect owners after a cluster-map change. `new_owner` returns None
    /// to leave a listener with its current owner.
    pub fn reassign_owners(&self, new_owner: impl Fn(&NotifListener) -> Option<String>) {
        let mut m = self.m.write().expect("notifs lock poisoned");
        for nl in m.values_mut() {
            if let Some(owner) = new_owner(nl) {
                if owner != nl.owner_id {
                    tracing::info!("listener {}: owner {} -> {}", nl.uuid, nl.owner_id, owner);
                    nl.owner_id = owner;
                }
            }
        }
    }
}
