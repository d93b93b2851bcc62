use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use common::api_error::ApiError;
use common::constants::{CIE_SMAP_UUID, IC_SIZE};

use crate::core::node::{NodeKind, Snode};

/// Versioned cluster map. Mutation goes through `SmapOwner` only; readers
/// hold an `Arc` snapshot and never observe a partial update.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Smap {
    pub version: i64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub primary_id: String,
    pub proxies: BTreeMap<String, Snode>,
    pub targets: BTreeMap<String, Snode>,
    /// Information council: member id -> age (smap version at induction).
    #[serde(default)]
    pub ic: BTreeMap<String, i64>,
}

impl Smap {
    pub fn primary(&self) -> Option<&Snode> {
        self.proxies.get(&self.primary_id)
    }

    pub fn is_primary(&self, id: &str) -> bool {
        !self.primary_id.is_empty() && self.primary_id == id
    }

    pub fn get_node(&self, id: &str) -> Option<&Snode> {
        self.proxies.get(id).or_else(|| self.targets.get(id))
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.get_node(id).is_some()
    }

    pub fn count_proxies(&self) -> usize {
        self.proxies.len()
    }

    pub fn count_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn is_valid(&self) -> bool {
        self.version > 0 && self.primary().is_some()
    }

    pub fn is_ic(&self, id: &str) -> bool {
        self.ic.contains_key(id)
    }

    pub fn ic_members(&self) -> Vec<&Snode> {
        self.ic.keys().filter_map(|id| self.proxies.get(id)).collect()
    }

    /// Insert or replace a node. Returns true when a node with the same id
    /// was already present.
    pub fn put_node(&mut self, node: Snode) -> bool {
        let existed = self.contains_id(&node.id);
        match node.kind {
            NodeKind::Proxy => self.proxies.insert(node.id.clone(), node),
            NodeKind::Target => self.targets.insert(node.id.clone(), node),
        };
        existed
    }

    pub fn del_node(&mut self, id: &str) {
        self.proxies.remove(id);
        self.targets.remove(id);
        self.ic.remove(id);
    }

    /// Keep IC ⊆ proxies and topped up to IC_SIZE. The primary is always a
    /// member; new members get age = current version.
    pub fn staff_ic(&mut self) {
        let proxies: Vec<String> = self.proxies.keys().cloned().collect();
        self.ic.retain(|id, _| proxies.contains(id));
        if !self.primary_id.is_empty() && !self.ic.contains_key(&self.primary_id) {
            self.ic.insert(self.primary_id.clone(), self.version);
        }
        for id in proxies {
            if self.ic.len() >= IC_SIZE {
                break;
            }
            self.ic.entry(id).or_insert(self.version);
        }
    }

    /// A joining node must not reuse another member's URL.
    pub fn is_duplicate_url(&self, nsi: &Snode) -> Option<&Snode> {
        self.proxies
            .values()
            .chain(self.targets.values())
            .find(|osi| osi.id != nsi.id && osi.public.url == nsi.public.url)
    }

    pub fn validate_uuid(&self, other: &Smap, self_name: &str, caller: &str) -> Result<(), ApiError> {
        if self.uuid.is_empty() || other.uuid.is_empty() || self.uuid == other.uuid {
            return Ok(());
        }
        Err(ApiError::ClusterIntegrity {
            code: CIE_SMAP_UUID,
            detail: format!(
                "Smap UUID mismatch: {} has {}, {} has {}",
                self_name, self.uuid, caller, other.uuid
            ),
        })
    }
}

impl std::fmt::Display for Smap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Smap v{}[{}, p{}, t{}]",
            self.version,
            self.uuid,
            self.proxies.len(),
            self.targets.len()
        )
    }
}

/// Single-writer owner with lock-free read snapshots.
pub struct SmapOwner {
    inner: RwLock<Arc<Smap>>,
}

impl SmapOwner {
    pub fn new(smap: Smap) -> Self {
        SmapOwner { inner: RwLock::new(Arc::new(smap)) }
    }

    pub fn get(&self) -> Arc<Smap> {
        self.inner.read().expect("smap lock poisoned").clone()
    }

    /// Install `new` if strictly newer; same-or-lower versions are rejected.
    pub fn put(&self, new: Smap) -> Result<(), ApiError> {
        let mut guard = self.inner.write().expect("smap lock poisoned");
        let cur = guard.clone();
        if !cur.uuid.is_empty() && !new.uuid.is_empty() && cur.uuid != new.uuid {
            return Err(ApiError::ClusterIntegrity {
                code: CIE_SMAP_UUID,
                detail: format!("refusing to install {} over {}", new, cur),
            });
        }
        if new.version <= cur.version && cur.version != 0 {
            return Err(ApiError::Conflict(format!(
                "attempt to downgrade {} to {}",
                cur, new
            )));
        }
        *guard = Arc::new(new);
        Ok(())
    }

    /// Force-install without version checks; forceful rejoin only.
    pub fn put_force(&self, new: Smap) {
        let mut guard = self.inner.write().expect("smap lock poisoned");
        *guard = Arc::new(new);
    }

    /// Clone-modify-publish. `pre` mutates the clone under the write lock;
    /// `post` observes the installed snapshot after the lock is dropped.
    /// The version always moves forward: +1 unless `pre` bumped it further.
    pub fn modify<E>(
        &self,
        pre: impl FnOnce(&mut Smap) -> Result<(), E>,
        post: impl FnOnce(Arc<Smap>),
    ) -> Result<Arc<Smap>, E> {
        let installed = {
            let mut guard = self.inner.write().expect("smap lock poisoned");
            let old_version = guard.version;
            let mut clone = (**guard).clone();
            pre(&mut clone)?;
            if clone.version <= old_version {
                clone.version = old_version + 1;
            }
            let installed = Arc::new(clone);
            *guard = installed.clone();
            installed
        };
        post(installed.clone());
        Ok(installed)
    }

    /// Install `incoming` if newer. An older incoming version is an error
    /// only when `lesser_is_err`; equal versions are a no-op either way.
    pub fn synchronize(&self, incoming: Smap, lesser_is_err: bool) -> Result<(), ApiError> {
        let mut guard = self.inner.write().expect("smap lock poisoned");
        let cur = guard.clone();
        if !cur.uuid.is_empty() && !incoming.uuid.is_empty() && cur.uuid != incoming.uuid {
            return Err(ApiError::ClusterIntegrity {
                code: CIE_SMAP_UUID,
                detail: format!("{} vs incoming {}", cur, incoming),
            });
        }
        if incoming.version < cur.version {
            if lesser_is_err {
                return Err(ApiError::Conflict(format!(
                    "attempt to downgrade {} to {}",
                    cur, incoming
                )));
            }
            return Ok(());
        }
        if incoming.version == cur.version {
            return Ok(());
        }
        *guard = Arc::new(incoming);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::{NodeKind, Snode};

    fn smap_with(version: i64, uuid: &str) -> Smap {
        let mut smap = Smap { version, uuid: uuid.to_string(), ..Default::default() };
        let p = Snode::new("p1", NodeKind::Proxy, "http://p1:8080");
        smap.primary_id = p.id.clone();
        smap.put_node(p);
        smap
    }

    #[test]
    fn synchronize_takes_max_version() {
        let owner = SmapOwner::new(smap_with(3, "u"));
        owner.synchronize(smap_with(5, "u"), true).unwrap();
        assert_eq!(owner.get().version, 5);
        // same version: no-op, no error
        owner.synchronize(smap_with(5, "u"), true).unwrap();
        assert_eq!(owner.get().version, 5);
        // lower version with lesser_is_err
        assert!(owner.synchronize(smap_with(4, "u"), true).is_err());
        owner.synchronize(smap_with(4, "u"), false).unwrap();
        assert_eq!(owner.get().version, 5);
    }

    #[test]
    fn put_rejects_uuid_change() {
        let owner = SmapOwner::new(smap_with(3, "a"));
        assert!(owner.put(smap_with(9, "b")).is_err());
        assert!(owner.put(smap_with(9, "a")).is_ok());
    }

    #[test]
    fn modify_bumps_version_once() {
        let owner = SmapOwner::new(smap_with(1, "u"));
        let mut post_version = 0;
        owner
            .modify::<()>(
                |clone| {
                    clone.put_node(Snode::new("t1", NodeKind::Target, "http://t1:8080"));
                    Ok(())
                },
                |snap| post_version = snap.version,
            )
            .unwrap();
        assert_eq!(owner.get().version, 2);
        assert_eq!(post_version, 2);
        assert!(owner.get().contains_id("t1"));
    }

    #[test]
    fn staff_ic_bounded_and_subset() {
        let mut smap = smap_with(1, "u");
        for i in 2..=5 {
            smap.put_node(Snode::new(&format!("p{}", i), NodeKind::Proxy, &format!("http://p{}:1", i)));
        }
        smap.staff_ic();
        assert!(smap.ic.len() <= IC_SIZE);
        assert!(smap.is_ic("p1")); // primary always in
        for id in smap.ic.keys() {
            assert!(smap.proxies.contains_key(id));
        }
    }

    #[test]
    fn duplicate_url_detected() {
        let mut smap = smap_with(1, "u");
        smap.put_node(Snode::new("t1", NodeKind::Target, "http://shared:9090"));
        let dup = Snode::new("t2", NodeKind::Target, "http://shared:9090");
        assert!(smap.is_duplicate_url(&dup).is_some());
        let ok = Snode::new("t3", NodeKind::Target, "http://other:9090");
        assert!(smap.is_duplicate_url(&ok).is_none());
    }
}
