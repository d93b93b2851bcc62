use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use common::api_error::ApiError;
use common::constants::{CIE_BMD_MAJORITY, CIE_BMD_SPLIT, CIE_BMD_UUID};
use common::schemas::{Bck, ACCESS_ALL};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BucketProps {
    #[serde(default)]
    pub ec_enabled: bool,
    #[serde(default = "default_mirror_count")]
    pub mirror_count: u32,
    #[serde(default = "default_access")]
    pub access: u64,
    /// Set while this bucket is becoming `renamed_to`; removed once targets
    /// acknowledge the rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_to: Option<String>,
    /// HTTP-origin buckets keep the original URL they were registered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_url: Option<String>,
    #[serde(default)]
    pub created_ms: i128,
}

fn default_mirror_count() -> u32 {
    1
}

fn default_access() -> u64 {
    ACCESS_ALL
}

impl Default for BucketProps {
    fn default() -> Self {
        BucketProps {
            ec_enabled: false,
            mirror_count: 1,
            access: ACCESS_ALL,
            renamed_to: None,
            orig_url: None,
            created_ms: 0,
        }
    }
}

impl BucketProps {
    pub fn allow(&self, bits: u64) -> bool {
        self.access & bits == bits
    }
}

/// Versioned bucket registry. Two BMDs with different UUIDs belong to
/// different clusters; mixing them is an integrity error.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Bmd {
    pub version: i64,
    #[serde(default)]
    pub uuid: String,
    /// Keyed by fully-qualified bucket; wired as an entry list since JSON
    /// maps only take string keys.
    #[serde(with = "buckets_serde", default)]
    pub buckets: BTreeMap<Bck, BucketProps>,
}

mod buckets_serde {
    use super::{Bck, BucketProps};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        m: &BTreeMap<Bck, BucketProps>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<(&Bck, &BucketProps)> = m.iter().collect();
        entries.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<Bck, BucketProps>, D::Error> {
        let entries: Vec<(Bck, BucketProps)> = Vec::deserialize(d)?;
        Ok(entries.into_iter().collect())
    }
}

impl Bmd {
    pub fn get(&self, bck: &Bck) -> Option<&BucketProps> {
        self.buckets.get(bck)
    }

    pub fn is_ec_used(&self) -> bool {
        self.buckets.values().any(|p| p.ec_enabled)
    }

    pub fn validate_uuid(&self, other: &Bmd, self_name: &str, caller: &str) -> Result<(), ApiError> {
        if self.uuid == other.uuid || self.version == 0 || other.version == 0 {
            return Ok(());
        }
        Err(ApiError::ClusterIntegrity {
            code: CIE_BMD_UUID,
            detail: format!(
                "BMD UUID mismatch: {} has {} (v{}), {} has {} (v{})",
                self_name, self.uuid, self.version, caller, other.uuid, other.version
            ),
        })
    }
}

impl std::fmt::Display for Bmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BMD v{}[{}, buckets {}]", self.version, self.uuid, self.buckets.len())
    }
}

pub struct BmdOwner {
    inner: RwLock<Arc<Bmd>>,
}

impl BmdOwner {
    pub fn new(bmd: Bmd) -> Self {
        BmdOwner { inner: RwLock::new(Arc::new(bmd)) }
    }

    pub fn get(&self) -> Arc<Bmd> {
        self.inner.read().expect("bmd lock poisoned").clone()
    }

    pub fn put(&self, new: Bmd) -> Result<(), ApiError> {
        let mut guard = self.inner.write().expect("bmd lock poisoned");
        if new.version <= guard.version && guard.version != 0 {
            return Err(ApiError::Conflict(format!(
                "attempt to downgrade {} to {}",
                guard, new
            )));
        }
        *guard = Arc::new(new);
        Ok(())
    }

    pub fn put_force(&self, new: Bmd) {
        *self.inner.write().expect("bmd lock poisoned") = Arc::new(new);
    }

    pub fn modify<E>(
        &self,
        pre: impl FnOnce(&mut Bmd) -> Result<(), E>,
        post: impl FnOnce(Arc<Bmd>),
    ) -> Result<Arc<Bmd>, E> {
        let installed = {
            let mut guard = self.inner.write().expect("bmd lock poisoned");
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

    /// Receive-side install. On UUID mismatch the primary fails the request;
    /// a non-primary logs the integrity error and accepts the newer BMD.
    pub fn synchronize(
        &self,
        incoming: Bmd,
        self_is_primary: bool,
        self_name: &str,
        caller: &str,
    ) -> Result<(), ApiError> {
        let mut guard = self.inner.write().expect("bmd lock poisoned");
        if let Err(cie) = guard.validate_uuid(&incoming, self_name, caller) {
            if self_is_primary {
                return Err(cie);
            }
            tracing::error!("{} (non-primary): {} - overriding BMD", self_name, cie);
        } else if incoming.version <= guard.version {
            if incoming.version < guard.version {
                return Err(ApiError::Conflict(format!(
                    "attempt to downgrade {} to {}",
                    guard, incoming
                )));
            }
            return Ok(());
        }
        *guard = Arc::new(incoming);
        Ok(())
    }
}

/// Pick the recovery BMD from per-target replies: same-UUID fast path takes
/// max(version); differing UUIDs resolve by simple majority, erroring on a
/// split.
pub fn resolve_uuid_bmd(bmds: &[(String, Bmd)]) -> Result<Bmd, ApiError> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut maxver: BTreeMap<&str, &Bmd> = BTreeMap::new();
    for (_, bmd) in bmds {
        if bmd.version == 0 {
            continue;
        }
        *counts.entry(bmd.uuid.as_str()).or_insert(0) += 1;
        maxver
            .entry(bmd.uuid.as_str())
            .and_modify(|cur| {
                if cur.version < bmd.version {
                    *cur = bmd;
                }
            })
            .or_insert(bmd);
    }
    if counts.is_empty() {
        return Err(ApiError::NotFound("no BMD replies to recover from".to_string()));
    }
    let (&winner, &wcount) = counts.iter().max_by_key(|(_, c)| **c).expect("non-empty");
    let split = counts.iter().any(|(u, c)| *c == wcount && *u != winner);
    if split {
        return Err(ApiError::ClusterIntegrity {
            code: CIE_BMD_SPLIT,
            detail: "BMDs have different uuids with no simple majority".to_string(),
        });
    }
    let chosen = (*maxver.get(winner).expect("winner counted")).clone();
    if counts.len() > 1 {
        // Majority exists but minorities disagree; callers may force-accept.
        return Err(ApiError::ClusterIntegrity {
            code: CIE_BMD_MAJORITY,
            detail: format!("BMDs have different uuids with simple majority: {}", winner),
        });
    }
    Ok(chosen)
}

/// The force path still needs the majority-or-max BMD a failed
/// `resolve_uuid_bmd` would have chosen.
pub fn resolve_uuid_bmd_force(bmds: &[(String, Bmd)]) -> Option<Bmd> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut maxver: BTreeMap<&str, Bmd> = BTreeMap::new();
    for (_, bmd) in bmds {
        if bmd.version == 0 {
            continue;
        }
        *counts.entry(bmd.uuid.as_str()).or_insert(0) += 1;
        let e = maxver.entry(bmd.uuid.as_str()).or_insert_with(|| bmd.clone());
        if e.version < bmd.version {
            *e = bmd.clone();
        }
    }
    let winner = counts.iter().max_by_key(|(u, c)| (**c, std::cmp::Reverse(**u)))?.0;
    maxver.get(*winner).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bmd(uuid: &str, version: i64) -> Bmd {
        Bmd { version, uuid: uuid.to_string(), buckets: BTreeMap::new() }
    }

    #[test]
    fn synchronize_monotonic() {
        let owner = BmdOwner::new(bmd("u", 3));
        owner.synchronize(bmd("u", 5), true, "p1", "p2").unwrap();
        assert_eq!(owner.get().version, 5);
        assert!(owner.synchronize(bmd("u", 4), true, "p1", "p2").is_err());
        assert_eq!(owner.get().version, 5);
    }

    #[test]
    fn uuid_mismatch_fatal_on_primary_overridden_otherwise() {
        let owner = BmdOwner::new(bmd("a", 3));
        assert!(owner.synchronize(bmd("b", 9), true, "p1", "p2").is_err());
        assert_eq!(owner.get().uuid, "a");
        owner.synchronize(bmd("b", 9), false, "p1", "p2").unwrap();
        assert_eq!(owner.get().uuid, "b");
        assert_eq!(owner.get().version, 9);
    }

    #[test]
    fn recover_same_uuid_takes_max() {
        let replies = vec![("t1".to_string(), bmd("a", 3)), ("t2".to_string(), bmd("a", 5))];
        let r = resolve_uuid_bmd(&replies).unwrap();
        assert_eq!((r.uuid.as_str(), r.version), ("a", 5));
    }

    #[test]
    fn recover_split_brain_errors_then_force_resolves() {
        // Scenario: {A,v3}, {A,v5}, {B,v7}: majority A wins under force.
        let replies = vec![
            ("t1".to_string(), bmd("a", 3)),
            ("t2".to_string(), bmd("a", 5)),
            ("t3".to_string(), bmd("b", 7)),
        ];
        let err = resolve_uuid_bmd(&replies).unwrap_err();
        assert!(err.to_string().contains("cie#"));
        let forced = resolve_uuid_bmd_force(&replies).unwrap();
        assert_eq!((forced.uuid.as_str(), forced.version), ("a", 5));
    }

    #[test]
    fn recover_no_majority_is_split() {
        let replies = vec![("t1".to_string(), bmd("a", 3)), ("t2".to_string(), bmd("b", 7))];
        match resolve_uuid_bmd(&replies) {
            Err(ApiError::ClusterIntegrity { code, detail }) => {
                assert_eq!(code, CIE_BMD_SPLIT);
                assert!(detail.contains("no simple majority"));
            }
            other => panic!("expected split error, got {:?}", other.map(|b| b.version)),
        }
    }
}
