use blake3::Hasher;

use common::api_error::ApiError;

use crate::core::node::Snode;
use crate::core::smap::Smap;

const N_TOP_BYTES_FOR_SCORE: usize = 16;

fn score(key: &str, node_id: &str) -> u128 {
    let mut h = Hasher::new();
    h.update(key.as_bytes());
    h.update(node_id.as_bytes());

    let hash = h.finalize();
    let mut score_bytes = [0u8; N_TOP_BYTES_FOR_SCORE];
    score_bytes.copy_from_slice(&hash.as_bytes()[0..N_TOP_BYTES_FOR_SCORE]);
    u128::from_be_bytes(score_bytes)
}

fn hrw_max<'a>(key: &str, nodes: impl Iterator<Item = &'a Snode>) -> Option<&'a Snode> {
    // Ties break on the lexicographically smaller id.
    nodes.max_by(|a, b| {
        score(key, &a.id)
            .cmp(&score(key, &b.id))
            .then_with(|| b.id.cmp(&a.id))
    })
}

/// Highest-random-weight target for `uname`. Deterministic in
/// (uname, smap.targets) regardless of insertion order.
pub fn hrw_target<'a>(uname: &str, smap: &'a Smap) -> Result<&'a Snode, ApiError> {
    hrw_max(uname, smap.targets.values())
        .ok_or_else(|| ApiError::NotReady("no registered targets".to_string()))
}

/// Owner election within the information council.
pub fn hrw_ic_member<'a>(uuid: &str, smap: &'a Smap) -> Result<&'a Snode, ApiError> {
    hrw_max(uuid, smap.ic_members().into_iter())
        .ok_or_else(|| ApiError::NotReady("empty information council".to_string()))
}

/// Next primary candidate: the hrw-max electable proxy, skipping `exclude`.
pub fn hrw_proxy<'a>(smap: &'a Smap, exclude: &str) -> Result<&'a Snode, ApiError> {
    hrw_max(
        &smap.uuid,
        smap.proxies
            .values()
            .filter(|p| p.id != exclude && !p.non_electable),
    )
    .ok_or_else(|| ApiError::NotReady("no electable proxies".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::{NodeKind, Snode};

    fn smap_with_targets(ids: &[&str]) -> Smap {
        let mut smap = Smap { version: 1, uuid: "u".to_string(), ..Default::default() };
        for id in ids {
            smap.put_node(Snode::new(id, NodeKind::Target, &format!("http://{}:1", id)));
        }
        smap
    }

    #[test]
    fn deterministic_across_insertion_order() {
        let a = smap_with_targets(&["t1", "t2", "t3"]);
        let b = smap_with_targets(&["t3", "t1", "t2"]);
        for obj in ["x", "y", "some/longer/object-name", ""] {
            let uname = format!("Local///b/{}", obj);
            assert_eq!(hrw_target(&uname, &a).unwrap().id, hrw_target(&uname, &b).unwrap().id);
        }
    }

    #[test]
    fn spreads_keys() {
        let smap = smap_with_targets(&["t1", "t2", "t3", "t4"]);
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            seen.insert(hrw_target(&format!("k{}", i), &smap).unwrap().id.clone());
        }
        assert!(seen.len() > 1, "all keys mapped to a single target");
    }

    #[test]
    fn empty_target_set_errors() {
        let smap = smap_with_targets(&[]);
        assert!(hrw_target("k", &smap).is_err());
    }
}
