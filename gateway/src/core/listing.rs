use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use common::schemas::{Bck, ObjEntry};

/// Entries a target returned past what the client has consumed, plus the
/// last key seen from that target.
#[derive(Debug, Default)]
struct TargetBuffer {
    entries: VecDeque<ObjEntry>,
    last: String,
    /// Target returned a short page: nothing more to fetch there.
    done: bool,
}

#[derive(Debug, Default)]
struct ListingBuffer {
    targets: HashMap<String, TargetBuffer>,
}

impl ListingBuffer {
    /// Pop up to `page_size` globally smallest entries (> `token`).
    /// `has_enough` when a full page came out or every target is drained.
    fn pop_merged(&mut self, token: &str, page_size: usize) -> (Vec<ObjEntry>, bool) {
        let mut out = Vec::with_capacity(page_size);
        while out.len() < page_size {
            // Skip anything at or below the continuation token.
            for tb in self.targets.values_mut() {
                while tb.entries.front().is_some_and(|e| e.name.as_str() <= token) {
                    tb.entries.pop_front();
                }
            }
            let Some(tid) = self
                .targets
                .iter()
                .filter(|(_, tb)| !tb.entries.is_empty())
                .min_by(|(_, a), (_, b)| a.entries[0].name.cmp(&b.entries[0].name))
                .map(|(tid, _)| tid.clone())
            else {
                break;
            };
            let entry = self
                .targets
                .get_mut(&tid)
                .and_then(|tb| tb.entries.pop_front())
                .expect("non-empty buffer selected");
            if out.last().map(|e: &ObjEntry| e.name == entry.name).unwrap_or(false) {
                continue; // duplicate across targets
            }
            out.push(entry);
        }
        let drained = !self.targets.is_empty()
            && self.targets.values().all(|tb| tb.entries.is_empty() && tb.done);
        let has_enough = out.len() >= page_size || drained;
        (out, has_enough)
    }

    /// Continuation token for the refill broadcast: the minimum of what each
    /// still-active target has been asked up to, so nothing is re-requested.
    fn refill_token(&self, token: &str) -> String {
        self.targets
            .values()
            .filter(|tb| !tb.done)
            .map(|tb| tb.last.as_str())
            .min()
            .filter(|last| !last.is_empty())
            .unwrap_or(token)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheId {
    pub bck: Bck,
    pub prefix: String,
    pub props: String,
}

/// Cached page keyed by its continuation token; a hit must carry at least
/// the requested page size (or be terminal).
#[derive(Debug, Clone)]
struct CachedPage {
    entries: Vec<ObjEntry>,
    complete: bool,
}

/// Per-listing target buffers plus the optional client-side page cache.
#[derive(Default)]
pub struct QueryMem {
    buffers: Mutex<HashMap<String, ListingBuffer>>,
    cache: Mutex<HashMap<CacheId, HashMap<String, CachedPage>>>,
}

impl QueryMem {
    /// Try to serve a page out of buffered target entries.
    pub fn buf_get(&self, uuid: &str, token: &str, page_size: usize) -> (Vec<ObjEntry>, bool) {
        let mut buffers = self.buffers.lock().expect("listing buffers lock poisoned");
        let buf = buffers.entry(uuid.to_string()).or_default();
        buf.pop_merged(token, page_size)
    }

    /// Insert one target's page. A short page marks that target as done.
    pub fn buf_set(&self, uuid: &str, tid: &str, entries: Vec<ObjEntry>, page_size: usize) {
        let mut buffers = self.buffers.lock().expect("listing buffers lock poisoned");
        let buf = buffers.entry(uuid.to_string()).or_default();
        let tb = buf.targets.entry(tid.to_string()).or_default();
        tb.done = entries.len() < page_size;
        if let Some(last) = entries.last() {
            tb.last = last.name.clone();
        }
        tb.entries.extend(entries);
    }

    pub fn buf_last(&self, uuid: &str, token: &str) -> String {
        let mut buffers = self.buffers.lock().expect("listing buffers lock poisoned");
        buffers.entry(uuid.to_string()).or_default().refill_token(token)
    }

    pub fn buf_drop(&self, uuid: &str) {
        self.buffers.lock().expect("listing buffers lock poisoned").remove(uuid);
    }

    pub fn cache_get(&self, id: &CacheId, token: &str, page_size: usize) -> Option<Vec<ObjEntry>> {
        let cache = self.cache.lock().expect("listing cache lock poisoned");
        let page = cache.get(id)?.get(token)?;
        if page.entries.len() >= page_size || page.complete {
            return Some(page.entries.iter().take(page_size).cloned().collect());
        }
        None
    }

    pub fn cache_set(
        &self,
        id: &CacheId,
        token: &str,
        entries: Vec<ObjEntry>,
        page_size: usize,
    ) {
        let complete = entries.len() < page_size;
        let mut cache = self.cache.lock().expect("listing cache lock poisoned");
        cache
            .entry(id.clone())
            .or_default()
            .insert(token.to_string(), CachedPage { entries, complete });
    }

    /// Invalidate every cached page of a bucket (any prefix/props).
    pub fn cache_invalidate(&self, bck: &Bck) {
        let mut cache = self.cache.lock().expect("listing cache lock poisoned");
        cache.retain(|id, _| &id.bck != bck);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str]) -> Vec<ObjEntry> {
        names.iter().map(|n| ObjEntry::named(n)).collect()
    }

    #[test]
    fn merged_pop_is_globally_sorted_and_unique() {
        let qm = QueryMem::default();
        qm.buf_set("u", "t1", entries(&["a", "c", "e"]), 3);
        qm.buf_set("u", "t2", entries(&["b", "c", "d"]), 3);

        let (page, has_enough) = qm.buf_get("u", "", 4);
        assert!(has_enough);
        let names: Vec<_> = page.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);

        // Second page continues where the first stopped; nothing repeats.
        let (page2, _) = qm.buf_get("u", "d", 4);
        let names2: Vec<_> = page2.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names2, vec!["e"]);
    }

    #[test]
    fn short_pages_mean_drained() {
        let qm = QueryMem::default();
        qm.buf_set("u", "t1", entries(&["a"]), 10); // short page: target done
        let (page, has_enough) = qm.buf_get("u", "", 5);
        assert_eq!(page.len(), 1);
        assert!(has_enough, "all targets drained counts as enough");
    }

    #[test]
    fn refill_token_is_min_of_active_targets() {
        let qm = QueryMem::default();
        qm.buf_set("u", "t1", entries(&["a", "b"]), 2); // last=b, active
        qm.buf_set("u", "t2", entries(&["c", "d"]), 2); // last=d, active
        qm.buf_set("u", "t3", entries(&["x"]), 2); // short: done, ignored
        assert_eq!(qm.buf_last("u", ""), "b");
    }

    #[test]
    fn cache_hit_requires_full_page() {
        let qm = QueryMem::default();
        let id = CacheId { bck: Bck::local("b"), prefix: String::new(), props: String::new() };
        qm.cache_set(&id, "", entries(&["a", "b", "c"]), 3);
        assert!(qm.cache_get(&id, "", 3).is_some());
        assert!(qm.cache_get(&id, "", 4).is_none(), "partial non-terminal page is a miss");
        assert!(qm.cache_get(&id, "zz", 3).is_none(), "different token is a miss");

        qm.cache_invalidate(&Bck::local("b"));
        assert!(qm.cache_get(&id, "", 3).is_none());
    }

    #[test]
    fn terminal_cached_page_serves_smaller_requests() {
        let qm = QueryMem::default();
        let id = CacheId { bck: Bck::local("b"), prefix: String::new(), props: String::new() };
        qm.cache_set(&id, "t", entries(&["x"]), 5); // short: bucket ends here
        assert_eq!(qm.cache_get(&id, "t", 5).unwrap().len(), 1);
    }
}
