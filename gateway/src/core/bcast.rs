use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use common::api_error::ApiError;
use common::constants::HDR_CALLER_NAME;

use crate::core::node::{Net, Snode};
use crate::core::smap::Smap;

/// Which slice of the cluster map a broadcast goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcastScope {
    Targets,
    Proxies,
    All,
}

#[derive(Debug, Clone)]
pub struct BcastArgs {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    pub scope: BcastScope,
    pub net: Net,
    /// Usually the caller itself; excluded from the destination set.
    pub skip_id: String,
    pub caller_id: String,
}

impl BcastArgs {
    pub fn to_targets(me: &Snode, path: &str, timeout: Duration) -> Self {
        BcastArgs {
            method: Method::GET,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
            timeout,
            scope: BcastScope::Targets,
            net: Net::IntraControl,
            skip_id: me.id.clone(),
            caller_id: me.id.clone(),
        }
    }

    pub fn to_all(me: &Snode, path: &str, timeout: Duration) -> Self {
        BcastArgs { scope: BcastScope::All, ..Self::to_targets(me, path, timeout) }
    }
}

/// Per-destination outcome. `status == 0` means the transport failed before
/// any HTTP status was produced.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub node: Snode,
    pub status: u16,
    pub bytes: Vec<u8>,
    pub err: Option<String>,
}

impl CallResult {
    pub fn is_ok(&self) -> bool {
        self.err.is_none() && (200..300).contains(&self.status)
    }

    pub fn not_found(&self) -> bool {
        self.status == 404
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.bytes).map_err(|e| {
            ApiError::Any(anyhow::anyhow!("{}: cannot decode reply: {}", self.node, e))
        })
    }

    pub fn to_api_error(&self) -> ApiError {
        match &self.err {
            Some(e) if self.status == 0 => {
                ApiError::Any(anyhow::anyhow!("{}: {}", self.node, e))
            }
            _ => ApiError::Upstream(
                self.status,
                format!("{}: {}", self.node, String::from_utf8_lossy(&self.bytes)),
            ),
        }
    }
}

/// One outbound call, never panics: transport errors land in `err`.
pub async fn call(
    client: &reqwest::Client,
    node: &Snode,
    net: Net,
    method: Method,
    path: &str,
    query: &[(String, String)],
    body: Option<Vec<u8>>,
    timeout: Duration,
    caller_id: &str,
) -> CallResult {
    let url = format!("{}{}", node.url(net), path);
    let mut req = client
        .request(method, &url)
        .timeout(timeout)
        .header(HDR_CALLER_NAME, caller_id)
        .query(query);
    if let Some(b) = body {
        req = req.header(reqwest::header::CONTENT_TYPE, "application/json").body(b);
    }
    match req.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let bytes = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            let err = if (200..300).contains(&status) {
                None
            } else {
                Some(format!("{} replied {}", node, status))
            };
            CallResult { node: node.clone(), status, bytes, err }
        }
        Err(e) => CallResult {
            node: node.clone(),
            status: 0,
            bytes: Vec::new(),
            err: Some(e.to_string()),
        },
    }
}

fn destinations(smap: &Smap, scope: BcastScope, skip_id: &str) -> Vec<Snode> {
    let iter: Box<dyn Iterator<Item = &Snode>> = match scope {
        BcastScope::Targets => Box::new(smap.targets.values()),
        BcastScope::Proxies => Box::new(smap.proxies.values()),
        BcastScope::All => Box::new(smap.proxies.values().chain(smap.targets.values())),
    };
    iter.filter(|n| n.id != skip_id).cloned().collect()
}

/// Fan out one request per destination and funnel results through a channel.
/// Callers must drain the channel; `drain_call_results` finishes the job on
/// early exit.
pub fn bcast_group(
    client: &reqwest::Client,
    smap: &Arc<Smap>,
    args: BcastArgs,
) -> mpsc::Receiver<CallResult> {
    let nodes = destinations(smap, args.scope, &args.skip_id);
    let (tx, rx) = mpsc::channel(nodes.len().max(1));
    for node in nodes {
        let tx = tx.clone();
        let client = client.clone();
        let args = args.clone();
        tokio::spawn(async move {
            let res = call(
                &client,
                &node,
                args.net,
                args.method.clone(),
                &args.path,
                &args.query,
                args.body.clone(),
                args.timeout,
                &args.caller_id,
            )
            .await;
            // Receiver may have gone away after an early abort.
            let _ = tx.send(res).await;
        });
    }
    rx
}

/// Consume whatever is left so sender tasks finish promptly.
pub async fn drain_call_results(rx: &mut mpsc::Receiver<CallResult>) {
    rx.close();
    while rx.recv().await.is_some() {}
}

/// Standard partial-failure policy: 404 from a subset is "not present
/// here"; 404 from everyone propagates 404; the first non-404 failure
/// aborts (the rest is drained). Returns the successful results.
pub async fn gather(mut rx: mpsc::Receiver<CallResult>) -> Result<Vec<CallResult>, ApiError> {
    let mut valid = Vec::new();
    let mut total = 0usize;
    let mut not_found = 0usize;
    while let Some(res) = rx.recv().await {
        total += 1;
        if res.is_ok() {
            valid.push(res);
            continue;
        }
        if res.not_found() {
            not_found += 1;
            continue;
        }
        let err = res.to_api_error();
        drain_call_results(&mut rx).await;
        return Err(err);
    }
    if total > 0 && not_found == total {
        return Err(ApiError::NotFound("not found on any node".to_string()));
    }
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::NodeKind;

    fn smap_of(proxies: &[&str], targets: &[&str]) -> Arc<Smap> {
        let mut smap = Smap { version: 1, ..Default::default() };
        for id in proxies {
            smap.put_node(Snode::new(id, NodeKind::Proxy, &format!("http://{}:1", id)));
        }
        for id in targets {
            smap.put_node(Snode::new(id, NodeKind::Target, &format!("http://{}:1", id)));
        }
        Arc::new(smap)
    }

    #[test]
    fn scope_selection_skips_self() {
        let smap = smap_of(&["p1", "p2"], &["t1", "t2", "t3"]);
        assert_eq!(destinations(&smap, BcastScope::Targets, "p1").len(), 3);
        assert_eq!(destinations(&smap, BcastScope::Proxies, "p1").len(), 1);
        assert_eq!(destinations(&smap, BcastScope::All, "t1").len(), 4);
    }

    fn res(id: &str, status: u16) -> CallResult {
        CallResult {
            node: Snode::new(id, NodeKind::Target, "http://x:1"),
            status,
            bytes: Vec::new(),
            err: if (200..300).contains(&status) {
                None
            } else {
                Some(format!("{} replied {}", id, status))
            },
        }
    }

    #[tokio::test]
    async fn gather_tolerates_partial_404() {
        let (tx, rx) = mpsc::channel(3);
        for r in [res("t1", 200), res("t2", 404), res("t3", 200)] {
            tx.send(r).await.unwrap();
        }
        drop(tx);
        let valid = gather(rx).await.unwrap();
        assert_eq!(valid.len(), 2);
    }

    #[tokio::test]
    async fn gather_propagates_all_404() {
        let (tx, rx) = mpsc::channel(2);
        for r in [res("t1", 404), res("t2", 404)] {
            tx.send(r).await.unwrap();
        }
        drop(tx);
        match gather(rx).await {
            Err(ApiError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn gather_aborts_on_first_real_error_and_drains() {
        let (tx, rx) = mpsc::channel(3);
        for r in [res("t1", 200), res("t2", 500), res("t3", 200)] {
            tx.send(r).await.unwrap();
        }
        drop(tx);
        let err = gather(rx).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 500);
    }
}
