use axum::body::Body;
use axum::http::{HeaderMap, Method as AxMethod, StatusCode};
use axum::response::Response;
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use common::api_error::ApiError;

use crate::core::node::{Net, Snode};
use crate::core::smap::Smap;

/// Headers that must not travel across the proxy hop.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Per-destination HTTP client-with-rewrite, cached per node id, plus the
/// primary forwarder and the stateless origin-GET forwarder. All entries
/// share one transport.
pub struct RproxyFabric {
    client: reqwest::Client,
    /// Cached primary public URL; rebuilt lazily when the primary moves.
    primary_url: Mutex<String>,
    /// node id -> base URL; pruned when nodes leave the Smap.
    nodes: RwLock<HashMap<String, String>>,
}

impl RproxyFabric {
    pub fn new(client: reqwest::Client) -> Self {
        RproxyFabric {
            client,
            primary_url: Mutex::new(String::new()),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Relay a request to `base_url`, re-attaching the buffered body with
    /// correct content length, and stream the reply back.
    pub async fn reverse_request(
        &self,
        base_url: &str,
        method: AxMethod,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Vec<u8>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", base_url, path_and_query);
        let rmethod = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|_| ApiError::BadRequest(format!("invalid method {}", method)))?;

        // HEAD requests must carry no body.
        let body = if method == AxMethod::HEAD { Vec::new() } else { body };

        let mut req = self.client.request(rmethod, &url);
        for (name, value) in headers {
            if !is_hop_header(name.as_str()) {
                req = req.header(name, value);
            }
        }
        if !body.is_empty() {
            req = req.header(reqwest::header::CONTENT_LENGTH, body.len()).body(body);
        }

        let upstream = req.send().await?;
        let status =
            StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

        let mut builder = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            if !is_hop_header(name.as_str()) {
                builder = builder.header(name, value);
            }
        }
        let stream = upstream
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e));
        builder
            .body(Body::from_stream(stream))
            .map_err(|e| ApiError::Any(anyhow::anyhow!("response build: {}", e)))
    }

    /// Forward a control-plane write to the current primary. The cached URL
    /// is double-checked against the Smap and rebuilt when the primary moved.
    pub async fn forward_to_primary(
        &self,
        smap: &Smap,
        method: AxMethod,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Vec<u8>,
    ) -> Result<Response, ApiError> {
        let primary = smap
            .primary()
            .ok_or_else(|| ApiError::NotReady("no primary in cluster map".to_string()))?;
        let base = {
            let mut cached = self.primary_url.lock().expect("primary url lock poisoned");
            if *cached != primary.public.url {
                *cached = primary.public.url.clone();
            }
            cached.clone()
        };
        tracing::info!("forwarding {} {} to primary {}", method, path_and_query, primary);
        self.reverse_request(&base, method, path_and_query, headers, body).await
    }

    /// Reverse-proxy to a specific cluster node; the per-node entry is
    /// created on demand.
    pub async fn reverse_to_node(
        &self,
        node: &Snode,
        net: Net,
        method: AxMethod,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Vec<u8>,
    ) -> Result<Response, ApiError> {
        let base = {
            let mut nodes = self.nodes.write().expect("rproxy nodes lock poisoned");
            nodes
                .entry(node.id.clone())
                .or_insert_with(|| node.url(net).to_string())
                .clone()
        };
        self.reverse_request(&base, method, path_and_query, headers, body).await
    }

    /// Drop cached entries for nodes no longer in the map.
    pub fn prune(&self, old: &Smap, new: &Smap) {
        let mut nodes = self.nodes.write().expect("rproxy nodes lock poisoned");
        nodes.retain(|id, _| !(old.contains_id(id) && !new.contains_id(id)));
    }

    /// Stateless GET forwarder for HTTP-origin buckets.
    pub async fn forward_origin(
        &self,
        orig_url: &str,
        object: &str,
        headers: &HeaderMap,
    ) -> Result<Response, ApiError> {
        let path = format!("/{}", object);
        self.reverse_request(orig_url, AxMethod::GET, &path, headers, Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::NodeKind;

    #[test]
    fn prune_removes_departed_nodes_only() {
        let fabric = RproxyFabric::new(reqwest::Client::new());
        {
            let mut nodes = fabric.nodes.write().unwrap();
            nodes.insert("t1".to_string(), "http://t1:1".to_string());
            nodes.insert("t2".to_string(), "http://t2:1".to_string());
            nodes.insert("x".to_string(), "http://x:1".to_string());
        }
        let mut old = Smap { version: 1, ..Default::default() };
        old.put_node(Snode::new("t1", NodeKind::Target, "http://t1:1"));
        old.put_node(Snode::new("t2", NodeKind::Target, "http://t2:1"));
        let mut new = old.clone();
        new.del_node("t2");

        fabric.prune(&old, &new);
        let nodes = fabric.nodes.read().unwrap();
        assert!(nodes.contains_key("t1"));
        assert!(!nodes.contains_key("t2"));
        // never in either smap: left alone
        assert!(nodes.contains_key("x"));
    }
}
