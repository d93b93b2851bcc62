use anyhow::anyhow;
use std::net::SocketAddr;
use url::Url;

pub fn sanitize_url(url: &str) -> anyhow::Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("URL cannot be empty"));
    }

    if url.contains('\0') || url.contains('\r') || url.contains('\n') {
        return Err(anyhow!("URL contains invalid control characters"));
    }

    let parsed_url = Url::parse(url).map_err(|e| anyhow!("invalid URL format: {}", e))?;

    match parsed_url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("unsupported URL scheme: {}", other)),
    }

    // Strip the trailing slash Url::to_string appends to bare authorities so
    // that `{url}{path}` concatenation yields a single separator.
    let mut s = parsed_url.to_string();
    if s.ends_with('/') {
        s.pop();
    }
    Ok(s)
}

pub fn parse_socket_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    addr.parse::<SocketAddr>()
        .map_err(|e| anyhow!("invalid listen address {}: {}", addr, e))
}

/// `/v1/<items...>` joined the way handlers expect it.
pub fn url_path(items: &[&str]) -> String {
    let mut path = format!("/{}", crate::constants::API_VERSION);
    for it in items {
        if !it.is_empty() {
            path.push('/');
            path.push_str(it);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_trailing_slash() {
        assert_eq!(sanitize_url("http://127.0.0.1:8080/").unwrap(), "http://127.0.0.1:8080");
        assert_eq!(sanitize_url(" http://a:1 ").unwrap(), "http://a:1");
        assert!(sanitize_url("ftp://x").is_err());
        assert!(sanitize_url("").is_err());
    }

    #[test]
    fn url_path_joins() {
        assert_eq!(url_path(&["buckets", "b1"]), "/v1/buckets/b1");
        assert_eq!(url_path(&["daemon", ""]), "/v1/daemon");
    }
}
