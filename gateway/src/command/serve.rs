use axum::routing::{any, delete, get, on, post, put, MethodFilter};
use axum::Router;
use axum_server::Server;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use common::api_error::ApiError;
use common::constants::{AUTO_REGISTER, ENV_CLUSTER_CIDR, ROUTE_CLUSTER};
use common::url_utils::{parse_socket_addr, sanitize_url, url_path};

use crate::core::config::GatewayConfig;
use crate::core::membership::{JoinReq, RegMeta};
use crate::core::node::{NetInfo, NodeKind, Snode};
use crate::core::smap::Smap;
use crate::core::state::GatewayState;
use crate::core::sweep::keepalive_loop;
use crate::routes;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Advertised public URL (defaults to http://<listen>)
    #[arg(long)]
    public_url: Option<String>,

    /// Advertised intra-control URL (defaults to the public URL)
    #[arg(long)]
    control_url: Option<String>,

    /// Advertised intra-data URL (defaults to the public URL)
    #[arg(long)]
    data_url: Option<String>,

    /// Stable node id (generated when omitted)
    #[arg(long)]
    node_id: Option<String>,

    /// Start as the founding primary of a new cluster
    #[arg(long, default_value_t = false)]
    primary: bool,

    /// URL of any existing proxy to join through
    #[arg(long)]
    join_url: Option<String>,

    /// Never stand for primary election
    #[arg(long, default_value_t = false)]
    non_electable: bool,

    /// Shared cluster secret for metasync signatures
    #[arg(long, default_value = "cumulus")]
    secret: String,

    /// Control-plane call timeout (seconds)
    #[arg(long, default_value_t = 2)]
    cplane_timeout_secs: u64,

    /// Busy-host fan-out timeout (seconds)
    #[arg(long, default_value_t = 20)]
    max_host_busy_secs: u64,

    /// Listing fan-out timeout (seconds)
    #[arg(long, default_value_t = 30)]
    list_objects_timeout_secs: u64,

    /// Keepalive interval (seconds)
    #[arg(long, default_value_t = 3)]
    keepalive_secs: u64,

    /// Drop a member silent for this long (seconds)
    #[arg(long, default_value_t = 15)]
    keepalive_down_secs: u64,

    /// Disable automatic rebalance triggers
    #[arg(long, default_value_t = false)]
    no_rebalance: bool,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/buckets", get(routes::bucket::list_buckets))
        .route(
            "/v1/buckets/{bucket}",
            on(MethodFilter::GET, routes::bucket::get_bucket)
                .on(MethodFilter::HEAD, routes::bucket::head_bucket)
                .post(routes::bucket::post_bucket)
                .delete(routes::bucket::delete_bucket)
                .patch(routes::bucket::patch_bucket),
        )
        .route(
            "/v1/objects/{bucket}/{*object}",
            on(MethodFilter::GET, routes::object::get_object)
                .on(MethodFilter::HEAD, routes::object::head_object)
                .put(routes::object::put_object)
                .delete(routes::object::delete_object)
                .post(routes::object::post_object),
        )
        .route(
            "/v1/download",
            get(routes::download::get_download).post(routes::download::post_download),
        )
        .route("/v1/download/{action}", delete(routes::download::delete_download))
        .route(
            "/v1/cluster",
            get(routes::cluster::get_cluster).put(routes::cluster::put_cluster),
        )
        .route("/v1/cluster/proxy/{id}", put(routes::cluster::put_cluster_proxy))
        .route("/v1/cluster/daemon/{id}", delete(routes::cluster::delete_cluster_daemon))
        .route("/v1/cluster/{tag}", post(routes::cluster::post_cluster))
        .route("/v1/daemon", get(routes::daemon::get_daemon))
        .route("/v1/daemon/proxy/{id}", put(routes::daemon::put_daemon_proxy))
        .route("/v1/daemon/unregister", delete(routes::daemon::delete_daemon))
        .route("/v1/metasync", put(routes::metasync::put_metasync))
        .route("/v1/health", get(routes::health::get_health))
        .route("/v1/tokens", delete(routes::tokens::delete_token))
        .route("/v1/vote", post(routes::vote::post_vote))
        .route("/v1/notifs", post(routes::notifs::post_notifs))
        .route("/v1/ic", get(routes::ic::get_ic).post(routes::ic::post_ic))
        .route("/v1/reverse/{*rest}", any(routes::reverse::any_reverse))
        .with_state(state)
}

fn advertised_url(listen: &str, explicit: Option<&str>) -> anyhow::Result<String> {
    if let Some(u) = explicit {
        return sanitize_url(u);
    }
    let addr = parse_socket_addr(listen)?;
    let host = if addr.ip().is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        addr.ip().to_string()
    };
    Ok(format!("http://{}:{}", host, addr.port()))
}

pub fn state_from_args(args: &ServeArgs) -> anyhow::Result<GatewayState> {
    let public = advertised_url(&args.listen, args.public_url.as_deref())?;
    let control = match &args.control_url {
        Some(u) => sanitize_url(u)?,
        None => public.clone(),
    };
    let data = match &args.data_url {
        Some(u) => sanitize_url(u)?,
        None => public.clone(),
    };

    let node_id = args
        .node_id
        .clone()
        .unwrap_or_else(|| format!("p{}", &Uuid::new_v4().simple().to_string()[..8]));
    let mut me = Snode::new(&node_id, NodeKind::Proxy, &public);
    me.intra_control = NetInfo::new(&control);
    me.intra_data = NetInfo::new(&data);
    me.non_electable = args.non_electable;

    let local_net = std::env::var(ENV_CLUSTER_CIDR)
        .ok()
        .map(|s| s.parse::<ipnet::IpNet>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid {}: {}", ENV_CLUSTER_CIDR, e))?;
    if let Some(net) = &local_net {
        info!("local network: {}", net);
    }

    let config = GatewayConfig {
        cplane_timeout: Duration::from_secs(args.cplane_timeout_secs),
        max_host_busy: Duration::from_secs(args.max_host_busy_secs),
        long_timeout: Duration::from_secs(args.max_host_busy_secs * 3),
        list_objects_timeout: Duration::from_secs(args.list_objects_timeout_secs),
        cluster_secret: args.secret.clone(),
        local_net,
        keepalive_interval: Duration::from_secs(args.keepalive_secs),
        keepalive_down: Duration::from_secs(args.keepalive_down_secs),
        metasync_retry_interval: Duration::from_secs(args.keepalive_secs),
        rebalance_enabled: !args.no_rebalance,
    };

    let smap = if args.primary {
        let mut smap = Smap {
            version: 1,
            uuid: Uuid::new_v4().to_string(),
            primary_id: me.id.clone(),
            ..Default::default()
        };
        smap.put_node(me.clone());
        smap.staff_ic();
        smap
    } else {
        Smap::default()
    };

    let state = GatewayState::new(me, config, smap);
    if args.primary {
        state.mark_cluster_started();
    }
    Ok(state)
}

/// Register with an existing cluster and install the returned metadata.
async fn join_cluster(state: &GatewayState, join_url: &str) -> Result<(), ApiError> {
    let req = JoinReq { node: (*state.me).clone(), smap: None, bmd: None };
    let url = format!("{}{}", join_url, url_path(&[ROUTE_CLUSTER, AUTO_REGISTER]));
    let resp = state
        .client
        .post(&url)
        .json(&req)
        .timeout(state.config.cplane_timeout)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(ApiError::Upstream(
            resp.status().as_u16(),
            format!("join via {} failed", join_url),
        ));
    }
    let bytes = resp.bytes().await?;
    if !bytes.is_empty() {
        if let Ok(meta) = serde_json::from_slice::<RegMeta>(&bytes) {
            state.owners.smap.put_force(meta.smap);
            state.owners.bmd.put_force(meta.bmd);
        }
    }
    state.mark_cluster_started();
    Ok(())
}

pub async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let state = state_from_args(&args)?;
    info!(
        "{}: starting (primary={}, public={})",
        state.me,
        args.primary,
        state.me.public.url
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let keepalive_handle = tokio::spawn(keepalive_loop(state.clone(), shutdown_rx));

    if let Some(join_url) = &args.join_url {
        let join_url = sanitize_url(join_url)?;
        let st = state.clone();
        tokio::spawn(async move {
            loop {
                match join_cluster(&st, &join_url).await {
                    Ok(()) => {
                        info!("{}: joined cluster via {}", st.me, join_url);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("join via {} failed: {}; retrying", join_url, e);
                        tokio::time::sleep(st.config.cplane_timeout).await;
                    }
                }
            }
        });
    }

    let app = build_router(state);
    let socket_addr = parse_socket_addr(&args.listen)?;
    let server =
        Server::bind(socket_addr).serve(app.into_make_service_with_connect_info::<SocketAddr>());

    info!("listening on {}", args.listen);

    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = keepalive_handle.await;

    Ok(())
}
