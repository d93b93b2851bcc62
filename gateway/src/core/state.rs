use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use common::api_error::ApiError;

use crate::core::bmd::{Bmd, BmdOwner};
use crate::core::config::GatewayConfig;
use crate::core::listing::QueryMem;
use crate::core::metasync::Metasyncer;
use crate::core::node::Snode;
use crate::core::notifs::NotifRegistry;
use crate::core::rmd::{Rmd, RmdOwner};
use crate::core::rproxy::RproxyFabric;
use crate::core::smap::{Smap, SmapOwner};
use crate::core::tokens::TokenOwner;

/// One owner object per metadata kind; each exclusively holds its latest
/// version behind a writer lock, clones are shared for reads.
pub struct Owners {
    pub smap: SmapOwner,
    pub bmd: BmdOwner,
    pub rmd: RmdOwner,
    pub tokens: TokenOwner,
}

impl Owners {
    pub fn new(smap: Smap) -> Self {
        Owners {
            smap: SmapOwner::new(smap),
            bmd: BmdOwner::new(Bmd::default()),
            rmd: RmdOwner::new(Rmd::default()),
            tokens: TokenOwner::new(),
        }
    }
}

/// Last-heard-from stamps kept by the primary.
#[derive(Default)]
pub struct KeepaliveTracker {
    heard: RwLock<HashMap<String, Instant>>,
}

impl KeepaliveTracker {
    pub fn heard_from(&self, id: &str) {
        self.heard
            .write()
            .expect("keepalive lock poisoned")
            .insert(id.to_string(), Instant::now());
    }

    pub fn forget(&self, id: &str) {
        self.heard.write().expect("keepalive lock poisoned").remove(id);
    }

    pub fn silent_for(&self, id: &str) -> Option<std::time::Duration> {
        self.heard
            .read()
            .expect("keepalive lock poisoned")
            .get(id)
            .map(|t| t.elapsed())
    }
}

/// The per-node context handle threaded through every handler and task.
#[derive(Clone)]
pub struct GatewayState {
    pub me: Arc<Snode>,
    pub client: reqwest::Client,
    pub config: Arc<GatewayConfig>,
    pub owners: Arc<Owners>,
    pub metasync: Arc<Metasyncer>,
    pub notifs: Arc<NotifRegistry>,
    pub rproxy: Arc<RproxyFabric>,
    pub qm: Arc<QueryMem>,
    pub keepalive: Arc<KeepaliveTracker>,
    started: Arc<AtomicBool>,
}

impl GatewayState {
    pub fn new(me: Snode, config: GatewayConfig, smap: Smap) -> Self {
        let me = Arc::new(me);
        let config = Arc::new(config);
        let client = reqwest::Client::new();
        let owners = Arc::new(Owners::new(smap));
        let metasync = Arc::new(Metasyncer::new(
            me.clone(),
            client.clone(),
            config.clone(),
            owners.clone(),
        ));
        GatewayState {
            me,
            rproxy: Arc::new(RproxyFabric::new(client.clone())),
            client,
            config,
            owners,
            metasync,
            notifs: Arc::new(NotifRegistry::default()),
            qm: Arc::new(QueryMem::default()),
            keepalive: Arc::new(KeepaliveTracker::default()),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cluster_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn mark_cluster_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// 503 until the cluster finished starting up.
    pub fn ensure_started(&self) -> Result<(), ApiError> {
        if !self.cluster_started() {
            return Err(ApiError::NotReady("cluster is starting up".to_string()));
        }
        Ok(())
    }

    pub fn is_primary(&self) -> bool {
        self.owners.smap.get().is_primary(&self.me.id)
    }
}
