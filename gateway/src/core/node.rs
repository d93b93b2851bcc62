use serde::{Deserialize, Serialize};

/// One of the three per-node networks. Every node advertises all three even
/// when they collapse onto the same listener.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Net {
    Public,
    IntraControl,
    IntraData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct NetInfo {
    pub url: String,
}

impl NetInfo {
    pub fn new(url: &str) -> Self {
        NetInfo { url: url.to_string() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Proxy,
    Target,
}

/// Node descriptor. Identity is the stable `id`; everything else may change
/// across re-registrations.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Snode {
    pub id: String,
    pub kind: NodeKind,
    pub public: NetInfo,
    pub intra_control: NetInfo,
    pub intra_data: NetInfo,
    #[serde(default)]
    pub non_electable: bool,
}

impl Snode {
    pub fn new(id: &str, kind: NodeKind, url: &str) -> Self {
        Snode {
            id: id.to_string(),
            kind,
            public: NetInfo::new(url),
            intra_control: NetInfo::new(url),
            intra_data: NetInfo::new(url),
            non_electable: false,
        }
    }

    pub fn is_proxy(&self) -> bool {
        self.kind == NodeKind::Proxy
    }

    pub fn is_target(&self) -> bool {
        self.kind == NodeKind::Target
    }

    pub fn url(&self, net: Net) -> &str {
        match net {
            Net::Public => &self.public.url,
            Net::IntraControl => &self.intra_control.url,
            Net::IntraData => &self.intra_data.url,
        }
    }

    /// Field-wise endpoint comparison; `id` equality alone is not enough to
    /// skip a re-registration.
    pub fn info_changed(&self, other: &Snode) -> bool {
        self.public != other.public
            || self.intra_control != other.intra_control
            || self.intra_data != other.intra_data
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("node id must not be empty".to_string());
        }
        for (name, ni) in [
            ("public", &self.public),
            ("intra-control", &self.intra_control),
            ("intra-data", &self.intra_data),
        ] {
            if url::Url::parse(&ni.url).is_err() {
                return Err(format!("node {}: invalid {} URL {:?}", self.id, name, ni.url));
            }
        }
        Ok(())
    }
}

impl PartialEq for Snode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Snode {}

impl std::fmt::Display for Snode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            NodeKind::Proxy => write!(f, "p[{}]", self.id),
            NodeKind::Target => write!(f, "t[{}]", self.id),
        }
    }
}
