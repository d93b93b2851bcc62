use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Bucket actions (POST /v1/buckets/<name> body `action`).
pub const ACT_CREATE_BUCKET: &str = "create-bucket";
pub const ACT_DESTROY_BUCKET: &str = "destroy-bucket";
pub const ACT_RENAME_BUCKET: &str = "rename-bucket";
pub const ACT_COPY_BUCKET: &str = "copy-bucket";
pub const ACT_REGISTER_CLOUD: &str = "register-cloud";
pub const ACT_LIST_OBJECTS: &str = "list-objects";
pub const ACT_INVALIDATE_CACHE: &str = "invalidate-list-cache";
pub const ACT_SUMMARY: &str = "summary";
pub const ACT_MAKE_N_COPIES: &str = "make-n-copies";
pub const ACT_EC_ENCODE: &str = "ec-encode";
pub const ACT_PREFETCH: &str = "prefetch";
pub const ACT_DELETE_RANGE: &str = "delete-range";

// Cluster actions.
pub const ACT_SHUTDOWN: &str = "shutdown";
pub const ACT_REBALANCE: &str = "rebalance";
pub const ACT_RECOVER_BMD: &str = "recover-buckets";
pub const ACT_SEND_OWNERSHIP_TBL: &str = "send-ownership-tbl";
pub const ACT_XACT_START: &str = "xact-start";
pub const ACT_XACT_STOP: &str = "xact-stop";

// Membership / metasync actions (carried inside sync waves).
pub const ACT_REG_TARGET: &str = "register-target";
pub const ACT_REG_PROXY: &str = "register-proxy";
pub const ACT_UNREG_TARGET: &str = "unregister-target";
pub const ACT_UNREG_PROXY: &str = "unregister-proxy";
pub const ACT_NEW_PRIMARY: &str = "new-primary";
pub const ACT_START_GFN: &str = "start-gfn";
pub const ACT_REVOKE_TOKEN: &str = "revoke-token";

/// Generic `{action, name, value}` message used by bucket and cluster POSTs.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ActionMsg {
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub value: serde_json::Value,
}

impl ActionMsg {
    pub fn new(action: &str) -> Self {
        ActionMsg { action: action.to_string(), ..Default::default() }
    }

    pub fn with_value<T: Serialize>(action: &str, value: &T) -> Self {
        ActionMsg {
            action: action.to_string(),
            name: String::new(),
            value: serde_json::to_value(value).expect("serializable action value"),
        }
    }
}

/// Fully-qualified bucket: provider + namespace + name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Bck {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Local,
    Cloud,
    Remote,
    Http,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "" | "local" => Some(Provider::Local),
            "cloud" => Some(Provider::Cloud),
            "remote" => Some(Provider::Remote),
            "http" => Some(Provider::Http),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Provider::Local)
    }
}

impl Bck {
    pub fn local(name: &str) -> Self {
        Bck { provider: Provider::Local, namespace: String::new(), name: name.to_string() }
    }

    /// Unified name: the hrw key prefix for every object in this bucket.
    pub fn make_uname(&self, obj_name: &str) -> String {
        format!("{:?}/{}/{}/{}", self.provider, self.namespace, self.name, obj_name)
    }
}

// Access bits checked against bucket props before dispatch.
pub const ACCESS_GET: u64 = 1 << 0;
pub const ACCESS_PUT: u64 = 1 << 1;
pub const ACCESS_DELETE: u64 = 1 << 2;
pub const ACCESS_HEAD: u64 = 1 << 3;
pub const ACCESS_LIST: u64 = 1 << 4;
pub const ACCESS_ADMIN: u64 = 1 << 5;
pub const ACCESS_DOWNLOAD: u64 = 1 << 6;
pub const ACCESS_ALL: u64 = u64::MAX;

pub fn access_op_name(bits: u64) -> &'static str {
    match bits {
        ACCESS_GET => "GET",
        ACCESS_PUT => "PUT",
        ACCESS_DELETE => "DELETE",
        ACCESS_HEAD => "HEAD",
        ACCESS_LIST => "LIST",
        ACCESS_ADMIN => "ADMIN",
        ACCESS_DOWNLOAD => "DOWNLOAD",
        _ => "ACCESS",
    }
}

/// Select message for paged object listing.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ListObjectsMsg {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub continuation_token: String,
    /// Requested entry props, e.g. "size,checksum,atime,target_url".
    #[serde(default)]
    pub props: String,
    #[serde(default)]
    pub use_cache: bool,
}

impl ListObjectsMsg {
    pub fn props_set(&self) -> Vec<String> {
        self.props
            .split(',')
            .filter(|p| !p.is_empty())
            .map(|p| p.trim().to_string())
            .collect()
    }

    /// Cloud listings need a broadcast only when some requested prop lives on
    /// target disks rather than in the remote backend.
    pub fn need_local_data(&self) -> bool {
        self.props_set().iter().any(|p| p == "atime" || p == "cached" || p == "status")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl ObjEntry {
    pub fn named(name: &str) -> Self {
        ObjEntry { name: name.to_string(), ..Default::default() }
    }

    pub fn copy_with_props(&self, props: &[String]) -> ObjEntry {
        let has = |p: &str| props.iter().any(|x| x == p);
        ObjEntry {
            name: self.name.clone(),
            size: if has("size") { self.size } else { None },
            checksum: if has("checksum") { self.checksum.clone() } else { None },
            atime: if has("atime") { self.atime } else { None },
            target_url: if has("target_url") { self.target_url.clone() } else { None },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ObjectList {
    #[serde(default)]
    pub uuid: String,
    pub entries: Vec<ObjEntry>,
    #[serde(default)]
    pub continuation_token: String,
}

impl ObjectList {
    /// Merge target pages preserving sort order and de-duplicating by name.
    /// `limit == 0` means no limit. The continuation token is the min of the
    /// non-empty input tokens: entries past the earliest target cut-off can
    /// not be proven complete yet.
    pub fn merge(lists: Vec<ObjectList>, limit: usize) -> ObjectList {
        let mut uuid = String::new();
        let mut token = String::new();
        let mut all: Vec<ObjEntry> = Vec::new();
        for lst in lists {
            if uuid.is_empty() {
                uuid = lst.uuid;
            }
            if !lst.continuation_token.is_empty()
                && (token.is_empty() || lst.continuation_token < token)
            {
                token = lst.continuation_token;
            }
            all.extend(lst.entries);
        }
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all.dedup_by(|a, b| a.name == b.name);
        if limit > 0 && all.len() > limit {
            all.truncate(limit);
            token = all.last().map(|e| e.name.clone()).unwrap_or_default();
        }
        ObjectList { uuid, entries: all, continuation_token: token }
    }
}

/// Per-bucket usage summary returned by targets and summed by the gateway.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BucketSummary {
    pub bck: Bck,
    #[serde(default)]
    pub object_count: u64,
    #[serde(default)]
    pub size: u64,
    /// Bytes of capacity on the reporting targets; used to derive
    /// `used_pct` after merging.
    #[serde(default)]
    pub capacity: u64,
    #[serde(default)]
    pub used_pct: f64,
}

impl BucketSummary {
    fn recompute_used_pct(&mut self) {
        self.used_pct = if self.capacity > 0 {
            self.size as f64 / self.capacity as f64 * 100.0
        } else {
            0.0
        };
    }
}

pub type BucketsSummaries = Vec<BucketSummary>;

/// Sum summaries per bucket. `used_pct` is always re-derived from the
/// summed size and capacity, so the merge stays commutative and
/// associative regardless of reply order.
pub fn aggregate_summaries(mut acc: BucketsSummaries, other: BucketsSummaries) -> BucketsSummaries {
    for s in other {
        match acc.iter_mut().find(|a| a.bck == s.bck) {
            Some(a) => {
                a.object_count += s.object_count;
                a.size += s.size;
                a.capacity += s.capacity;
            }
            None => acc.push(s),
        }
    }
    for a in &mut acc {
        a.recompute_used_pct();
    }
    acc.sort_by(|a, b| a.bck.cmp(&b.bck));
    acc
}

//
// Downloader admin payloads; the gateway only forwards and aggregates these.
//

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DlAdminBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub only_active: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DlJobInfo {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub num_pending: u64,
    #[serde(default)]
    pub num_errors: u64,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub started_ms: i64,
    #[serde(default)]
    pub finished_ms: i64,
}

impl DlJobInfo {
    /// Commutative, associative, idempotent on identical inputs.
    pub fn aggregate(mut self, other: &DlJobInfo) -> DlJobInfo {
        self.num_pending += other.num_pending;
        self.num_errors += other.num_errors;
        self.aborted |= other.aborted;
        if other.started_ms != 0 && (self.started_ms == 0 || other.started_ms < self.started_ms) {
            self.started_ms = other.started_ms;
        }
        if other.finished_ms > self.finished_ms {
            self.finished_ms = other.finished_ms;
        }
        if self.description.is_empty() {
            self.description = other.description.clone();
        }
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DlTaskProgress {
    pub name: String,
    #[serde(default)]
    pub downloaded: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DlStatusResp {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub finished_cnt: u64,
    #[serde(default)]
    pub error_cnt: u64,
    #[serde(default)]
    pub scheduled_cnt: u64,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub current_tasks: Vec<DlTaskProgress>,
    #[serde(default)]
    pub finished_tasks: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl DlStatusResp {
    pub fn aggregate(mut self, other: &DlStatusResp) -> DlStatusResp {
        if self.job_id.is_empty() {
            self.job_id = other.job_id.clone();
        }
        self.total += other.total;
        self.finished_cnt += other.finished_cnt;
        self.error_cnt += other.error_cnt;
        self.scheduled_cnt += other.scheduled_cnt;
        self.aborted |= other.aborted;
        for t in &other.current_tasks {
            if !self.current_tasks.iter().any(|x| x.name == t.name) {
                self.current_tasks.push(t.clone());
            }
        }
        for t in &other.finished_tasks {
            if !self.finished_tasks.contains(t) {
                self.finished_tasks.push(t.clone());
            }
        }
        for e in &other.errors {
            if !self.errors.contains(e) {
                self.errors.push(e.clone());
            }
        }
        self.current_tasks.sort_by(|a, b| a.name.cmp(&b.name));
        self.finished_tasks.sort();
        self.errors.sort();
        self
    }
}

pub type DlJobMap = BTreeMap<String, DlJobInfo>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DlPostResp {
    pub id: String,
}

/// Target-side progress update posted to /v1/notifs on the listener's owner.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotifMsg {
    pub uuid: String,
    pub node_id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub stats: serde_json::Value,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// GET /v1/health?cluster-info=true
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClusterInfo {
    pub smap_version: i64,
    pub smap_uuid: String,
    pub primary_url: String,
    pub bmd_version: i64,
    pub bmd_uuid: String,
}
