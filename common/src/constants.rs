// URL version prefix and route names.
pub const API_VERSION: &str = "v1";

pub const ROUTE_BUCKETS: &str = "buckets";
pub const ROUTE_OBJECTS: &str = "objects";
pub const ROUTE_DOWNLOAD: &str = "download";
pub const ROUTE_CLUSTER: &str = "cluster";
pub const ROUTE_DAEMON: &str = "daemon";
pub const ROUTE_TOKENS: &str = "tokens";
pub const ROUTE_METASYNC: &str = "metasync";
pub const ROUTE_HEALTH: &str = "health";
pub const ROUTE_VOTE: &str = "vote";
pub const ROUTE_NOTIFS: &str = "notifs";
pub const ROUTE_REVERSE: &str = "reverse";
pub const ROUTE_IC: &str = "ic";

// Headers.
pub const HDR_CALLER_NAME: &str = "x-caller-name";
pub const HDR_NODE_ID: &str = "x-node-id";
pub const HDR_NODE_URL: &str = "x-node-url";
pub const HDR_AUTH_TOKEN: &str = "authorization";
pub const HDR_BUCKET_PROPS: &str = "x-bucket-props";
pub const HDR_ORIG_URL: &str = "x-orig-url";

// Query parameters.
pub const QPARAM_UUID: &str = "uuid";
pub const QPARAM_WHAT: &str = "what";
pub const QPARAM_PROVIDER: &str = "provider";
pub const QPARAM_NAMESPACE: &str = "namespace";
pub const QPARAM_PREPARE: &str = "prepare";
pub const QPARAM_FORCE: &str = "force";
pub const QPARAM_NON_ELECTABLE: &str = "non-electable";
pub const QPARAM_CHECK_EXISTS: &str = "check-exists";
pub const QPARAM_TASK_ACTION: &str = "task-action";
pub const QPARAM_SILENT: &str = "silent";
pub const QPARAM_ORIG_URL: &str = "orig-url";
pub const QPARAM_PROXY_ID: &str = "proxy-id";
pub const QPARAM_UNIX_TIME: &str = "unix-time";
pub const QPARAM_PRIMARY_CANDIDATE: &str = "primary-candidate";
pub const QPARAM_CLUSTER_INFO: &str = "cluster-info";
pub const QPARAM_ONLY_ACTIVE: &str = "only-active";
pub const QPARAM_ID: &str = "id";

// `what=` values.
pub const WHAT_SMAP: &str = "smap";
pub const WHAT_BMD: &str = "bmd";
pub const WHAT_RMD: &str = "rmd";
pub const WHAT_SNODE: &str = "snode";
pub const WHAT_STATUS: &str = "status";

// Cluster membership sub-routes.
pub const KEEPALIVE: &str = "keepalive";
pub const AUTO_REGISTER: &str = "autoreg";
pub const USER_REGISTER: &str = "join";
pub const PROXY: &str = "proxy";
pub const UNREGISTER: &str = "unregister";

// Downloader admin sub-routes.
pub const DL_ABORT: &str = "abort";
pub const DL_REMOVE: &str = "remove";

// Task actions for paged/async bucket queries.
pub const TASK_START: &str = "start";
pub const TASK_STATUS: &str = "status";
pub const TASK_RESULT: &str = "result";

pub const CONTENT_JSON: &str = "application/json";
pub const CONTENT_MSGPACK: &str = "application/msgpack";

// Environment: clients inside this CIDR get intra-data redirect URLs.
pub const ENV_CLUSTER_CIDR: &str = "CUMULUS_CLUSTER_CIDR";

pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const IC_SIZE: usize = 3;

// cie#NN codes, logged with cluster-integrity errors.
pub const CIE_SMAP_UUID: u32 = 40;
pub const CIE_BMD_UUID: u32 = 50;
pub const CIE_BMD_SPLIT: u32 = 60;
pub const CIE_BMD_MAJORITY: u32 = 70;
