//! Shared constants for meshnode components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default node HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Default scheme prepended to peer urls for outbound connections
pub const DEFAULT_CONNECTION_PROTOCOL: &str = "http://";

/// Default bcrypt cost for the node id hash sent to peers
pub const DEFAULT_HASH_COST: u32 = 10;

/// Outbound peer connection timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Upper bound for a whole peer exchange (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Maximum access-error entries kept in the datastore
pub const ACCESS_ERRORS_CAP: isize = 1000;

/// Separator between urls in a chain and between entries in a clusters list
pub const CHAIN_SEPARATOR: char = ';';

/// Prefix shared by every control field
pub const INTERNAL_PREFIX: &str = "_skynet";

/// Wire field names carried in every envelope
pub mod fields {
    /// Schema marker, always "1"
    pub const MARKER: &str = "_skynet";

    /// Sender's bcrypt hash of its key id
    pub const ID: &str = "_skynet_id";

    /// SHA1 of sender url + key id
    pub const HASH: &str = "_skynet_hash";

    /// Sender's chain counter
    pub const CHAIN: &str = "_skynet_chain";

    /// When the sender's chain counter last changed
    pub const CHAIN_UPDATED_AT: &str = "_skynet_chain_updated_at";

    /// Chain value the sender asks receivers to adopt
    pub const CHAIN_NEW: &str = "_skynet_chain_new";

    /// Sender software version
    pub const VERSION: &str = "_skynet_version";

    /// Sender url (sender side)
    pub const CLUSTER_URL: &str = "_skynet_cluster_url";

    /// Sender ip
    pub const CLUSTER_IP: &str = "_skynet_cluster_ip";

    /// Sender clock at header generation
    pub const CLUSTER_TIME: &str = "_skynet_cluster_time";

    /// Sender's known peers, each url base64-encoded, joined with ';'
    pub const CLUSTERS: &str = "_skynet_clusters";

    /// Propagation chain, ';'-joined urls wrapped in base64
    pub const CLUSTERS_CHAIN: &str = "_skynet_clusters_chain";

    /// Sender clock at send time
    pub const SENDER_TIME: &str = "_skynet_sender_time";

    /// Sender url (receiver side)
    pub const SENDER_URL: &str = "_skynet_sender_url";

    /// Integrity digest over every other field
    pub const CHECKSUM: &str = "_skynet_checksum";
}

/// Redis key names
pub mod redis_keys {
    /// Cluster rows: hash url -> JSON
    pub const CLUSTERS: &str = "mesh:clusters";

    /// Storage order: sorted set url scored by id
    pub const CLUSTERS_ORDER: &str = "mesh:clusters:order";

    /// Cluster id sequence
    pub const CLUSTERS_SEQ: &str = "mesh:clusters:seq";

    /// Blocked cluster urls
    pub const CLUSTERS_BLOCKED: &str = "mesh:clusters:blocked";

    /// Chain counter: hash { chain, updated_at }
    pub const CHAIN: &str = "mesh:chain";

    /// Unauthorized access log (capped list, newest first)
    pub const ACCESS_ERRORS: &str = "mesh:access_errors";
}

/// HTTP header names
pub mod headers {
    /// Operator password for admin routes
    pub const X_MESH_PASSWORD: &str = "X-Mesh-Password";
}
