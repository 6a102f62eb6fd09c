//! Orchestrator configuration
//!
//! Configuration is loaded from environment variables. List-valued variables
//! are comma-separated and feed the scenario matrix.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::inventory::ProtocolFamily;
use crate::scenario::ScenarioMatrix;

/// Main orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON file describing the cluster services
    pub inventory_path: PathBuf,
    /// Local directory for the suite report and cached state
    pub artifacts_dir: PathBuf,
    /// Where to write rendered Prometheus metrics (optional)
    pub metrics_out: Option<PathBuf>,

    /// Load node access
    pub ssh: SshConfig,

    /// Load tool and run settings
    pub load: LoadDefaults,

    /// Service-name patterns per protocol family
    pub patterns: ServicePatterns,

    /// Scenario parameter lists
    pub matrix: ScenarioMatrix,
}

/// Access to the load nodes
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Load node addresses, in order of preference
    pub load_nodes: Vec<String>,
    pub user: String,
    pub private_key_path: PathBuf,
    pub connect_timeout: Duration,
}

/// Settings shared by every scenario of a suite
#[derive(Debug, Clone)]
pub struct LoadDefaults {
    /// Load tool installation directory on the load nodes
    pub tool_dir: String,
    /// Directory on the load nodes for artifacts and pregen files
    pub remote_dir: String,
    /// Added to `load_time` before a session is considered hung
    pub session_grace: Duration,
    /// Hard cap for one scenario's load run
    pub scenario_timeout: Option<Duration>,
    pub container_placement_policy: String,
    pub authmate_path: String,
    pub wallet_path: String,
    pub s3_gate_public_key: String,
}

/// Service-name regexes used to select endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePatterns {
    pub storage_node: String,
    pub http_gate: String,
    pub s3_gate: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inventory_path: PathBuf::from("inventory.json"),
            artifacts_dir: PathBuf::from("artifacts"),
            metrics_out: None,
            ssh: SshConfig::default(),
            load: LoadDefaults::default(),
            patterns: ServicePatterns::default(),
            matrix: ScenarioMatrix::default(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            load_nodes: Vec::new(),
            user: "root".to_string(),
            private_key_path: PathBuf::from("/root/.ssh/id_rsa"),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for LoadDefaults {
    fn default() -> Self {
        let tool_dir = "/etc/k6".to_string();
        Self {
            wallet_path: format!("{}/scenarios/files/wallet.json", tool_dir),
            tool_dir,
            remote_dir: "/var/tmp/clusterload".to_string(),
            session_grace: Duration::from_secs(120),
            scenario_timeout: None,
            container_placement_policy: "REP 1 IN X CBF 1 SELECT 1 FROM * AS X".to_string(),
            authmate_path: "neofs-s3-authmate".to_string(),
            s3_gate_public_key: String::new(),
        }
    }
}

impl Default for ServicePatterns {
    fn default() -> Self {
        Self {
            storage_node: r"s\d\d".to_string(),
            http_gate: r"http-gate\d\d".to_string(),
            s3_gate: r"s3-gate\d\d".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Paths
        if let Ok(path) = env::var("INVENTORY_PATH") {
            config.inventory_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("ARTIFACTS_DIR") {
            config.artifacts_dir = PathBuf::from(path);
        }
        if let Ok(path) = env::var("METRICS_OUT")
            && !path.is_empty()
        {
            config.metrics_out = Some(PathBuf::from(path));
        }

        // Load node access
        if let Ok(val) = env::var("LOAD_NODES") {
            config.ssh.load_nodes = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(user) = env::var("LOAD_NODE_SSH_USER") {
            config.ssh.user = user;
        }
        if let Ok(path) = env::var("LOAD_NODE_SSH_PRIVATE_KEY_PATH") {
            config.ssh.private_key_path = PathBuf::from(path);
        }
        if let Ok(val) = env::var("SSH_CONNECT_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.ssh.connect_timeout = Duration::from_secs(secs);
        }

        // Load settings
        if let Ok(dir) = env::var("LOAD_TOOL_DIR") {
            config.load.tool_dir = dir;
        }
        if let Ok(dir) = env::var("LOAD_REMOTE_DIR") {
            config.load.remote_dir = dir;
        }
        if let Ok(val) = env::var("SESSION_GRACE_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.load.session_grace = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("SCENARIO_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.load.scenario_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(policy) = env::var("CONTAINER_PLACEMENT_POLICY") {
            config.load.container_placement_policy = policy;
        }
        if let Ok(path) = env::var("AUTHMATE_PATH") {
            config.load.authmate_path = path;
        }
        if let Ok(path) = env::var("S3_GATE_WALLET_PATH") {
            config.load.wallet_path = path;
        }
        if let Ok(key) = env::var("S3_GATE_PUBLIC_KEY") {
            config.load.s3_gate_public_key = key;
        }

        // Service patterns
        if let Ok(re) = env::var("STORAGE_NODE_SERVICE_REGEX") {
            config.patterns.storage_node = re;
        }
        if let Ok(re) = env::var("HTTP_GATE_SERVICE_REGEX") {
            config.patterns.http_gate = re;
        }
        if let Ok(re) = env::var("S3_GATE_SERVICE_REGEX") {
            config.patterns.s3_gate = re;
        }

        // Scenario matrix
        let matrix = &mut config.matrix;
        if let Some(v) = list_var("OBJ_SIZE") {
            matrix.obj_sizes = v;
        }
        if let Some(v) = list_var("OUT_FILE") {
            matrix.out_files = v;
        }
        if let Some(v) = list_var("WRITERS") {
            matrix.writers = v;
        }
        if let Some(v) = list_var("READERS") {
            matrix.readers = v;
        }
        if let Some(v) = list_var("DELETERS") {
            matrix.deleters = v;
        }
        if let Some(v) = list_var::<u64>("LOAD_TIME") {
            matrix.load_times = v.into_iter().map(Duration::from_secs).collect();
        }
        if let Some(v) = list_var("STORAGE_NODE_COUNT") {
            matrix.node_counts = v;
        }
        if let Some(v) = list_var("CONTAINERS_COUNT") {
            matrix.containers_counts = v;
        }
        if let Some(v) = list_var::<ProtocolFamily>("LOAD_TYPE") {
            matrix.load_types = v;
        }
        if let Some(v) = list_var("OBJ_COUNT") {
            matrix.obj_counts = v;
        }
        if let Some(v) = list_var("LOAD_NODES_COUNT") {
            matrix.load_nodes_counts = v;
        }

        config
    }
}

/// Read a comma-separated variable; `None` if unset, empty or unparseable
fn list_var<T: FromStr>(name: &str) -> Option<Vec<T>> {
    env::var(name).ok().and_then(|val| parse_list(&val))
}

fn parse_list<T: FromStr>(val: &str) -> Option<Vec<T>> {
    let items = val
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<Vec<T>>>()?;
    (!items.is_empty()).then_some(items)
}
