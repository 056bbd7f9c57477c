use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `AUTOMATION__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub conditions: ConditionConfig,
}

fn default_node_id() -> String {
    "worker-01".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            scheduler: SchedulerConfig::default(),
            channels: ChannelConfig::default(),
            conditions: ConditionConfig::default(),
        }
    }
}

// ─── Scheduler Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Consecutive failures after which a member is cancelled. `None` keeps
    /// retrying on every tick.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_batch_size() -> usize {
    100
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_lease_ttl_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tick_interval_secs: default_tick_interval_secs(),
            worker_concurrency: default_worker_concurrency(),
            lease_ttl_secs: default_lease_ttl_secs(),
            max_attempts: None,
        }
    }
}

// ─── Channel Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_channel_timeout_ms() -> u64 {
    5000
}

fn default_from_email() -> String {
    "noreply@example.com".to_string()
}

fn default_from_name() -> String {
    "Marketing".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_channel_timeout_ms(),
            from_email: default_from_email(),
            from_name: default_from_name(),
        }
    }
}

// ─── Condition Config ───────────────────────────────────────────────────────

/// Customer fields a condition step is allowed to read.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionConfig {
    #[serde(default = "default_allowed_fields")]
    pub allowed_fields: Vec<String>,
}

fn default_allowed_fields() -> Vec<String> {
    [
        "first_name",
        "last_name",
        "email",
        "phone",
        "total_purchases",
        "total_spent",
        "lifetime_value",
        "loyalty_points",
        "loyalty_tier",
        "country",
        "city",
        "days_since_last_purchase",
        "status",
    ]
    .iter()
    .map(|f| f.to_string())
    .collect()
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            allowed_fields: default_allowed_fields(),
        }
    }
}

impl ConditionConfig {
    pub fn is_allowed(&self, field: &str) -> bool {
        self.allowed_fields.iter().any(|f| f == field)
    }
}

impl AppConfig {
    /// Load configuration from an optional config file, then environment
    /// variables (`AUTOMATION__SCHEDULER__BATCH_SIZE=50`, ...).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("automation").required(false)),
        };
        let builder = builder.add_source(
            config::Environment::with_prefix("AUTOMATION")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("conditions.allowed_fields"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
