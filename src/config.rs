//! Configuration management for subsweep.
//!
//! Settings come from three layers with increasing precedence: built-in
//! defaults, `SUBSWEEP_*` environment variables, then command-line flags.
//! The result is validated once before the engine starts.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for subsweep.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// DNS / HTTP settings
    pub network: NetworkConfig,

    /// Adaptive concurrency controller tuning
    pub concurrency: ConcurrencyConfig,

    /// Which discovery sources run and how
    pub discovery: DiscoveryConfig,

    /// Run-level behaviour (deadline, probing, progress)
    pub run: RunConfig,

    /// Output directory layout
    pub output: OutputConfig,
}

/// Network-related configuration options
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Timeout for a single DNS query
    pub dns_timeout: Duration,

    /// Retries after a transient DNS failure
    pub dns_retries: u32,

    /// Initial backoff before the first DNS retry
    pub dns_retry_delay: Duration,

    /// Maximum number of cached DNS answers
    pub dns_cache_capacity: u64,

    /// Timeout for one HTTP probe request
    pub probe_timeout: Duration,

    /// Timeout for passive API requests
    pub api_timeout: Duration,

    /// Maximum redirects followed by the prober
    pub max_redirects: usize,

    /// Maximum body bytes read when looking for a <title>
    pub max_body_bytes: usize,

    /// User-Agent sent with every HTTP request
    pub user_agent: String,
}

/// AIMD controller settings
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub initial: usize,
    pub floor: usize,
    pub ceiling: usize,
    /// Completions per adjustment window
    pub window: usize,
    pub increase_step: usize,
    pub decrease_factor: f64,
    pub latency_threshold: Duration,
    /// Fraction of transient DNS failures that triggers a decrease
    pub error_threshold: f64,
}

/// Discovery source selection
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub passive: bool,
    pub active: bool,
    pub bruteforce: bool,

    /// User wordlist; the built-in list is used when `None`
    pub wordlist: Option<PathBuf>,

    /// Fixed concurrency for brute-force resolution
    pub bruteforce_concurrency: usize,

    pub permutations: bool,
    pub max_permutations: usize,

    /// Overrides every per-source timeout budget when set
    pub source_timeout: Option<Duration>,

    /// Ingest subdomains.txt from a previous run
    pub resume: bool,
}

/// Run-level settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Wall-clock budget for the whole run
    pub deadline: Option<Duration>,

    /// Time allowed for in-flight work to unwind once the deadline fires
    pub shutdown_grace: Duration,

    /// Probe resolved names over HTTP(S)
    pub probe: bool,

    /// Interval between progress log lines
    pub progress_interval: Duration,
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Root directory; a `<target>/` folder is created beneath it
    pub directory: PathBuf,

    /// Write `raw/<source>.txt` files
    pub write_raw: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            dns_timeout: Duration::from_secs(3),
            dns_retries: 2,
            dns_retry_delay: Duration::from_millis(250),
            dns_cache_capacity: 100_000,
            probe_timeout: Duration::from_secs(10),
            api_timeout: Duration::from_secs(30),
            max_redirects: 5,
            max_body_bytes: 64 * 1024,
            user_agent: format!("subsweep/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            initial: 50,
            floor: 5,
            ceiling: 500,
            window: 20,
            increase_step: 10,
            decrease_factor: 0.5,
            latency_threshold: Duration::from_millis(2000),
            error_threshold: 0.10,
        }
    }
}

impl ConcurrencyConfig {
    /// Lower the ceiling, pulling `initial` and `floor` down with it.
    pub fn cap(&mut self, ceiling: usize) {
        self.ceiling = ceiling;
        self.initial = self.initial.min(ceiling);
        if self.floor > ceiling {
            self.floor = ceiling.max(1);
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            passive: true,
            active: true,
            bruteforce: true,
            wordlist: None,
            bruteforce_concurrency: 50,
            permutations: false,
            max_permutations: 5_000,
            source_timeout: None,
            resume: false,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline: None,
            shutdown_grace: Duration::from_secs(5),
            probe: true,
            progress_interval: Duration::from_secs(5),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("results"),
            write_raw: true,
        }
    }
}

fn env_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("SUBSWEEP_DNS_TIMEOUT_SECS")
            && let Ok(secs) = timeout.parse::<u64>()
        {
            config.network.dns_timeout = Duration::from_secs(secs);
        }

        if let Ok(retries) = std::env::var("SUBSWEEP_DNS_RETRIES")
            && let Ok(n) = retries.parse::<u32>()
        {
            config.network.dns_retries = n;
        }

        if let Ok(timeout) = std::env::var("SUBSWEEP_PROBE_TIMEOUT_SECS")
            && let Ok(secs) = timeout.parse::<u64>()
        {
            config.network.probe_timeout = Duration::from_secs(secs);
        }

        if let Ok(n) = std::env::var("SUBSWEEP_CONCURRENCY")
            && let Ok(n) = n.parse::<usize>()
        {
            config.concurrency.initial = n;
        }

        if let Ok(n) = std::env::var("SUBSWEEP_MAX_CONCURRENCY")
            && let Ok(n) = n.parse::<usize>()
        {
            config.concurrency.cap(n);
        }

        if let Ok(deadline) = std::env::var("SUBSWEEP_DEADLINE_SECS")
            && let Ok(secs) = deadline.parse::<u64>()
        {
            config.run.deadline = Some(Duration::from_secs(secs));
        }

        if let Ok(dir) = std::env::var("SUBSWEEP_OUTPUT_DIR") {
            config.output.directory = PathBuf::from(dir);
        }

        if let Ok(path) = std::env::var("SUBSWEEP_WORDLIST") {
            config.discovery.wordlist = Some(PathBuf::from(path));
        }

        if let Ok(v) = std::env::var("SUBSWEEP_NO_PROBE") {
            config.run.probe = !env_flag(&v);
        }

        config
    }

    /// Merge with CLI arguments, giving CLI precedence
    pub fn merge_with_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(ref dir) = cli.output {
            self.output.directory = dir.clone();
        }
        if let Some(secs) = cli.timeout {
            self.discovery.source_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = cli.deadline {
            self.run.deadline = Some(Duration::from_secs(secs));
        }

        if cli.passive_only {
            self.discovery.active = false;
            self.discovery.bruteforce = false;
        }
        if cli.active_only {
            self.discovery.passive = false;
        }
        if cli.no_bruteforce {
            self.discovery.bruteforce = false;
        }
        if let Some(ref path) = cli.wordlist {
            self.discovery.wordlist = Some(path.clone());
        }
        if cli.permutations {
            self.discovery.permutations = true;
        }
        if cli.resume {
            self.discovery.resume = true;
        }
        if cli.no_probe {
            self.run.probe = false;
        }

        if let Some(n) = cli.concurrency {
            self.concurrency.initial = n;
        }
        if let Some(n) = cli.max_concurrency {
            self.concurrency.cap(n);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.dns_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "network.dns_timeout".to_string(),
                value: "0".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }

        if self.network.probe_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "network.probe_timeout".to_string(),
                value: "0".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }

        let c = &self.concurrency;
        if c.floor == 0 || c.floor > c.ceiling {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.floor".to_string(),
                value: c.floor.to_string(),
                reason: format!("Floor must be between 1 and the ceiling ({})", c.ceiling),
            });
        }
        if c.initial < c.floor || c.initial > c.ceiling {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.initial".to_string(),
                value: c.initial.to_string(),
                reason: format!("Initial limit must lie in [{}, {}]", c.floor, c.ceiling),
            });
        }
        if c.window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.window".to_string(),
                value: "0".to_string(),
                reason: "Window must contain at least one completion".to_string(),
            });
        }
        if !(c.decrease_factor > 0.0 && c.decrease_factor < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.decrease_factor".to_string(),
                value: c.decrease_factor.to_string(),
                reason: "Decrease factor must be in (0, 1)".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&c.error_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.error_threshold".to_string(),
                value: c.error_threshold.to_string(),
                reason: "Error threshold is a fraction in [0, 1]".to_string(),
            });
        }

        if self.discovery.bruteforce_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "discovery.bruteforce_concurrency".to_string(),
                value: "0".to_string(),
                reason: "Brute-force concurrency must be at least 1".to_string(),
            });
        }

        if let Some(t) = self.discovery.source_timeout
            && t.is_zero()
        {
            return Err(ConfigError::InvalidValue {
                field: "discovery.source_timeout".to_string(),
                value: "0".to_string(),
                reason: "Source timeout must be greater than 0".to_string(),
            });
        }

        if let Some(d) = self.run.deadline
            && d.is_zero()
        {
            return Err(ConfigError::InvalidValue {
                field: "run.deadline".to_string(),
                value: "0".to_string(),
                reason: "Deadline must be greater than 0".to_string(),
            });
        }

        if self.run.progress_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "run.progress_interval".to_string(),
                value: "0".to_string(),
                reason: "Progress interval must be greater than 0".to_string(),
            });
        }

        if let Some(ref path) = self.discovery.wordlist
            && self.discovery.bruteforce
            && !path.is_file()
        {
            return Err(ConfigError::MissingRequired {
                field: format!("discovery.wordlist ({})", path.display()),
            });
        }

        Ok(())
    }

    /// Timeout budget for a source: the global override wins over the catalogue value.
    pub fn source_budget(&self, catalogue_default: Duration) -> Duration {
        self.discovery.source_timeout.unwrap_or(catalogue_default)
    }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Missing required configuration
    MissingRequired { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid value '{}' for '{}': {}", value, field, reason)
            }
            ConfigError::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::errors::SweepError {
    fn from(e: ConfigError) -> Self {
        crate::errors::SweepError::configuration(e.to_string())
    }
}
