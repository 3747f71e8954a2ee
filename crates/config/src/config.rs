//! Configuration structures and parsing for content-proxy

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rule file {path:?}: {source}")]
    RuleFile {
        path: PathBuf,
        #[source]
        source: Box<ConfigError>,
    },
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream target settings
    #[serde(default)]
    pub target: TargetConfig,

    /// Rule file settings
    #[serde(default)]
    pub rules: RulesConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Request body debugging
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Config {
    /// Load and validate configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file without validating it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port must be between 1 and 65535".to_string(),
            ));
        }

        if parse_duration(&self.server.read_timeout).is_none() {
            return Err(ConfigError::Validation(format!(
                "Invalid server.read_timeout: {:?}",
                self.server.read_timeout
            )));
        }

        self.target.validate()?;

        let rule_files = self.rules.paths();
        if rule_files.is_empty() {
            return Err(ConfigError::Validation(
                "No rule file configured, set rules.file or rules.files".to_string(),
            ));
        }

        for path in &rule_files {
            if !path.exists() {
                return Err(ConfigError::Validation(format!(
                    "Rule file not found: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Socket address string the proxy listens on
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Grace period for draining connections on shutdown, in seconds
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,

    /// Maximum buffered request body in bytes (0 = unlimited)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: u64,

    /// Path answered locally with the proxy's own health report
    #[serde(default)]
    pub health_path: Option<String>,

    /// Time allowed for a client to send request headers (e.g., "30s")
    #[serde(default = "default_read_timeout")]
    pub read_timeout: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_grace_period() -> u64 {
    30
}

fn default_max_body_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_read_timeout() -> String {
    "30s".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            grace_period: default_grace_period(),
            max_body_size: default_max_body_size(),
            health_path: None,
            read_timeout: default_read_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        parse_duration(&self.read_timeout).unwrap_or(Duration::from_secs(30))
    }
}

/// Upstream target configuration (single or multiple servers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Single upstream base URL
    #[serde(default)]
    pub base_url: String,

    /// Multiple upstream base URLs, preferred over `base_url`
    #[serde(default)]
    pub urls: Vec<String>,

    /// Per-request upstream timeout (e.g., "30s", "500ms")
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Load balancing strategy across `urls`
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,

    /// Upstream health probe
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

fn default_timeout() -> String {
    "30s".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            urls: Vec::new(),
            timeout: default_timeout(),
            strategy: LoadBalancingStrategy::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl TargetConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() && self.urls.is_empty() {
            return Err(ConfigError::Validation(
                "No target configured, set target.base_url or target.urls".to_string(),
            ));
        }

        if !self.base_url.is_empty() && !self.urls.is_empty() {
            warn!("Both target.base_url and target.urls are set, using target.urls");
        }

        if let Some(url) = self.target_urls().iter().find(|u| u.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "Empty target URL: {:?}",
                url
            )));
        }

        if parse_duration(&self.timeout).is_none() {
            return Err(ConfigError::Validation(format!(
                "Invalid target.timeout: {:?}",
                self.timeout
            )));
        }

        if parse_duration(&self.health_check.timeout).is_none() {
            return Err(ConfigError::Validation(format!(
                "Invalid target.health_check.timeout: {:?}",
                self.health_check.timeout
            )));
        }

        Ok(())
    }

    /// All configured target URLs, `urls` taking precedence over `base_url`
    pub fn target_urls(&self) -> Vec<String> {
        if !self.urls.is_empty() {
            return self.urls.clone();
        }

        if !self.base_url.is_empty() {
            return vec![self.base_url.clone()];
        }

        Vec::new()
    }

    pub fn is_multi_target(&self) -> bool {
        self.target_urls().len() > 1
    }

    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(30))
    }
}

/// Load balancing strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadBalancingStrategy::RoundRobin => "round_robin",
            LoadBalancingStrategy::WeightedRoundRobin => "weighted_round_robin",
            LoadBalancingStrategy::LeastConnections => "least_connections",
        };
        f.write_str(name)
    }
}

/// Upstream health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Probe path on the upstream
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Probe deadline
    #[serde(default = "default_health_timeout")]
    pub timeout: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_timeout() -> String {
    "5s".to_string()
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            timeout: default_health_timeout(),
        }
    }
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }
}

/// Rule file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Primary rule file
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Additional rule files, concatenated after `file`
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Watch rule files and hot-reload on change
    #[serde(default = "default_auto_reload")]
    pub auto_reload: bool,
}

fn default_auto_reload() -> bool {
    true
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            file: None,
            files: Vec::new(),
            auto_reload: default_auto_reload(),
        }
    }
}

impl RulesConfig {
    /// Rule file paths in load order, duplicates removed
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for path in self.file.iter().chain(self.files.iter()) {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Request body debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub show_original: bool,

    #[serde(default = "default_true")]
    pub show_modified: bool,

    #[serde(default = "default_true")]
    pub show_rule_matches: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            show_original: true,
            show_modified: true,
            show_rule_matches: true,
        }
    }
}

impl DebugConfig {
    pub fn should_show_original(&self) -> bool {
        self.enabled && self.show_original
    }

    pub fn should_show_modified(&self) -> bool {
        self.enabled && self.show_modified
    }

    pub fn should_show_rule_matches(&self) -> bool {
        self.enabled && self.show_rule_matches
    }
}

/// Parse a duration such as "500ms", "30s", "1m", "2h" or bare seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num) = s.strip_suffix("ms") {
        num.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(num) = s.strip_suffix('s') {
        num.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(num) = s.strip_suffix('m') {
        num.parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(num) = s.strip_suffix('h') {
        num.parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_rules(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("rules.yaml");
        fs::write(&path, "rules: []\n").unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.target.strategy, LoadBalancingStrategy::RoundRobin);
        assert!(config.rules.auto_reload);
        assert_eq!(config.logging.level, "info");
        assert!(!config.debug.enabled);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000
health_path = "/health"

[target]
urls = ["http://127.0.0.1:9001", "http://127.0.0.1:9002"]
timeout = "10s"

[rules]
file = "rules.yaml"
files = ["extra.yaml"]
auto_reload = false

[debug]
enabled = true
show_original = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.address(), "127.0.0.1:9000");
        assert_eq!(config.server.health_path.as_deref(), Some("/health"));
        assert!(config.target.is_multi_target());
        assert_eq!(config.target.timeout(), Duration::from_secs(10));
        assert!(!config.rules.auto_reload);
        assert_eq!(
            config.rules.paths(),
            vec![PathBuf::from("rules.yaml"), PathBuf::from("extra.yaml")]
        );
        assert!(!config.debug.should_show_original());
        assert!(config.debug.should_show_modified());
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let rules = write_rules(&dir);
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                "[target]\nbase_url = \"http://localhost:3000\"\n\n[rules]\nfile = {:?}\n",
                rules.display().to_string()
            ),
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.target.target_urls(), vec!["http://localhost:3000"]);
        assert!(!config.target.is_multi_target());
    }

    #[test]
    fn test_urls_take_precedence() {
        let target = TargetConfig {
            base_url: "http://a".to_string(),
            urls: vec!["http://b".to_string()],
            ..Default::default()
        };
        assert_eq!(target.target_urls(), vec!["http://b"]);
    }

    #[test]
    fn test_paths_deduplicated() {
        let rules = RulesConfig {
            file: Some(PathBuf::from("a.yaml")),
            files: vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")],
            auto_reload: true,
        };
        assert_eq!(
            rules.paths(),
            vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]
        );
    }

    #[test]
    fn test_validation_no_target() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            rules: RulesConfig {
                file: Some(write_rules(&dir)),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_no_rule_file() {
        let config = Config {
            target: TargetConfig {
                base_url: "http://localhost:3000".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("No rule file"));
    }

    #[test]
    fn test_server_read_timeout() {
        assert_eq!(
            ServerConfig::default().read_timeout(),
            Duration::from_secs(30)
        );

        let dir = TempDir::new().unwrap();
        let mut config = Config {
            target: TargetConfig {
                base_url: "http://localhost:3000".to_string(),
                ..Default::default()
            },
            rules: RulesConfig {
                file: Some(write_rules(&dir)),
                ..Default::default()
            },
            ..Default::default()
        };
        config.server.read_timeout = "5s".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.read_timeout(), Duration::from_secs(5));

        config.server.read_timeout = "soon".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.read_timeout"));
    }

    #[test]
    fn test_validation_missing_rule_file() {
        let config = Config {
            target: TargetConfig {
                base_url: "http://localhost:3000".to_string(),
                ..Default::default()
            },
            rules: RulesConfig {
                file: Some(PathBuf::from("/nonexistent/rules.yaml")),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bad_timeout() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            target: TargetConfig {
                base_url: "http://localhost:3000".to_string(),
                timeout: "soon".to_string(),
                ..Default::default()
            },
            rules: RulesConfig {
                file: Some(write_rules(&dir)),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_port_zero() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            server: ServerConfig {
                port: 0,
                ..Default::default()
            },
            target: TargetConfig {
                base_url: "http://localhost:3000".to_string(),
                ..Default::default()
            },
            rules: RulesConfig {
                file: Some(write_rules(&dir)),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_balancing_strategies() {
        for (name, expected) in [
            ("round_robin", LoadBalancingStrategy::RoundRobin),
            ("weighted_round_robin", LoadBalancingStrategy::WeightedRoundRobin),
            ("least_connections", LoadBalancingStrategy::LeastConnections),
        ] {
            let toml = format!("[target]\nstrategy = \"{}\"\n", name);
            let config: Config = toml::from_str(&toml).unwrap();
            assert_eq!(config.target.strategy, expected);
            assert_eq!(expected.to_string(), name);
        }

        let unknown: Result<Config, _> = toml::from_str("[target]\nstrategy = \"random\"\n");
        assert!(unknown.is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("fast"), None);
    }

    #[test]
    fn test_parse_duration_overflow() {
        let huge = u64::MAX / 60 + 1;
        assert_eq!(parse_duration(&format!("{}m", huge)), None);
        assert_eq!(parse_duration(&format!("{}h", huge)), None);
        assert_eq!(
            parse_duration(&format!("{}s", u64::MAX)),
            Some(Duration::from_secs(u64::MAX))
        );
    }
}
