use std::fs;
use std::net::IpAddr;
use std::time::Duration;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::config_error;
use crate::core::{BalanceError, BalanceResult};

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)*[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.?$")
        .unwrap()
});

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_domain"))]
pub struct Config {
    pub domain: String,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub servers: Vec<Server>,

    #[validate(nested)]
    pub health_check: Option<HealthCheck>,

    pub log: Option<Log>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> BalanceResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {}: {}", path, e))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> BalanceResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse yaml conf: {}", e))?;

        trace!("Loaded conf: {conf:?}");

        // use validator to validate conf file
        conf.validate()
            .map_err(|e| BalanceError::Validation(format!("Conf file valid failed: {e}")))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> BalanceResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("Unable to serialize conf: {}", e))
    }

    fn validate_domain(&self) -> Result<(), ValidationError> {
        if !is_valid_domain(&self.domain) {
            let mut err = ValidationError::new("invalid_domain");
            err.add_param("domain".into(), &self.domain);
            return Err(err);
        }

        Ok(())
    }
}

/// Whether `domain` looks like a host name the interceptor can bind to.
pub fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty() && domain.len() <= 254 && DOMAIN_RE.is_match(domain)
}

/// One candidate endpoint as written in the config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct Server {
    #[serde(alias = "ip")]
    pub address: IpAddr,
    pub port: u16,
    #[serde(default = "Server::default_weight")]
    #[validate(range(min = 1))]
    pub weight: u32,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl Server {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            weight: Self::default_weight(),
            backup: false,
            disabled: false,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn as_backup(mut self) -> Self {
        self.backup = true;
        self
    }

    fn default_weight() -> u32 {
        1
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct HealthCheck {
    #[serde(default = "HealthCheck::default_interval_ms")]
    #[validate(range(min = 1))]
    pub interval_ms: u64,
    // no timeout unless configured, a stalled probe keeps the last known state
    #[validate(range(min = 1))]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub settlement: SettlementPolicy,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            timeout_ms: None,
            settlement: SettlementPolicy::default(),
        }
    }
}

impl HealthCheck {
    fn default_interval_ms() -> u64 {
        1000
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// How probe settlements from overlapping rounds are applied.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementPolicy {
    /// Every settlement is applied in arrival order, even one from an older round.
    #[default]
    LastWriteWins,
    /// A settlement is dropped if a newer round already settled for that endpoint.
    LatestRound,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_load_file() {
        init_log();
        let conf_str = r#"
---
domain: custom.domain
servers:
  - ip: 192.168.31.3
    port: 5018
  - address: 192.168.31.4
    port: 5018
    weight: 3
  - address: "::1"
    port: 5018
    backup: true

health_check:
  interval_ms: 500
  timeout_ms: 200
  settlement: latest_round

log:
  path: /tmp/dnslb.log
        "#
        .to_string();
        let conf = Config::from_yaml(&conf_str).unwrap();
        assert_eq!("custom.domain", conf.domain);
        assert_eq!(3, conf.servers.len());
        assert_eq!(1, conf.servers[0].weight);
        assert_eq!(3, conf.servers[1].weight);
        assert!(conf.servers[2].backup);
        assert!(!conf.servers[0].disabled);

        let check = conf.health_check.as_ref().unwrap();
        assert_eq!(Duration::from_millis(500), check.interval());
        assert_eq!(Some(Duration::from_millis(200)), check.timeout());
        assert_eq!(SettlementPolicy::LatestRound, check.settlement);
        assert_eq!("/tmp/dnslb.log", conf.log.as_ref().unwrap().path);

        let dumped = conf.to_yaml().unwrap();
        let reloaded = Config::from_yaml(&dumped).unwrap();
        assert_eq!(conf.servers, reloaded.servers);
        assert_eq!(SettlementPolicy::LatestRound, reloaded.health_check.unwrap().settlement);
    }

    #[test]
    fn test_load_shipped_conf() {
        init_log();
        let path = format!("{}/conf/config.yaml", env!("CARGO_MANIFEST_DIR"));
        let conf = Config::load_from_yaml(&path).unwrap();
        assert_eq!("custom.domain", conf.domain);
        assert_eq!(4, conf.servers.len());
        assert!(conf.servers[3].backup);
        assert!(conf.health_check.is_some());

        assert!(Config::load_from_yaml("/nonexistent/dnslb.yaml").is_err());
    }

    #[test]
    fn test_health_check_defaults() {
        init_log();
        let conf_str = r#"
---
domain: custom.domain
servers:
  - ip: 10.0.0.1
    port: 80
health_check: {}
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        let check = conf.health_check.unwrap();
        assert_eq!(1000, check.interval_ms);
        assert_eq!(None, check.timeout());
        assert_eq!(SettlementPolicy::LastWriteWins, check.settlement);
        assert!(conf.log.is_none());
    }

    #[test]
    fn test_valid_servers_length() {
        init_log();
        let conf_str = r#"
---
domain: custom.domain
servers: []
        "#;
        let conf = Config::from_yaml(conf_str);
        assert!(conf.is_err());
    }

    #[test]
    fn test_valid_server_weight() {
        init_log();
        let conf_str = r#"
---
domain: custom.domain
servers:
  - ip: 10.0.0.1
    port: 80
    weight: 0
        "#;
        match Config::from_yaml(conf_str) {
            Ok(_) => panic!("Expected error, but got a valid config"),
            Err(e) => eprintln!("Error: {:?}", e),
        }
    }

    #[test]
    fn test_valid_domain() {
        init_log();
        for domain in ["", "bad domain", "-leading.dash", "under_score.com"] {
            let conf_str = format!(
                "domain: \"{domain}\"\nservers:\n  - ip: 10.0.0.1\n    port: 80\n"
            );
            assert!(Config::from_yaml(&conf_str).is_err(), "{domain} should be rejected");
        }

        assert!(is_valid_domain("custom.domain"));
        assert!(is_valid_domain("localhost"));
        assert!(is_valid_domain("api.Example.COM."));
    }

    #[test]
    fn test_valid_server_address() {
        init_log();
        let conf_str = r#"
---
domain: custom.domain
servers:
  - ip: not-an-ip
    port: 80
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_health_check_interval() {
        init_log();
        let conf_str = r#"
---
domain: custom.domain
servers:
  - ip: 10.0.0.1
    port: 80
health_check:
  interval_ms: 0
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }
}
