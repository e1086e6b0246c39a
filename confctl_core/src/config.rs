//! Top-level tool configuration, loaded from a YAML file on disk.
//!
//! Mirrors `conftool.configuration.Config`: a handful of keys with sane
//! defaults, plus a check that the two on-disk tree roots are relative
//! paths (they get joined onto a sync root, an absolute path here would
//! silently escape it).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use failure::{Context, Fail};

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug)]
pub struct ConfigError {
    inner: Context<ConfigErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ConfigErrKind {
    #[fail(display = "{} must be a relative path", _0)]
    AbsolutePath(String),
    #[fail(display = "could not read config file {}", _0)]
    Read(String),
    #[fail(display = "could not parse config file {}", _0)]
    Parse(String),
}

impl Fail for ConfigError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl From<ConfigErrKind> for ConfigError {
    fn from(kind: ConfigErrKind) -> ConfigError {
        ConfigError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ConfigErrKind>> for ConfigError {
    fn from(inner: Context<ConfigErrKind>) -> ConfigError {
        ConfigError { inner }
    }
}

fn default_driver() -> String {
    "etcd".into()
}

fn default_hosts() -> Vec<String> {
    vec!["http://localhost:2379".into()]
}

fn default_namespace() -> String {
    "/conftool".into()
}

fn default_api_version() -> String {
    "v1".into()
}

fn default_pools_path() -> String {
    "pools".into()
}

fn default_services_path() -> String {
    "services".into()
}

fn default_tcpircbot_host() -> String {
    "localhost".into()
}

fn default_tcpircbot_port() -> u16 {
    9999
}

/// Tool-wide configuration, consumed by every `confctl`/`dbctl`/`requestctl`
/// binary. Loaded once at startup and handed to the `Driver` and schema
/// loader.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_pools_path")]
    pub pools_path: String,
    #[serde(default = "default_services_path")]
    pub services_path: String,
    #[serde(default)]
    pub driver_options: HashMap<String, String>,
    #[serde(default = "default_tcpircbot_host")]
    pub tcpircbot_host: String,
    #[serde(default = "default_tcpircbot_port")]
    pub tcpircbot_port: u16,
    #[serde(default)]
    pub cache_path: Option<String>,
    /// `selector=tag=regex,tag2=regex2` clauses paired with a JSON-schema
    /// file path, consumed by `dbctl commit` to validate compiled blobs
    /// before they're written. Absent entries mean no schema gate.
    #[serde(default)]
    pub schema_rules: Vec<SchemaRuleSpec>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchemaRuleSpec {
    pub selector: String,
    pub schema_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            driver: default_driver(),
            hosts: default_hosts(),
            namespace: default_namespace(),
            api_version: default_api_version(),
            pools_path: default_pools_path(),
            services_path: default_services_path(),
            driver_options: HashMap::new(),
            tcpircbot_host: default_tcpircbot_host(),
            tcpircbot_port: default_tcpircbot_port(),
            cache_path: None,
            schema_rules: Vec::new(),
        }
    }
}

impl Config {
    /// Load and validate a config file. Unlike the etcd driver's own
    /// `etcdrc` merge (which tolerates missing files), a missing tool
    /// config file here is an error: callers should fall back to
    /// `Config::default()` explicitly when they want that behaviour.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|_| ConfigErrKind::Read(path.display().to_string()))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .map_err(|_| ConfigErrKind::Parse(path.display().to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (label, value) in &[
            ("pools_path", &self.pools_path),
            ("services_path", &self.services_path),
        ] {
            if value.starts_with('/') {
                return Err(ConfigErrKind::AbsolutePath((*label).to_string()).into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.driver, "etcd");
        assert_eq!(cfg.tcpircbot_port, 9999);
    }

    #[test]
    fn rejects_absolute_pools_path() {
        let mut cfg = Config::default();
        cfg.pools_path = "/abs/pools".into();
        assert!(cfg.validate().is_err());
    }
}
