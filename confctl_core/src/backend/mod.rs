//! The KV backend abstraction. `Driver` is the seam between entity logic
//! and whatever strongly-consistent store actually holds the data; today
//! the only implementation is etcd v2 (`backend::etcd`).

pub mod etcd;

use std::collections::BTreeMap;

use failure::{Context, Fail};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Debug)]
pub struct BackendError {
    inner: Context<BackendErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum BackendErrKind {
    #[fail(display = "key not found: {}", _0)]
    NotFound(String),
    #[fail(display = "{} is not a directory", _0)]
    NotADirectory(String),
    #[fail(display = "backend request failed: {}", _0)]
    Request(String),
    #[fail(display = "backend returned malformed data for {}", _0)]
    Malformed(String),
    #[fail(display = "lock held by another client: {}", _0)]
    Locked(String),
}

impl Fail for BackendError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl From<BackendErrKind> for BackendError {
    fn from(kind: BackendErrKind) -> BackendError {
        BackendError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<BackendErrKind>> for BackendError {
    fn from(inner: Context<BackendErrKind>) -> BackendError {
        BackendError { inner }
    }
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self.inner.get_context(), BackendErrKind::NotFound(_))
    }
}

/// A single JSON-serialized object stored under a key, as a flat string
/// map — entities decode/encode this themselves via their schema.
pub type NodeValues = BTreeMap<String, serde_json::Value>;

/// Transport-agnostic KV operations. One key is one entity; there is no
/// multi-key transaction primitive (see the crate's concurrency model).
pub trait Driver {
    fn is_dir(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> BackendResult<NodeValues>;
    fn write(&self, path: &str, values: &NodeValues) -> BackendResult<()>;
    fn delete(&self, path: &str) -> BackendResult<()>;
    fn ls(&self, path: &str, recursive: bool) -> BackendResult<Vec<String>>;
    fn all_keys(&self, path: &str) -> BackendResult<Vec<Vec<String>>>;
    fn all_data(&self, path: &str) -> BackendResult<Vec<(Vec<String>, NodeValues)>>;

    /// Best-effort advisory lock. Never relied upon for write correctness;
    /// see the crate's concurrency model. Returns `Ok(())` even on
    /// backends that don't implement locking.
    fn get_lock(&self, _path: &str, _ttl_secs: u64) -> BackendResult<()> {
        Ok(())
    }
    fn release_lock(&self, _path: &str) -> BackendResult<()> {
        Ok(())
    }
    fn watch_lock(&self, _path: &str) -> BackendResult<bool> {
        Ok(true)
    }
}
