//! Commit/restore workflow: writes a compiled `MwConfig` to the backend
//! as `mwconfig` objects (one per compiled key, tagged by datacenter),
//! caches the previously-live blob to a rollback file before
//! overwriting it, and can restore from that cache. Ported from
//! `DbConfig.commit`/`live_config` in
//! `conftool.extensions.dbconfig.config`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::announce::Announcer;
use crate::backend::Driver;
use crate::kvobject::{EntityType, Object};
use crate::types::JsonSchemaLoader;

use super::compiler::MwConfig;

/// The `mwconfig` entity type: free-form values keyed by the compiled
/// blob name (`sectionLoads`, `groupLoadsBySection`, `readOnlyBySection`,
/// `externalLoads`, `hostsByName`), tagged by datacenter scope.
pub fn entity_type() -> EntityType {
    EntityType {
        label: "mwconfig".to_string(),
        base_path: "mwconfig".to_string(),
        tags: vec!["scope".to_string()],
        schema: BTreeMap::new(),
        free_form: true,
        static_values: false,
        depends: vec![],
    }
}

fn blob_names() -> [&'static str; 5] {
    [
        "sectionLoads",
        "groupLoadsBySection",
        "readOnlyBySection",
        "externalLoads",
        "hostsByName",
    ]
}

fn blob_value(config: &MwConfig, name: &str, dc: &str) -> Value {
    match name {
        "sectionLoads" => serde_json::to_value(config.section_loads.get(dc).cloned().unwrap_or_default()),
        "groupLoadsBySection" => {
            serde_json::to_value(config.group_loads_by_section.get(dc).cloned().unwrap_or_default())
        }
        "readOnlyBySection" => {
            serde_json::to_value(config.read_only_by_section.get(dc).cloned().unwrap_or_default())
        }
        "externalLoads" => serde_json::to_value(config.external_loads.get(dc).cloned().unwrap_or_default()),
        "hostsByName" => serde_json::to_value(&config.hosts_by_name),
        _ => Ok(Value::Null),
    }
    .unwrap_or(Value::Null)
}

/// Read the currently-live compiled blob back out of the backend so it
/// can be cached before being overwritten.
pub fn read_live(entity_type: &std::sync::Arc<EntityType>, driver: &dyn Driver, dcs: &[String]) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for dc in dcs {
        for name in blob_names() {
            let mut tags = BTreeMap::new();
            tags.insert("scope".to_string(), dc.clone());
            let mut obj = Object::new(std::sync::Arc::clone(entity_type), tags, name.to_string());
            obj.fetch(driver);
            if obj.exists {
                out.insert(format!("{}/{}", dc, name), Value::Object(obj.extra.into_iter().collect()));
            }
        }
    }
    out
}

/// Cache the live blob to `<cache_path>/dbconfig/<timestamp>-<user>.json`
/// before a commit overwrites it. Returns the path written so the caller
/// can surface it in the rollback-instruction message.
pub fn cache_rollback(
    cache_path: &Path,
    timestamp: &str,
    user: &str,
    live: &BTreeMap<String, Value>,
) -> crate::Result<std::path::PathBuf> {
    let dir = cache_path.join("dbconfig");
    fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755))?;
    }
    let path = dir.join(format!("{}-{}.json", timestamp, user));
    let body = serde_json::to_string_pretty(live)?;
    fs::write(&path, body)?;
    Ok(path)
}

/// Validate the compiled blob for one `(dc, name)` pair against every
/// configured schema rule whose selector matches that tag/name pair; a
/// blob matched by zero rules passes trivially.
fn validate_blob(
    loader: Option<&mut JsonSchemaLoader>,
    dc: &str,
    name: &str,
    value: &Value,
) -> crate::Result<()> {
    if let Some(loader) = loader {
        let mut tags = BTreeMap::new();
        tags.insert("scope".to_string(), dc.to_string());
        loader.validate_all(&tags, name, value)?;
    }
    Ok(())
}

/// Write every compiled blob to the backend, announce the commit, and
/// return the set of `(dc, name)` keys written.
pub fn commit(
    entity_type: &std::sync::Arc<EntityType>,
    driver: &dyn Driver,
    config: &MwConfig,
    dcs: &[String],
    mut schema: Option<&mut JsonSchemaLoader>,
    announcer: &dyn Announcer,
    actor: &str,
) -> crate::Result<Vec<(String, String)>> {
    let mut written = Vec::new();
    for dc in dcs {
        for name in blob_names() {
            let value = blob_value(config, name, dc);
            validate_blob(schema.as_deref_mut(), dc, name, &value)?;
            let mut tags = BTreeMap::new();
            tags.insert("scope".to_string(), dc.clone());
            let mut obj = Object::new(std::sync::Arc::clone(entity_type), tags, name.to_string());
            if let Value::Object(map) = value {
                for (k, v) in map {
                    obj.extra.insert(k, v);
                }
            }
            obj.write(driver)?;
            written.push((dc.clone(), name.to_string()));
        }
    }
    announcer.announce(&format!("{}: committed dbctl config for {:?}", actor, dcs)).ok();
    Ok(written)
}

/// Restore a previously cached blob, writing it back verbatim.
pub fn restore(
    entity_type: &std::sync::Arc<EntityType>,
    driver: &dyn Driver,
    cache_path: &Path,
    announcer: &dyn Announcer,
    actor: &str,
) -> crate::Result<()> {
    let raw = fs::read_to_string(cache_path)?;
    let cached: BTreeMap<String, Value> = serde_json::from_str(&raw)?;
    for (key, value) in cached {
        let mut parts = key.splitn(2, '/');
        let dc = parts.next().unwrap_or_default().to_string();
        let name = parts.next().unwrap_or_default().to_string();
        let mut tags = BTreeMap::new();
        tags.insert("scope".to_string(), dc.clone());
        let mut obj = Object::new(std::sync::Arc::clone(entity_type), tags, name);
        if let Value::Object(map) = value {
            for (k, v) in map {
                obj.extra.insert(k, v);
            }
        }
        obj.write(driver)?;
    }
    announcer
        .announce(&format!("{}: restored dbctl config from {}", actor, cache_path.display()))
        .ok();
    Ok(())
}
