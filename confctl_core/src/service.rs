//! The `service` entity: per-cluster defaults applied to its `node`s, and
//! the datacenter list a service is expected to run in. Ported from
//! `conftool.service.Service`. This is the only built-in entity type
//! marked `static_values`: the syncer reconciles its field values on
//! every pass, not just create/delete.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::kvobject::{EntityType, Object};
use crate::types::ValidatorKind;

pub fn entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    schema.insert("default_values".to_string(), ValidatorKind::Dict);
    schema.insert("datacenters".to_string(), ValidatorKind::List);
    EntityType {
        label: "service".to_string(),
        base_path: "services".to_string(),
        tags: vec!["cluster".to_string()],
        schema,
        free_form: true,
        static_values: true,
        depends: vec![],
    }
}

pub fn new(entity_type: std::sync::Arc<EntityType>, cluster: &str, name: &str) -> Object {
    let mut tags = BTreeMap::new();
    tags.insert("cluster".to_string(), cluster.to_string());
    let mut obj = Object::new(entity_type, tags, name.to_string());
    obj.values.insert(
        "datacenters".to_string(),
        Value::Array(vec![Value::from("eqiad"), Value::from("codfw")]),
    );
    let mut defaults = serde_json::Map::new();
    defaults.insert("pooled".to_string(), Value::from("no"));
    defaults.insert("weight".to_string(), Value::from(0));
    obj.values
        .insert("default_values".to_string(), Value::Object(defaults));
    obj
}

/// A `node` belonging to this service falls back to these per-field
/// defaults rather than the generic schema defaults, when a field is
/// absent from the backend entirely. Mirrors `Node.get_default`
/// delegating to `Service.get_defaults`.
pub fn get_default(service: &Object, field: &str) -> Value {
    service
        .values
        .get("default_values")
        .and_then(|v| v.as_object())
        .and_then(|m| m.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_datacenters() {
        let et = std::sync::Arc::new(entity_type());
        let obj = new(et, "cache_text", "varnish");
        assert_eq!(
            obj.values.get("datacenters").unwrap(),
            &Value::Array(vec![Value::from("eqiad"), Value::from("codfw")])
        );
    }

    #[test]
    fn default_value_lookup() {
        let et = std::sync::Arc::new(entity_type());
        let obj = new(et, "cache_text", "varnish");
        assert_eq!(get_default(&obj, "pooled"), Value::from("no"));
    }
}
