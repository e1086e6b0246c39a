//! Entity declarations for the requestctl object families. Ported from
//! `conftool.extensions.reqconfig.schema`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::kvobject::{EntityType, Object};
use crate::types::ValidatorKind;

pub fn ipblock_entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    schema.insert("cidrs".to_string(), ValidatorKind::CidrList);
    schema.insert("comment".to_string(), ValidatorKind::Str);
    EntityType {
        label: "ipblock".to_string(),
        base_path: "request-ipblocks".to_string(),
        tags: vec!["scope".to_string()],
        schema,
        free_form: false,
        static_values: false,
        depends: vec![],
    }
}

pub fn pattern_entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    for field in [
        "method",
        "request_body",
        "url_path",
        "header",
        "header_value",
        "query_parameter",
        "query_parameter_value",
    ] {
        schema.insert(field.to_string(), ValidatorKind::Str);
    }
    EntityType {
        label: "pattern".to_string(),
        base_path: "request-patterns".to_string(),
        tags: vec!["scope".to_string()],
        schema,
        free_form: false,
        static_values: false,
        depends: vec![],
    }
}

pub fn action_entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    schema.insert("enabled".to_string(), ValidatorKind::Bool);
    schema.insert("cache_miss_only".to_string(), ValidatorKind::Bool);
    schema.insert("comment".to_string(), ValidatorKind::Str);
    schema.insert("expression".to_string(), ValidatorKind::Str);
    schema.insert("resp_status".to_string(), ValidatorKind::Int);
    schema.insert("resp_reason".to_string(), ValidatorKind::Str);
    schema.insert("sites".to_string(), ValidatorKind::List);
    schema.insert("do_throttle".to_string(), ValidatorKind::Bool);
    schema.insert("throttle_requests".to_string(), ValidatorKind::Int);
    schema.insert("throttle_interval".to_string(), ValidatorKind::Int);
    schema.insert("throttle_duration".to_string(), ValidatorKind::Int);
    schema.insert("throttle_per_ip".to_string(), ValidatorKind::Bool);
    schema.insert("log_matching".to_string(), ValidatorKind::Bool);
    EntityType {
        label: "action".to_string(),
        base_path: "request-actions".to_string(),
        tags: vec!["cluster".to_string()],
        schema,
        free_form: false,
        static_values: false,
        depends: vec!["pattern".to_string(), "ipblock".to_string()],
    }
}

pub fn vcl_entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    schema.insert("vcl".to_string(), ValidatorKind::Str);
    EntityType {
        label: "vcl".to_string(),
        base_path: "request-vcl".to_string(),
        tags: vec!["cluster".to_string()],
        schema,
        free_form: false,
        static_values: false,
        depends: vec!["action".to_string()],
    }
}

/// Dependency order for bulk sync: `pattern`/`ipblock` are created before
/// the `action`s that reference them, and removed only after. `vcl` is a
/// derived/compiled entity and is never synced from disk.
pub const SYNC_ENTITIES: &[&str] = &["pattern", "ipblock", "action"];

/// Resolve a `scope/name` (or `cluster/name`) slug token back to a
/// concrete object of the given entity type against the live backend.
pub fn get_obj_from_slug(
    entity_type: &Arc<EntityType>,
    driver: &dyn crate::backend::Driver,
    slug: &str,
) -> crate::Result<Object> {
    let mut parts = slug.splitn(2, '/');
    let scope = parts
        .next()
        .ok_or_else(|| failure::err_msg(format!("malformed slug: {}", slug)))?;
    let name = parts
        .next()
        .ok_or_else(|| failure::err_msg(format!("malformed slug: {}", slug)))?;
    let tag_name = entity_type
        .tags
        .first()
        .cloned()
        .unwrap_or_else(|| "scope".to_string());
    let mut selectors = BTreeMap::new();
    selectors.insert(tag_name, regex::escape(scope));
    selectors.insert("name".to_string(), regex::escape(name));
    let matches = crate::kvobject::query(entity_type, driver, &selectors)?;
    matches
        .into_iter()
        .next()
        .ok_or_else(|| failure::err_msg(format!("no object found for slug {}", slug)))
}
