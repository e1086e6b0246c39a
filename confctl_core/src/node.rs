//! The `node` entity: one pooled/depooled/weighted host within a
//! service's cluster. Ported from `conftool.node.Node`.

use std::collections::BTreeMap;

use crate::kvobject::{EntityType, Object};
use crate::types::ValidatorKind;

pub fn entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    schema.insert("weight".to_string(), ValidatorKind::Int);
    schema.insert(
        "pooled".to_string(),
        ValidatorKind::Enum(vec!["yes".into(), "no".into(), "inactive".into()]),
    );
    EntityType {
        label: "node".to_string(),
        base_path: "pools".to_string(),
        tags: vec!["dc".to_string(), "cluster".to_string(), "service".to_string()],
        schema,
        free_form: false,
        static_values: false,
        depends: vec!["service".to_string()],
    }
}

pub fn new(
    entity_type: std::sync::Arc<EntityType>,
    dc: &str,
    cluster: &str,
    service: &str,
    name: &str,
) -> Object {
    let mut tags = BTreeMap::new();
    tags.insert("dc".to_string(), dc.to_string());
    tags.insert("cluster".to_string(), cluster.to_string());
    tags.insert("service".to_string(), service.to_string());
    Object::new(entity_type, tags, name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pooled_state_is_no() {
        let et = std::sync::Arc::new(entity_type());
        let obj = new(et, "eqiad", "cache_text", "varnish", "cp1001");
        assert_eq!(obj.values.get("pooled").unwrap(), "no");
        assert_eq!(obj.values.get("weight").unwrap(), 0);
    }

    #[test]
    fn key_is_tag_ordered() {
        let et = std::sync::Arc::new(entity_type());
        let obj = new(et, "eqiad", "cache_text", "varnish", "cp1001");
        assert_eq!(obj.key(), "pools/eqiad/cache_text/varnish/cp1001");
    }
}
