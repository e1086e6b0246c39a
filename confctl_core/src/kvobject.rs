//! The `Entity` runtime: path mapping, fetch/write/update, and the
//! absorb-on-read / raise-on-write validation split. Ported from
//! `conftool.kvobject.KVObject`.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;
use regex::Regex;
use serde_json::Value;

use crate::backend::{BackendResult, Driver, NodeValues};
use crate::types::ValidatorKind;

/// A declared entity type: its tag names (in path order), its schema
/// (field name -> validator), and whether it is free-form (extra fields
/// beyond the schema are preserved verbatim) or schema-strict.
#[derive(Clone)]
pub struct EntityType {
    pub label: String,
    pub base_path: String,
    pub tags: Vec<String>,
    pub schema: BTreeMap<String, ValidatorKind>,
    pub free_form: bool,
    /// entities whose values (not just existence) are reconciled on sync
    pub static_values: bool,
    pub depends: Vec<String>,
}

impl EntityType {
    pub fn get_default(&self, field: &str) -> Value {
        self.schema
            .get(field)
            .map(|v| v.default_value())
            .unwrap_or(Value::Null)
    }
}

/// A single concrete object: an entity type plus the tag values and name
/// identifying one KV path, plus whatever field values are currently
/// loaded in memory.
#[derive(Clone)]
pub struct Object {
    pub entity_type: Arc<EntityType>,
    pub tags: BTreeMap<String, String>,
    pub name: String,
    pub values: BTreeMap<String, Value>,
    /// fields present in the backend but not part of the declared schema;
    /// only ever non-empty for free-form entities.
    pub extra: BTreeMap<String, Value>,
    pub exists: bool,
}

impl Object {
    pub fn new(entity_type: Arc<EntityType>, tags: BTreeMap<String, String>, name: String) -> Object {
        let mut values = BTreeMap::new();
        for (field, validator) in &entity_type.schema {
            values.insert(field.clone(), validator.default_value());
        }
        Object {
            entity_type,
            tags,
            name,
            values,
            extra: BTreeMap::new(),
            exists: false,
        }
    }

    pub fn key(&self) -> String {
        let mut parts: Vec<&str> = vec![self.entity_type.base_path.as_str()];
        for tag in &self.entity_type.tags {
            if let Some(v) = self.tags.get(tag) {
                parts.push(v.as_str());
            }
        }
        parts.push(self.name.as_str());
        parts.join("/")
    }

    /// `scope/name`-style short identifier used throughout the requestctl
    /// and dbctl CLI output.
    pub fn pprint(&self) -> String {
        let mut parts: Vec<String> = self
            .entity_type
            .tags
            .iter()
            .filter_map(|t| self.tags.get(t).cloned())
            .collect();
        parts.push(self.name.clone());
        parts.join("/")
    }

    /// `{name: {field: value}}`, matching `KVObject.__str__`/`asdict`.
    pub fn asdict(&self) -> BTreeMap<String, Value> {
        let mut fields = self.values.clone();
        for (k, v) in &self.extra {
            fields.insert(k.clone(), v.clone());
        }
        let mut out = BTreeMap::new();
        out.insert(self.name.clone(), Value::Object(fields.into_iter().collect()));
        out
    }

    fn to_net(&self) -> NodeValues {
        let mut out: NodeValues = self.values.clone().into_iter().collect();
        if self.entity_type.free_form {
            for (k, v) in &self.extra {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Absorb values fetched from the backend. Any field that fails
    /// validation is logged and replaced with its schema default rather
    /// than failing the fetch — matching `_set_value`'s absorb-on-read
    /// policy.
    fn from_net(&mut self, values: NodeValues) {
        let entity_type = Arc::clone(&self.entity_type);
        for (field, validator) in &entity_type.schema {
            match values.get(field) {
                Some(raw) => match validator.validate(raw) {
                    Ok(v) => {
                        self.values.insert(field.clone(), v);
                    }
                    Err(e) => {
                        warn!(
                            "{}: invalid value for field {}: {} (using default)",
                            self.key(),
                            field,
                            e
                        );
                        self.values.insert(field.clone(), validator.default_value());
                    }
                },
                None => {
                    self.values
                        .insert(field.clone(), validator.default_value());
                }
            }
        }
        if entity_type.free_form {
            self.extra.clear();
            for (k, v) in values {
                if !entity_type.schema.contains_key(&k) {
                    self.extra.insert(k, v);
                }
            }
        }
    }

    pub fn fetch(&mut self, driver: &dyn Driver) {
        self.exists = false;
        match driver.read(&self.key()) {
            Ok(values) => {
                self.exists = !values.is_empty();
                self.from_net(values);
            }
            Err(e) => {
                if !e.is_not_found() {
                    warn!("{}: backend error on fetch: {}", self.key(), e);
                }
            }
        }
    }

    pub fn write(&self, driver: &dyn Driver) -> BackendResult<()> {
        driver.write(&self.key(), &self.to_net())
    }

    pub fn delete(&self, driver: &dyn Driver) -> BackendResult<()> {
        driver.delete(&self.key())
    }

    /// Update only the keys present in `values`, validating each and
    /// raising (rather than absorbing) on a bad value, then writing.
    /// Matches `KVObject.update`.
    pub fn update(&mut self, values: &BTreeMap<String, Value>, driver: &dyn Driver) -> crate::Result<()> {
        let entity_type = Arc::clone(&self.entity_type);
        for (k, v) in values {
            if let Some(validator) = entity_type.schema.get(k) {
                let validated = validator.validate(v)?;
                self.values.insert(k.clone(), validated);
            } else if entity_type.free_form {
                self.extra.insert(k.clone(), v.clone());
            }
        }
        self.write(driver)?;
        Ok(())
    }

    /// True only for objects whose values differ from what's already on
    /// the backend; used by the `static_values` syncer path to decide
    /// whether a write is needed at all (`service.py::changed`).
    pub fn changed(&self, other: &BTreeMap<String, Value>) -> bool {
        &self.values != other
    }
}

/// Parse a `tag=value,tag2=value2` list strictly: every declared tag must
/// be present or this is an error (`KVObject.parse_tags`/`get_tags`).
pub fn parse_tags(entity_type: &EntityType, taglist: &[String]) -> crate::Result<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for item in taglist {
        let mut parts = item.splitn(2, '=');
        let k = parts
            .next()
            .ok_or_else(|| failure::err_msg(format!("malformed tag expression: {}", item)))?
            .trim();
        let v = parts
            .next()
            .ok_or_else(|| failure::err_msg(format!("malformed tag expression: {}", item)))?
            .trim();
        parsed.insert(k.to_string(), v.to_string());
    }
    let mut out = BTreeMap::new();
    for tag in &entity_type.tags {
        let v = parsed
            .get(tag)
            .ok_or_else(|| failure::err_msg(format!("missing required tag: {}", tag)))?;
        out.insert(tag.clone(), v.clone());
    }
    Ok(out)
}

/// Find every object under an entity type's tree whose tag values and
/// name match the given anchored regex selectors. Mirrors
/// `KVObject.query`: a selector map from tag name (plus the pseudo-tag
/// `"name"`) to a regex pattern, every clause must match.
pub fn query(
    entity_type: &Arc<EntityType>,
    driver: &dyn Driver,
    selectors: &BTreeMap<String, String>,
) -> crate::Result<Vec<Object>> {
    let compiled: BTreeMap<String, Regex> = selectors
        .iter()
        .map(|(k, v)| Ok((k.clone(), Regex::new(&format!("^{}$", v))?)))
        .collect::<crate::Result<_>>()?;
    let all = driver.all_data(&entity_type.base_path)?;
    let mut out = Vec::new();
    for (segments, values) in all {
        if segments.len() != entity_type.tags.len() + 1 {
            continue;
        }
        let (tag_segs, name_seg) = segments.split_at(entity_type.tags.len());
        let name = name_seg[0].clone();
        let tags: BTreeMap<String, String> = entity_type
            .tags
            .iter()
            .cloned()
            .zip(tag_segs.iter().cloned())
            .collect();
        let mut matched = true;
        for (key, re) in &compiled {
            let subject = if key == "name" {
                name.as_str()
            } else {
                match tags.get(key) {
                    Some(v) => v.as_str(),
                    None => {
                        matched = false;
                        break;
                    }
                }
            };
            if !re.is_match(subject) {
                matched = false;
                break;
            }
        }
        if !matched {
            continue;
        }
        let mut obj = Object::new(Arc::clone(entity_type), tags, name);
        obj.exists = true;
        obj.from_net(values);
        out.push(obj);
    }
    Ok(out)
}

/// The `Entity` trait every concrete object family (`node`, `service`,
/// `dbctl::Instance`, `requestctl::Pattern`, ...) implements on top of
/// the generic `Object` machinery above, so callers can work against one
/// interface regardless of which schema backs it.
pub trait Entity {
    fn object(&self) -> &Object;
    fn object_mut(&mut self) -> &mut Object;

    fn key(&self) -> String {
        self.object().key()
    }

    fn pprint(&self) -> String {
        self.object().pprint()
    }
}
