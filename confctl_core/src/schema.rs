//! Declarative entity-type loading: reads a YAML schema file describing
//! each entity type's tags, fields and dependencies, builds an
//! `EntityType` per declaration, and orders them topologically so the
//! syncer creates/deletes objects in a safe order.
//!
//! Ported from `conftool.loader`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use failure::{Context, Fail};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::kvobject::EntityType;
use crate::types::ValidatorKind;

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

#[derive(Debug)]
pub struct SchemaError {
    inner: Context<SchemaErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum SchemaErrKind {
    #[fail(display = "circular dependency detected among entity types")]
    CircularDependency,
    #[fail(display = "entity type {} depends on undeclared type {}", _0, _1)]
    UnknownDependency(String, String),
    #[fail(display = "invalid field validator for {}.{}: {}", _0, _1, _2)]
    InvalidField(String, String, String),
}

impl Fail for SchemaError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl From<SchemaErrKind> for SchemaError {
    fn from(kind: SchemaErrKind) -> SchemaError {
        SchemaError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<SchemaErrKind>> for SchemaError {
    fn from(inner: Context<SchemaErrKind>) -> SchemaError {
        SchemaError { inner }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntityDef {
    path: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    schema: BTreeMap<String, String>,
    #[serde(default)]
    free_form: bool,
    #[serde(default)]
    static_values: bool,
    #[serde(default)]
    depends: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSchemaFile {
    #[serde(flatten)]
    entities: BTreeMap<String, RawEntityDef>,
}

/// Build one `EntityType` from its raw YAML declaration.
fn factory(name: &str, def: &RawEntityDef) -> SchemaResult<EntityType> {
    let mut schema = BTreeMap::new();
    for (field, validator_str) in &def.schema {
        let validator = ValidatorKind::parse(validator_str)
            .map_err(|e| SchemaErrKind::InvalidField(name.to_string(), field.clone(), e.to_string()))?;
        schema.insert(field.clone(), validator);
    }
    Ok(EntityType {
        label: name.to_string(),
        base_path: def.path.clone(),
        tags: def.tags.clone(),
        schema,
        free_form: def.free_form,
        static_values: def.static_values,
        depends: def.depends.clone(),
    })
}

fn default_entities() -> BTreeMap<String, EntityType> {
    let mut out = BTreeMap::new();
    out.insert("node".to_string(), crate::node::entity_type());
    out.insert("service".to_string(), crate::service::entity_type());
    out
}

/// The full set of registered entity types, dependency-ordered for sync
/// purposes. `has_errors` is set (not raised) when the schema file fails
/// to parse, matching the Python loader's tolerant behaviour — a broken
/// schema file degrades to "only the built-in entities exist" rather
/// than aborting the whole tool.
pub struct Schema {
    pub entities: BTreeMap<String, Arc<EntityType>>,
    pub order: Vec<String>,
    pub has_errors: bool,
}

impl Schema {
    /// Load from a schema YAML file. A missing file is not an error: it
    /// just means only `node`/`service` are registered.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SchemaResult<Schema> {
        let path = path.as_ref();
        let mut entities = default_entities();
        let mut has_errors = false;

        if path.exists() {
            match fs::read_to_string(path) {
                Ok(raw) => match serde_yaml::from_str::<RawSchemaFile>(&raw) {
                    Ok(parsed) => {
                        for (name, def) in parsed.entities {
                            match factory(&name, &def) {
                                Ok(et) => {
                                    entities.insert(name, et);
                                }
                                Err(_) => {
                                    has_errors = true;
                                }
                            }
                        }
                    }
                    Err(_) => {
                        has_errors = true;
                    }
                },
                Err(_) => {
                    has_errors = true;
                }
            }
        }

        let order = topo_order(&entities)?;
        let entities: BTreeMap<String, Arc<EntityType>> =
            entities.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();

        Ok(Schema {
            entities,
            order,
            has_errors,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityType>> {
        self.entities.get(name).cloned()
    }
}

/// Dependency-order entity type names: a type with `depends = [x, y]`
/// sorts after `x` and `y`. Cycles are fatal.
fn topo_order(entities: &BTreeMap<String, EntityType>) -> SchemaResult<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in entities.keys() {
        graph.add_node(name.as_str());
    }
    for (name, def) in entities {
        for dep in &def.depends {
            if !entities.contains_key(dep) {
                return Err(SchemaErrKind::UnknownDependency(name.clone(), dep.clone()).into());
            }
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }
    toposort(&graph, None)
        .map(|order| order.into_iter().map(|s| s.to_string()).collect())
        .map_err(|_| SchemaErrKind::CircularDependency.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default_entities_only() {
        let schema = Schema::from_file("/nonexistent/path/to/schema.yaml").unwrap();
        assert!(!schema.has_errors);
        assert!(schema.entities.contains_key("node"));
        assert!(schema.entities.contains_key("service"));
    }

    #[test]
    fn circular_dependency_is_fatal() {
        let mut entities = BTreeMap::new();
        entities.insert(
            "a".to_string(),
            EntityType {
                label: "a".into(),
                base_path: "a".into(),
                tags: vec![],
                schema: BTreeMap::new(),
                free_form: false,
                static_values: false,
                depends: vec!["b".into()],
            },
        );
        entities.insert(
            "b".to_string(),
            EntityType {
                label: "b".into(),
                base_path: "b".into(),
                tags: vec![],
                schema: BTreeMap::new(),
                free_form: false,
                static_values: false,
                depends: vec!["a".into()],
            },
        );
        assert!(topo_order(&entities).is_err());
    }
}
