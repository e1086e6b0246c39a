//! Bulk reconciliation of an on-disk entity tree against the live
//! backend. Ported from `conftool.cli.syncer`: load every declared
//! entity's YAML tree, diff against the live keyset, write in
//! dependency order, delete in reverse order. A per-entity
//! file/parse error sets `skip_removal` for that entity only — it never
//! cascades into skipping removal for other entities.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use walkdir::WalkDir;

use crate::backend::Driver;
use crate::kvobject::{EntityType, Object};
use crate::schema::Schema;

/// One entity type's worth of on-disk definitions, loaded from
/// `<root>/<entity-label>/**/*.yaml`. Each file's top-level map is
/// `{name: {tag: value, ..., field: value, ...}}`, with tags supplied
/// either as top-level keys or inferred from the directory structure;
/// this port takes the simpler, explicit form: every object's tags and
/// name are given directly in the file.
pub struct EntitySyncer {
    pub entity_type: Arc<EntityType>,
    pub objects: Vec<Object>,
    pub skip_removal: bool,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(flatten)]
    fields: BTreeMap<String, serde_json::Value>,
}

impl EntitySyncer {
    pub fn new(entity_type: Arc<EntityType>) -> EntitySyncer {
        EntitySyncer {
            entity_type,
            objects: Vec::new(),
            skip_removal: false,
        }
    }

    /// Load every `*.yaml` file under `<root>/<label>/`. A missing
    /// directory or any YAML parse failure sets `skip_removal` for this
    /// entity and otherwise continues with whatever files did load.
    pub fn load_files(&mut self, root: &Path) {
        let dir = root.join(&self.entity_type.label);
        if !dir.exists() {
            self.skip_removal = true;
            return;
        }
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(raw) => match serde_yaml::from_str::<BTreeMap<String, RawObject>>(&raw) {
                    Ok(parsed) => {
                        for (name, raw_obj) in parsed {
                            let mut obj =
                                Object::new(Arc::clone(&self.entity_type), raw_obj.tags, name);
                            for (k, v) in raw_obj.fields {
                                if self.entity_type.schema.contains_key(&k) {
                                    obj.values.insert(k, v);
                                } else if self.entity_type.free_form {
                                    obj.extra.insert(k, v);
                                }
                            }
                            self.objects.push(obj);
                        }
                    }
                    Err(e) => {
                        warn!("{}: failed to parse {}: {}", self.entity_type.label, entry.path().display(), e);
                        self.skip_removal = true;
                    }
                },
                Err(e) => {
                    warn!("{}: failed to read {}: {}", self.entity_type.label, entry.path().display(), e);
                    self.skip_removal = true;
                }
            }
        }
    }

    /// Create any object present on disk but absent from the backend;
    /// for `static_values` entities, also overwrite any object whose
    /// live values differ from the on-disk declaration (§ Open Question
    /// 1 in DESIGN.md).
    pub fn push_changes(&self, driver: &dyn Driver) -> crate::Result<()> {
        for obj in &self.objects {
            let mut live = obj.clone();
            live.fetch(driver);
            if !live.exists {
                obj.write(driver)?;
            } else if self.entity_type.static_values && obj.changed(&live.values) {
                obj.write(driver)?;
            }
        }
        Ok(())
    }

    /// Delete every backend object of this type whose key is not present
    /// on disk. Guarded by `skip_removal`: if anything went wrong while
    /// loading this entity's files, cleanup is skipped entirely rather
    /// than risk deleting objects whose on-disk definition we failed to
    /// read.
    pub fn cleanup(&self, driver: &dyn Driver) -> crate::Result<()> {
        if self.skip_removal {
            warn!(
                "{}: skipping removal pass due to earlier load errors",
                self.entity_type.label
            );
            return Ok(());
        }
        let expected: BTreeSet<String> = self.objects.iter().map(|o| o.key()).collect();
        let live = match driver.all_keys(&self.entity_type.base_path) {
            Ok(keys) => keys,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for segments in live {
            let key = format!("{}/{}", self.entity_type.base_path, segments.join("/"));
            if !expected.contains(&key) {
                driver.delete(&key)?;
            }
        }
        Ok(())
    }
}

/// Drives the whole reconciliation across every entity type registered
/// in a `Schema`, in dependency order for creation and reverse order for
/// cleanup.
pub struct Syncer {
    pub root: PathBuf,
    pub entities: Vec<EntitySyncer>,
}

impl Syncer {
    pub fn new(root: PathBuf, schema: &Schema) -> Syncer {
        let entities = schema
            .order
            .iter()
            .filter_map(|name| schema.get(name))
            .map(EntitySyncer::new)
            .collect();
        Syncer { root, entities }
    }

    pub fn load(&mut self) {
        for syncer in &mut self.entities {
            syncer.load_files(&self.root);
        }
    }

    pub fn sync(&self, driver: &dyn Driver) -> crate::Result<()> {
        for syncer in &self.entities {
            syncer.push_changes(driver)?;
        }
        for syncer in self.entities.iter().rev() {
            syncer.cleanup(driver)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node;

    #[test]
    fn missing_directory_sets_skip_removal() {
        let et = Arc::new(node::entity_type());
        let mut syncer = EntitySyncer::new(et);
        syncer.load_files(Path::new("/nonexistent/sync/root"));
        assert!(syncer.skip_removal);
        assert!(syncer.objects.is_empty());
    }
}
