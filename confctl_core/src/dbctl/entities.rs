//! `section` and `instance` entity shapes and the operator-facing
//! mutations on top of them (`pool`/`depool`/`weight`/`set-master`/
//! `set-readonly`). Ported from
//! `conftool.extensions.dbconfig.entities`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::kvobject::{EntityType, Object};
use crate::types::ValidatorKind;

/// Sentinel a freshly disk-synced section is created with before an
/// operator runs `dbctl section set-master`; `_check_uninitialized`
/// tests against this.
pub const PLACEHOLDER_MASTER: &str = "PLACEHOLDER";

/// Targets every configured group within a section in one `pool`/
/// `depool`/`weight` call.
pub const ALL_GROUPS: &str = "all";

#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize)]
pub enum Flavor {
    Regular,
    External,
}

impl Flavor {
    pub fn parse(s: &str) -> Option<Flavor> {
        match s {
            "regular" => Some(Flavor::Regular),
            "external" => Some(Flavor::External),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Section {
    pub name: String,
    pub dc: String,
    pub master: String,
    pub replicas: Vec<String>,
    pub readonly: bool,
    pub ro_reason: String,
    pub flavor: Flavor,
    pub min_replicas: u32,
    pub omit_replicas_in_mwconfig: bool,
}

impl Section {
    pub fn is_uninitialized(&self) -> bool {
        self.master == PLACEHOLDER_MASTER
    }

    pub fn set_master(&mut self, host: &str) {
        self.master = host.to_string();
    }

    pub fn set_readonly(&mut self, ro: bool, reason: Option<&str>) {
        self.readonly = ro;
        if let Some(reason) = reason {
            self.ro_reason = reason.to_string();
        }
    }

    /// MediaWiki mangles the default section's key from `s3` to
    /// `"DEFAULT"` in the compiled blob; every other section name passes
    /// through unchanged.
    pub fn mangled_key(&self) -> &str {
        if self.name == "s3" {
            "DEFAULT"
        } else {
            self.name.as_str()
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupConfig {
    pub pooled: bool,
    pub weight: i64,
    pub percentage: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct InstanceSectionConfig {
    pub pooled: bool,
    pub weight: i64,
    pub percentage: i64,
    pub groups: BTreeMap<String, GroupConfig>,
}

/// MySQL's conventional port; `hostsByName` omits the port suffix when an
/// instance uses it.
pub const DEFAULT_PORT: u16 = 3306;

#[derive(Clone, Debug, Serialize)]
pub struct Instance {
    pub name: String,
    pub dc: String,
    pub host_ip: String,
    pub port: Option<u16>,
    pub note: Option<String>,
    pub candidate_master: bool,
    pub sections: BTreeMap<String, InstanceSectionConfig>,
}

impl Instance {
    pub fn is_uninitialized(&self) -> bool {
        self.sections.is_empty()
    }

    /// `host_ip:port` string used by `hostsByName`, or just `host_ip` when
    /// the configured port is the MySQL default.
    pub fn host_label(&self) -> String {
        match self.port {
            Some(p) if p != DEFAULT_PORT => format!("{}:{}", self.host_ip, p),
            _ => self.host_ip.clone(),
        }
    }

    pub fn set_candidate_master(&mut self, candidate: bool) {
        self.candidate_master = candidate;
    }

    pub fn set_note(&mut self, note: &str) {
        self.note = if note.is_empty() { None } else { Some(note.to_string()) };
    }

    fn section_mut(&mut self, section: &str) -> crate::Result<&mut InstanceSectionConfig> {
        let name = self.name.clone();
        self.sections
            .get_mut(section)
            .ok_or_else(|| failure::err_msg(format!("instance {} has no section {}", name, section)))
    }

    pub fn pool(&mut self, section: &str, group: &str) -> crate::Result<()> {
        if group == ALL_GROUPS {
            let sec = self.section_mut(section)?;
            sec.pooled = true;
            for g in sec.groups.values_mut() {
                g.pooled = true;
            }
        } else {
            let sec = self.section_mut(section)?;
            let g = sec
                .groups
                .get_mut(group)
                .ok_or_else(|| failure::err_msg(format!("section {} has no group {}", section, group)))?;
            g.pooled = true;
        }
        Ok(())
    }

    pub fn depool(&mut self, section: &str, group: &str) -> crate::Result<()> {
        if group == ALL_GROUPS {
            let sec = self.section_mut(section)?;
            sec.pooled = false;
            for g in sec.groups.values_mut() {
                g.pooled = false;
            }
        } else {
            let sec = self.section_mut(section)?;
            let g = sec
                .groups
                .get_mut(group)
                .ok_or_else(|| failure::err_msg(format!("section {} has no group {}", section, group)))?;
            g.pooled = false;
        }
        Ok(())
    }

    pub fn set_weight(&mut self, section: &str, group: &str, weight: i64) -> crate::Result<()> {
        if group == ALL_GROUPS {
            let sec = self.section_mut(section)?;
            sec.weight = weight;
            for g in sec.groups.values_mut() {
                g.weight = weight;
            }
        } else {
            let sec = self.section_mut(section)?;
            let g = sec
                .groups
                .get_mut(group)
                .ok_or_else(|| failure::err_msg(format!("section {} has no group {}", section, group)))?;
            g.weight = weight;
        }
        Ok(())
    }
}

pub fn section_entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    schema.insert("master".to_string(), ValidatorKind::Str);
    schema.insert("readonly".to_string(), ValidatorKind::Bool);
    schema.insert("ro_reason".to_string(), ValidatorKind::Str);
    schema.insert("flavor".to_string(), ValidatorKind::Enum(vec!["regular".into(), "external".into()]));
    schema.insert("min_replicas".to_string(), ValidatorKind::Int);
    schema.insert("omit_replicas_in_mwconfig".to_string(), ValidatorKind::Bool);
    EntityType {
        label: "dbconfig-section".to_string(),
        base_path: "dbconfig/sections".to_string(),
        tags: vec!["dc".to_string()],
        schema,
        free_form: false,
        static_values: false,
        depends: vec![],
    }
}

pub fn instance_entity_type() -> EntityType {
    let mut schema = BTreeMap::new();
    schema.insert("host_ip".to_string(), ValidatorKind::Str);
    schema.insert("port".to_string(), ValidatorKind::Int);
    schema.insert("note".to_string(), ValidatorKind::Str);
    schema.insert("candidate_master".to_string(), ValidatorKind::Bool);
    schema.insert("sections".to_string(), ValidatorKind::Dict);
    EntityType {
        label: "dbconfig-instance".to_string(),
        base_path: "dbconfig/instances".to_string(),
        tags: vec!["dc".to_string()],
        schema,
        free_form: false,
        static_values: false,
        depends: vec!["dbconfig-section".to_string()],
    }
}

/// Decode a stored `section` object into its typed form. Unknown/absent
/// fields fall back to the `PLACEHOLDER_MASTER`/non-readonly/regular/
/// zero-floor defaults a freshly synced section gets.
pub fn section_from_object(obj: &Object) -> Section {
    Section {
        name: obj.name.clone(),
        dc: obj.tags.get("dc").cloned().unwrap_or_default(),
        master: obj
            .values
            .get("master")
            .and_then(|v| v.as_str())
            .unwrap_or(PLACEHOLDER_MASTER)
            .to_string(),
        replicas: Vec::new(),
        readonly: obj.values.get("readonly").and_then(|v| v.as_bool()).unwrap_or(false),
        ro_reason: obj
            .values
            .get("ro_reason")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        flavor: obj
            .values
            .get("flavor")
            .and_then(|v| v.as_str())
            .and_then(Flavor::parse)
            .unwrap_or(Flavor::Regular),
        min_replicas: obj
            .values
            .get("min_replicas")
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u32,
        omit_replicas_in_mwconfig: obj
            .values
            .get("omit_replicas_in_mwconfig")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

pub fn section_to_object(section: &Section, obj: &mut Object) {
    obj.values.insert("master".to_string(), Value::from(section.master.clone()));
    obj.values.insert("readonly".to_string(), Value::from(section.readonly));
    obj.values
        .insert("ro_reason".to_string(), Value::from(section.ro_reason.clone()));
    let flavor = match section.flavor {
        Flavor::Regular => "regular",
        Flavor::External => "external",
    };
    obj.values.insert("flavor".to_string(), Value::from(flavor));
    obj.values
        .insert("min_replicas".to_string(), Value::from(section.min_replicas as i64));
    obj.values.insert(
        "omit_replicas_in_mwconfig".to_string(),
        Value::from(section.omit_replicas_in_mwconfig),
    );
}

/// Decode a stored `instance` object's free-form `sections` dict
/// (`{section: {pooled, weight, percentage, groups: {...}}}`) into the
/// typed per-section configuration.
pub fn instance_from_object(obj: &Object) -> Instance {
    let mut sections = BTreeMap::new();
    if let Some(Value::Object(map)) = obj.values.get("sections") {
        for (section_name, section_value) in map {
            if let Value::Object(section_obj) = section_value {
                let pooled = section_obj.get("pooled").and_then(|v| v.as_bool()).unwrap_or(false);
                let weight = section_obj.get("weight").and_then(|v| v.as_i64()).unwrap_or(0);
                let percentage = section_obj.get("percentage").and_then(|v| v.as_i64()).unwrap_or(100);
                let mut groups = BTreeMap::new();
                if let Some(Value::Object(group_map)) = section_obj.get("groups") {
                    for (group_name, group_value) in group_map {
                        if let Value::Object(g) = group_value {
                            groups.insert(
                                group_name.clone(),
                                GroupConfig {
                                    pooled: g.get("pooled").and_then(|v| v.as_bool()).unwrap_or(false),
                                    weight: g.get("weight").and_then(|v| v.as_i64()).unwrap_or(0),
                                    percentage: g.get("percentage").and_then(|v| v.as_i64()).unwrap_or(100),
                                },
                            );
                        }
                    }
                }
                sections.insert(
                    section_name.clone(),
                    InstanceSectionConfig {
                        pooled,
                        weight,
                        percentage,
                        groups,
                    },
                );
            }
        }
    }
    Instance {
        name: obj.name.clone(),
        dc: obj.tags.get("dc").cloned().unwrap_or_default(),
        host_ip: obj
            .values
            .get("host_ip")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        port: obj.values.get("port").and_then(|v| v.as_i64()).map(|p| p as u16),
        note: obj.values.get("note").and_then(|v| v.as_str()).map(|s| s.to_string()),
        candidate_master: obj
            .values
            .get("candidate_master")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        sections,
    }
}

pub fn instance_to_object(instance: &Instance, obj: &mut Object) {
    obj.values
        .insert("host_ip".to_string(), Value::from(instance.host_ip.clone()));
    if let Some(port) = instance.port {
        obj.values.insert("port".to_string(), Value::from(port as i64));
    }
    if let Some(note) = &instance.note {
        obj.values.insert("note".to_string(), Value::from(note.clone()));
    }
    obj.values
        .insert("candidate_master".to_string(), Value::from(instance.candidate_master));
    let mut sections = serde_json::Map::new();
    for (name, cfg) in &instance.sections {
        let mut groups = serde_json::Map::new();
        for (gname, g) in &cfg.groups {
            let mut gm = serde_json::Map::new();
            gm.insert("pooled".to_string(), Value::from(g.pooled));
            gm.insert("weight".to_string(), Value::from(g.weight));
            gm.insert("percentage".to_string(), Value::from(g.percentage));
            groups.insert(gname.clone(), Value::Object(gm));
        }
        let mut sm = serde_json::Map::new();
        sm.insert("pooled".to_string(), Value::from(cfg.pooled));
        sm.insert("weight".to_string(), Value::from(cfg.weight));
        sm.insert("percentage".to_string(), Value::from(cfg.percentage));
        sm.insert("groups".to_string(), Value::Object(groups));
        sections.insert(name.clone(), Value::Object(sm));
    }
    obj.values.insert("sections".to_string(), Value::Object(sections));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_mangles_to_default() {
        let s = Section {
            name: "s3".into(),
            dc: "eqiad".into(),
            master: "db1001".into(),
            replicas: vec![],
            readonly: false,
            ro_reason: String::new(),
            flavor: Flavor::Regular,
            min_replicas: 1,
            omit_replicas_in_mwconfig: false,
        };
        assert_eq!(s.mangled_key(), "DEFAULT");
    }

    #[test]
    fn all_groups_pools_every_group() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "api".to_string(),
            GroupConfig {
                pooled: false,
                weight: 0,
                percentage: 100,
            },
        );
        let mut sections = BTreeMap::new();
        sections.insert(
            "s1".to_string(),
            InstanceSectionConfig {
                pooled: false,
                weight: 100,
                percentage: 100,
                groups,
            },
        );
        let mut instance = Instance {
            name: "db1001".into(),
            dc: "eqiad".into(),
            host_ip: "10.0.0.1".into(),
            port: None,
            note: None,
            candidate_master: false,
            sections,
        };
        instance.pool("s1", ALL_GROUPS).unwrap();
        assert!(instance.sections["s1"].pooled);
        assert!(instance.sections["s1"].groups["api"].pooled);
    }
}
