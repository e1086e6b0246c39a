//! The compilation algorithm itself: `compute_config` builds the
//! MediaWiki-facing blob from declared sections and instances,
//! `check_config` enforces master-uniqueness and the replica floor, and
//! `check_instance`/`check_section` run a swap-and-recompute preview
//! before any write reaches the backend. Ported from
//! `conftool.extensions.dbconfig.config`.

use std::collections::BTreeMap;

use failure::{Context, Fail};
use similar::TextDiff;

use super::entities::{Flavor, Instance, Section};

pub type DbctlResult<T> = std::result::Result<T, DbctlError>;

#[derive(Debug)]
pub struct DbctlError {
    inner: Context<DbctlErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum DbctlErrKind {
    #[fail(display = "section {} in dc {} has no master configured", _0, _1)]
    NoMaster(String, String),
    #[fail(
        display = "section {} in dc {} has {} replicas, needs at least {}",
        _0, _1, _2, _3
    )]
    ReplicaFloor(String, String, usize, u32),
    #[fail(display = "instance {} references undeclared section {}", _0, _1)]
    UnknownSection(String, String),
    #[fail(display = "computed master {} for section {}/{} does not match declared master {}", _0, _1, _2, _3)]
    MasterMismatch(String, String, String, String),
}

impl Fail for DbctlError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
}

impl std::fmt::Display for DbctlError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl From<DbctlErrKind> for DbctlError {
    fn from(kind: DbctlErrKind) -> DbctlError {
        DbctlError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<DbctlErrKind>> for DbctlError {
    fn from(inner: Context<DbctlErrKind>) -> DbctlError {
        DbctlError { inner }
    }
}

/// host, weight, ordered with the section master first.
pub type WeightedLoad = Vec<(String, i64)>;

#[derive(Clone, Debug, Default, Serialize)]
pub struct MwConfig {
    /// dc -> mangled section name -> ordered (host, weight) loads
    pub section_loads: BTreeMap<String, BTreeMap<String, WeightedLoad>>,
    /// dc -> section name -> group -> ordered (host, weight) loads
    pub group_loads_by_section: BTreeMap<String, BTreeMap<String, BTreeMap<String, WeightedLoad>>>,
    /// dc -> MW-mangled section name -> readonly reason, for
    /// regular-flavor sections with `readonly=true` only
    pub read_only_by_section: BTreeMap<String, BTreeMap<String, String>>,
    /// dc -> mangled section name -> ordered (host, weight) loads, for
    /// `Flavor::External` sections only
    pub external_loads: BTreeMap<String, BTreeMap<String, WeightedLoad>>,
    /// instance name -> host_ip, or "host_ip:port" when the port isn't
    /// MySQL's default
    pub hosts_by_name: BTreeMap<String, String>,
}

fn add_main(list: &mut WeightedLoad, host: &str, weight: i64, is_master: bool) {
    if is_master {
        list.insert(0, (host.to_string(), weight));
    } else {
        list.push((host.to_string(), weight));
    }
}

/// Place an instance into a section's main load list: masters always go
/// to slot 0; non-masters are dropped entirely when the section sets
/// `omit_replicas_in_mwconfig`, otherwise they're appended.
fn add_main_with_omit(list: &mut WeightedLoad, host: &str, weight: i64, is_master: bool, omit_replicas: bool) {
    if is_master {
        list.insert(0, (host.to_string(), weight));
    } else if !omit_replicas {
        list.push((host.to_string(), weight));
    }
}

/// Build the compiled blob from the declared sections and instances.
/// Matches `compute_config`: per-instance effective weight is
/// `floor(weight * percentage / 100)`, the section's master instance is
/// always moved to the front of its `sectionLoads`/`externalLoads`
/// entry, and an instance/group contributes to the load list only when
/// pooled (`instance.sections[name].pooled` for the main list, and the
/// group's own `pooled` flag for `groupLoadsBySection`).
pub fn compute_config(sections: &[Section], instances: &[Instance]) -> DbctlResult<MwConfig> {
    let mut config = MwConfig::default();

    let mut masters: BTreeMap<(String, String), String> = BTreeMap::new();
    for section in sections {
        masters.insert((section.dc.clone(), section.name.clone()), section.master.clone());
        if section.flavor == Flavor::Regular && section.readonly {
            config
                .read_only_by_section
                .entry(section.dc.clone())
                .or_default()
                .insert(section.mangled_key().to_string(), section.ro_reason.clone());
        }
    }

    let section_by_name: BTreeMap<(&str, &str), &Section> = sections
        .iter()
        .map(|s| ((s.dc.as_str(), s.name.as_str()), s))
        .collect();

    for instance in instances {
        config.hosts_by_name.insert(instance.name.clone(), instance.host_label());

        for (section_name, sec_cfg) in &instance.sections {
            let key = (instance.dc.clone(), section_name.clone());
            let master = match masters.get(&key) {
                Some(m) => m.clone(),
                None => continue, // section not declared for this dc: no load contribution
            };
            if !sec_cfg.pooled {
                continue;
            }
            let section = *section_by_name
                .get(&(instance.dc.as_str(), section_name.as_str()))
                .ok_or_else(|| DbctlErrKind::UnknownSection(instance.name.clone(), section_name.clone()))?;

            let is_master = instance.name == master;
            let fraction = sec_cfg.percentage as f64 / 100.0;
            let effective_weight = (sec_cfg.weight as f64 * fraction).floor() as i64;

            let target = match section.flavor {
                Flavor::Regular => config
                    .section_loads
                    .entry(instance.dc.clone())
                    .or_default()
                    .entry(section.mangled_key().to_string())
                    .or_default(),
                Flavor::External => config
                    .external_loads
                    .entry(instance.dc.clone())
                    .or_default()
                    .entry(section.mangled_key().to_string())
                    .or_default(),
            };
            add_main_with_omit(target, &instance.name, effective_weight, is_master, section.omit_replicas_in_mwconfig);

            for (group_name, group) in &sec_cfg.groups {
                if !group.pooled {
                    continue;
                }
                let group_fraction = group.percentage as f64 / 100.0;
                let group_weight = (group.weight as f64 * group_fraction).floor() as i64;
                let group_list = config
                    .group_loads_by_section
                    .entry(instance.dc.clone())
                    .or_default()
                    .entry(section_name.clone())
                    .or_default()
                    .entry(group_name.clone())
                    .or_default();
                add_main(group_list, &instance.name, group_weight, is_master);
            }
        }
    }

    Ok(config)
}

/// Enforce master-uniqueness (the first entry of every computed load
/// list must be the section's declared master — `compute_config` already
/// guarantees this structurally, this is the cross-check against the
/// `Section` entities themselves) and the replica floor.
pub fn check_config(config: &MwConfig, sections: &[Section]) -> DbctlResult<()> {
    let section_by_key: BTreeMap<(&str, &str), &Section> = sections
        .iter()
        .map(|s| ((s.dc.as_str(), s.mangled_key()), s))
        .collect();

    for (dc, by_section) in &config.section_loads {
        for (mangled, loads) in by_section {
            let section = section_by_key.get(&(dc.as_str(), mangled.as_str()));
            let section = match section {
                Some(s) => s,
                None => continue,
            };
            let master_host = match loads.first() {
                Some((host, _)) => host.clone(),
                None => return Err(DbctlErrKind::NoMaster(section.name.clone(), dc.clone()).into()),
            };
            if master_host != section.master {
                return Err(DbctlErrKind::MasterMismatch(
                    master_host,
                    dc.clone(),
                    section.name.clone(),
                    section.master.clone(),
                )
                .into());
            }
            let num_replicas = loads.len() - 1;
            if (num_replicas as u32) < section.min_replicas {
                return Err(DbctlErrKind::ReplicaFloor(
                    section.name.clone(),
                    dc.clone(),
                    num_replicas,
                    section.min_replicas,
                )
                .into());
            }
        }
    }
    Ok(())
}

/// Swap-and-recompute preview: substitute a modified instance into the
/// full instance set, recompute, and run `check_config` without
/// committing anything. Used before every `dbctl instance` mutation.
pub fn check_instance(
    candidate: &Instance,
    all_instances: &[Instance],
    sections: &[Section],
) -> DbctlResult<MwConfig> {
    let mut instances: Vec<Instance> = all_instances
        .iter()
        .filter(|i| !(i.name == candidate.name && i.dc == candidate.dc))
        .cloned()
        .collect();
    instances.push(candidate.clone());
    let config = compute_config(sections, &instances)?;
    check_config(&config, sections)?;
    Ok(config)
}

/// Swap-and-recompute preview for a modified section.
pub fn check_section(
    candidate: &Section,
    all_sections: &[Section],
    instances: &[Instance],
) -> DbctlResult<MwConfig> {
    let mut sections: Vec<Section> = all_sections
        .iter()
        .filter(|s| !(s.name == candidate.name && s.dc == candidate.dc))
        .cloned()
        .collect();
    sections.push(candidate.clone());
    let config = compute_config(&sections, instances)?;
    check_config(&config, &sections)?;
    Ok(config)
}

/// Unified diff between the currently-live compiled config and a newly
/// computed one, for `dbctl ... diff`.
pub fn diff_configs(old: &MwConfig, new: &MwConfig) -> crate::Result<String> {
    let old_text = serde_yaml::to_string(old)?;
    let new_text = serde_yaml::to_string(new)?;
    let diff = TextDiff::from_lines(&old_text, &new_text);
    Ok(diff.unified_diff().header("live", "proposed").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn simple_section() -> Section {
        Section {
            name: "s1".into(),
            dc: "eqiad".into(),
            master: "db1001".into(),
            replicas: vec!["db1002".into()],
            readonly: false,
            ro_reason: String::new(),
            flavor: Flavor::Regular,
            min_replicas: 1,
            omit_replicas_in_mwconfig: false,
        }
    }

    fn instance(name: &str, pooled: bool, weight: i64, percentage: i64) -> Instance {
        let mut sections = BTreeMap::new();
        sections.insert(
            "s1".to_string(),
            super::super::entities::InstanceSectionConfig {
                pooled,
                weight,
                percentage,
                groups: BTreeMap::new(),
            },
        );
        Instance {
            name: name.into(),
            dc: "eqiad".into(),
            host_ip: format!("10.0.0.{}", &name[name.len() - 1..]),
            port: None,
            note: None,
            candidate_master: false,
            sections,
        }
    }

    #[test]
    fn master_sorts_to_front() {
        let section = simple_section();
        let instances = vec![
            instance("db1002", true, 100, 100),
            instance("db1001", true, 200, 100),
        ];
        let config = compute_config(&[section], &instances).unwrap();
        let loads = &config.section_loads["eqiad"]["s1"];
        assert_eq!(loads[0].0, "db1001");
    }

    #[test]
    fn replica_floor_enforced() {
        let mut section = simple_section();
        section.min_replicas = 2;
        let instances = vec![instance("db1001", true, 100, 100)];
        let config = compute_config(&[section.clone()], &instances).unwrap();
        assert!(check_config(&config, &[section]).is_err());
    }

    #[test]
    fn unpooled_instance_excluded() {
        let section = simple_section();
        let instances = vec![
            instance("db1001", true, 100, 100),
            instance("db1002", false, 100, 100),
        ];
        let config = compute_config(&[section], &instances).unwrap();
        assert_eq!(config.section_loads["eqiad"]["s1"].len(), 1);
    }

    #[test]
    fn omit_replicas_drops_non_masters() {
        let mut section = simple_section();
        section.omit_replicas_in_mwconfig = true;
        let instances = vec![
            instance("db1001", true, 200, 100),
            instance("db1002", true, 100, 100),
        ];
        let config = compute_config(&[section], &instances).unwrap();
        let loads = &config.section_loads["eqiad"]["s1"];
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].0, "db1001");
    }

    #[test]
    fn read_only_by_section_uses_mangled_key_and_reason() {
        let mut section = simple_section();
        section.name = "s3".into();
        section.readonly = true;
        section.ro_reason = "switchover".into();
        let config = compute_config(&[section], &[]).unwrap();
        assert_eq!(config.read_only_by_section["eqiad"].get("DEFAULT").unwrap(), "switchover");
    }
}
