//! `dbctl` dispatch: validated instance/section mutations, plus
//! diff/commit/restore. Ported from
//! `conftool.extensions.dbconfig.entities`/`config`.

use confctl_core::dbctl::{check_instance, check_section, compute_config, diff_configs, Instance, MwConfig, Section};

#[derive(Clone)]
pub enum InstanceOp {
    Pool { section: String, group: String },
    Depool { section: String, group: String },
    SetWeight { section: String, group: String, weight: i64 },
    SetCandidateMaster(bool),
    SetNote(String),
}

#[derive(Clone)]
pub enum SectionOp {
    SetMaster(String),
    Ro(String),
    Rw,
}

/// Apply an instance mutation, preview-validate it against the full
/// topology, and only then return the accepted instance for the caller
/// to write and announce.
pub fn apply_instance_op(
    mut instance: Instance,
    op: InstanceOp,
    all_instances: &[Instance],
    sections: &[Section],
) -> confctl_core::Result<Instance> {
    if instance.is_uninitialized() {
        return Err(failure::err_msg(format!(
            "instance {} has no configured sections, refusing to mutate",
            instance.name
        )));
    }
    match op {
        InstanceOp::Pool { section, group } => instance.pool(&section, &group)?,
        InstanceOp::Depool { section, group } => instance.depool(&section, &group)?,
        InstanceOp::SetWeight { section, group, weight } => {
            instance.set_weight(&section, &group, weight)?
        }
        InstanceOp::SetCandidateMaster(candidate) => instance.set_candidate_master(candidate),
        InstanceOp::SetNote(note) => instance.set_note(&note),
    }
    check_instance(&instance, all_instances, sections)?;
    Ok(instance)
}

pub fn apply_section_op(
    mut section: Section,
    op: SectionOp,
    all_sections: &[Section],
    instances: &[Instance],
) -> confctl_core::Result<Section> {
    match op {
        SectionOp::SetMaster(host) => section.set_master(&host),
        SectionOp::Ro(reason) => section.set_readonly(true, Some(&reason)),
        SectionOp::Rw => section.set_readonly(false, None),
    }
    if !section.is_uninitialized() {
        check_section(&section, all_sections, instances)?;
    }
    Ok(section)
}

pub fn diff(
    sections: &[Section],
    instances: &[Instance],
    live_sections: &[Section],
    live_instances: &[Instance],
) -> confctl_core::Result<String> {
    let live = compute_config(live_sections, live_instances)?;
    let proposed = compute_config(sections, instances)?;
    diff_configs(&live, &proposed)
}

/// `dbctl generate`: compute and return the blob without writing or
/// diffing it against the live state, for operators who want to inspect
/// what a commit would produce.
pub fn generate(sections: &[Section], instances: &[Instance]) -> confctl_core::Result<MwConfig> {
    Ok(compute_config(sections, instances)?)
}

