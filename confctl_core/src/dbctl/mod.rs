//! MediaWiki database-configuration compiler: turns declared `section`
//! and `instance` entities into the compiled blob MediaWiki itself reads
//! (`sectionLoads`, `groupLoadsBySection`, `readOnlyBySection`,
//! `externalLoads`, `hostsByName`), with preview-before-write validation
//! and a diff/commit/restore workflow. Ported from
//! `conftool.extensions.dbconfig`.

pub mod commit;
pub mod compiler;
pub mod entities;

pub use compiler::{
    check_config, check_instance, check_section, compute_config, diff_configs, MwConfig,
};
pub use entities::{
    instance_entity_type, instance_from_object, instance_to_object, section_entity_type,
    section_from_object, section_to_object, Flavor, GroupConfig, Instance, InstanceSectionConfig,
    Section, ALL_GROUPS, PLACEHOLDER_MASTER,
};
