//! `confctl` dispatch: select objects of a type by tags + name selector,
//! then run one or more actions against each, confirming first when more
//! than half the candidate pool was selected. Ported from
//! `conftool.cli.tool`.

use std::sync::Arc;

use confctl_core::action::{parse_action, run as run_action};
use confctl_core::backend::Driver;
use confctl_core::kvobject::{query, Object};
use confctl_core::schema::Schema;

use super::{confirm_destructive, should_warn};

pub struct ConfctlArgs {
    pub object_type: String,
    pub tags: Vec<String>,
    pub selector: String,
    pub actions: Vec<(String, String)>,
    pub debug: bool,
}

pub fn run(args: &ConfctlArgs, schema: &Schema, driver: &dyn Driver) -> confctl_core::Result<Vec<String>> {
    let entity_type = schema
        .get(&args.object_type)
        .ok_or_else(|| failure::err_msg(format!("unknown object type: {}", args.object_type)))?;

    let mut selectors: std::collections::BTreeMap<String, String> = args
        .tags
        .iter()
        .filter_map(|t| {
            let mut parts = t.splitn(2, '=');
            Some((parts.next()?.to_string(), parts.next()?.to_string()))
        })
        .collect();

    let name_pattern = match args.selector.as_str() {
        "all" => ".*".to_string(),
        other => match other.strip_prefix("re:") {
            Some(pattern) => pattern.to_string(),
            None => regex::escape(other),
        },
    };
    selectors.insert("name".to_string(), name_pattern);

    let candidates = query(&entity_type, driver, &selectors)?;
    let all_of_type = query(&entity_type, driver, &std::collections::BTreeMap::new())?;

    if should_warn(candidates.len(), all_of_type.len()) && args.selector == "all" {
        let description = format!(
            "run {} action(s) against {} of {} {} objects",
            args.actions.len(),
            candidates.len(),
            all_of_type.len(),
            args.object_type
        );
        if !confirm_destructive(&description) {
            let err: confctl_core::action::ActionError =
                confctl_core::action::ActionErrKind::UserAbort.into();
            return Err(err.into());
        }
    }

    let mut messages = Vec::new();
    for mut obj in candidates {
        for (name, value) in &args.actions {
            let action = parse_action(name, value, &obj.entity_type)?;
            if let Some(msg) = run_action(&action, &mut obj, driver)? {
                messages.push(msg);
            }
        }
    }
    Ok(messages)
}
