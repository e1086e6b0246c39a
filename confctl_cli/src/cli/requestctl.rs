//! `requestctl` dispatch: get/dump/find/find-ip/log/sync/commit. Ported
//! from `conftool.extensions.reqconfig.cli`.

use std::str::FromStr;
use std::sync::Arc;

use ipnetwork::IpNetwork;

use confctl_core::backend::Driver;
use confctl_core::kvobject::{query, Object};
use confctl_core::requestctl::{ipblock_entity_type, translate::referenced_slugs, parse_expression};
use confctl_core::types::parse_cidr_list;

/// `requestctl find-ip <ip>`: every `ipblock` whose CIDR list contains
/// the given address.
pub fn find_ip(driver: &dyn Driver, ip: &str) -> confctl_core::Result<Vec<Object>> {
    let target = IpNetwork::from_str(ip).map_err(|_| failure::err_msg(format!("invalid IP or CIDR: {}", ip)))?;
    let entity_type = Arc::new(ipblock_entity_type());
    let all = query(&entity_type, driver, &Default::default())?;
    let mut out = Vec::new();
    for obj in all {
        if let Some(cidrs) = obj.values.get("cidrs") {
            if let Ok(networks) = parse_cidr_list(cidrs) {
                if networks.iter().any(|n| n.contains(target.ip())) {
                    out.push(obj);
                }
            }
        }
    }
    Ok(out)
}

/// `requestctl sync --purge`: before removing any `pattern`/`ipblock`,
/// scan every `action`'s stored expression for a matching slug and abort
/// if any reference would dangle, per Invariant 6.
pub fn check_reference_safety(
    removed_kind: &str,
    removed_slug: &str,
    actions: &[Object],
) -> confctl_core::Result<()> {
    for action in actions {
        let expression = action
            .values
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let expr = match parse_expression(expression) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for (kind, slug) in referenced_slugs(&expr) {
            if kind == removed_kind && slug == removed_slug {
                return Err(failure::err_msg(format!(
                    "refusing to remove {}@{}: still referenced by action {}",
                    removed_kind,
                    removed_slug,
                    action.pprint()
                )));
            }
        }
    }
    Ok(())
}

/// `requestctl log <action>`: toggle `log_matching` only, leaving
/// `enabled` untouched (a distinct operation from enable/disable).
pub fn toggle_log_matching(action: &mut Object, on: bool) {
    action
        .values
        .insert("log_matching".to_string(), serde_json::Value::from(on));
}

/// `requestctl enable`/`disable`: toggle `enabled` only. Never
/// synchronizes other fields from disk, per Invariant 7.
pub fn toggle_enabled(action: &mut Object, on: bool) {
    action
        .values
        .insert("enabled".to_string(), serde_json::Value::from(on));
}
