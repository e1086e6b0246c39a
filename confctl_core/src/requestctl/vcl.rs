//! Groups compiled `action` objects by `(cluster, site)` and renders the
//! VCL stanzas `requestctl commit` writes to the `vcl` entity. Ported
//! from the VCL-assembly half of
//! `conftool.extensions.reqconfig.entities`/`translate`.

use std::collections::BTreeMap;

use crate::kvobject::Object;

use super::translate::{parse_expression, DslTranslator, VclTranslator};

/// One action's compiled VCL block, already scoped to a single
/// `(cluster, site)` pair.
#[derive(Clone)]
pub struct Stanza {
    pub name: String,
    pub body: String,
}

fn throttle_key(name: &str, per_ip: bool) -> String {
    let base = format!("\"requestctl:{}\"", name);
    if per_ip {
        format!("{} + req.http.X-Client-IP", base)
    } else {
        base
    }
}

fn tag_header(name: &str) -> String {
    format!(
        "set req.http.X-Requestctl = req.http.X-Requestctl + \",{}\";",
        name
    )
}

fn synth_return(action: &Object) -> String {
    let status = action
        .values
        .get("resp_status")
        .and_then(|v| v.as_i64())
        .unwrap_or(429);
    let reason = action
        .values
        .get("resp_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("Too Many Requests")
        .to_string();
    format!("return (synth({}, \"{}\"));", status, reason)
}

/// Render one action's VCL block body given its already-translated
/// boolean `condition`.
fn render_body(action: &Object, condition: &str) -> String {
    let name = action.pprint();
    let enabled = action.values.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
    let log_matching = action
        .values
        .get("log_matching")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if !enabled && log_matching {
        return format!("if ({}) {{\n    {}\n}}", condition, tag_header(&name));
    }

    let do_throttle = action.values.get("do_throttle").and_then(|v| v.as_bool()).unwrap_or(false);
    if do_throttle {
        let requests = action
            .values
            .get("throttle_requests")
            .and_then(|v| v.as_i64())
            .unwrap_or(10);
        let interval = action
            .values
            .get("throttle_interval")
            .and_then(|v| v.as_i64())
            .unwrap_or(60);
        let duration = action
            .values
            .get("throttle_duration")
            .and_then(|v| v.as_i64())
            .unwrap_or(60);
        let per_ip = action
            .values
            .get("throttle_per_ip")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let key = throttle_key(&name, per_ip);
        let retry_after = duration.max(1);
        format!(
            "if ({} && vsthrottle.is_denied({}, {}, {}s, {}s)) {{\n    {}\n    set resp.http.Retry-After = \"{}\";\n    {}\n}}",
            condition, key, requests, interval, duration, tag_header(&name), retry_after, synth_return(action)
        )
    } else {
        format!(
            "if ({}) {{\n    {}\n    {}\n}}",
            condition,
            tag_header(&name),
            synth_return(action)
        )
    }
}

/// Render one action into a `Stanza`, resolving its stored expression
/// through the supplied pattern/ipblock lookups. Returns `None` for
/// actions that are disabled with logging off: they have no VCL
/// presence at all.
pub fn render_stanza(
    action: &Object,
    resolve_pattern: &dyn Fn(&str) -> crate::Result<Object>,
    resolve_ipblock: &dyn Fn(&str) -> crate::Result<(String, String)>,
) -> crate::Result<Option<Stanza>> {
    let enabled = action.values.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
    let log_matching = action
        .values
        .get("log_matching")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !enabled && !log_matching {
        return Ok(None);
    }

    let expression = action
        .values
        .get("expression")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let expr = parse_expression(expression)?;
    let translator = VclTranslator;
    let condition = translator.translate(&expr, resolve_pattern, resolve_ipblock)?;

    Ok(Some(Stanza {
        name: action.pprint(),
        body: render_body(action, &condition),
    }))
}

/// Group rendered stanzas by `(cluster, site)`. Actions with no explicit
/// `sites` go to `(cluster, "global")`.
pub fn group_by_cluster_site(
    actions: &[(String, Vec<String>, Stanza)],
) -> BTreeMap<(String, String), Vec<Stanza>> {
    let mut out: BTreeMap<(String, String), Vec<Stanza>> = BTreeMap::new();
    for (cluster, sites, stanza) in actions {
        if sites.is_empty() {
            out.entry((cluster.clone(), "global".to_string()))
                .or_default()
                .push(stanza.clone());
        } else {
            for site in sites {
                out.entry((cluster.clone(), site.clone()))
                    .or_default()
                    .push(stanza.clone());
            }
        }
    }
    out
}

/// Assemble the full VCL body for a `(cluster, site)` group: the
/// `X-Requestctl` preamble, each action's block sorted by name, and a
/// trailing regsub that trims the header's leading comma.
pub fn render_vcl_body(stanzas: &[Stanza]) -> String {
    let mut sorted = stanzas.to_vec();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut lines = vec![
        "if (!req.http.X-Requestctl) {\n    set req.http.X-Requestctl = \"\";\n}".to_string(),
    ];
    for stanza in &sorted {
        lines.push(stanza.body.clone());
    }
    lines.push("set req.http.X-Requestctl = regsub(req.http.X-Requestctl, \"^,\", \"\");".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn action_object(name: &str, enabled: bool, log_matching: bool, throttle: bool) -> Object {
        let et = Arc::new(super::super::schema::action_entity_type());
        let mut tags = std::collections::BTreeMap::new();
        tags.insert("cluster".to_string(), "cache_text".to_string());
        let mut obj = Object::new(et, tags, name.to_string());
        obj.values.insert("enabled".to_string(), serde_json::Value::from(enabled));
        obj.values.insert("log_matching".to_string(), serde_json::Value::from(log_matching));
        obj.values.insert("do_throttle".to_string(), serde_json::Value::from(throttle));
        obj.values.insert("expression".to_string(), serde_json::Value::from("pattern@ua/evil"));
        obj.values.insert("resp_status".to_string(), serde_json::Value::from(429));
        obj.values.insert("resp_reason".to_string(), serde_json::Value::from("blocked"));
        obj
    }

    fn resolve_pattern(_: &str) -> crate::Result<Object> {
        let et = Arc::new(super::super::schema::pattern_entity_type());
        let mut tags = std::collections::BTreeMap::new();
        tags.insert("scope".to_string(), "ua".to_string());
        let mut obj = Object::new(et, tags, "evil".to_string());
        obj.values.insert("method".to_string(), serde_json::Value::from("GET"));
        Ok(obj)
    }

    fn resolve_ipblock(_: &str) -> crate::Result<(String, String)> {
        Ok(("abuse".to_string(), "bots".to_string()))
    }

    #[test]
    fn enabled_action_tags_header_before_synth() {
        let action = action_object("block-ua", true, false, false);
        let stanza = render_stanza(&action, &resolve_pattern, &resolve_ipblock).unwrap().unwrap();
        let tag_pos = stanza.body.find("X-Requestctl = req.http.X-Requestctl").unwrap();
        let synth_pos = stanza.body.find("return (synth(").unwrap();
        assert!(tag_pos < synth_pos);
        assert!(stanza.body.contains(",block-ua"));
    }

    #[test]
    fn disabled_without_logging_has_no_presence() {
        let action = action_object("off", false, false, false);
        assert!(render_stanza(&action, &resolve_pattern, &resolve_ipblock).unwrap().is_none());
    }

    #[test]
    fn disabled_with_logging_is_log_only() {
        let action = action_object("watch", false, true, false);
        let stanza = render_stanza(&action, &resolve_pattern, &resolve_ipblock).unwrap().unwrap();
        assert!(!stanza.body.contains("synth("));
        assert!(stanza.body.contains(",watch"));
    }

    #[test]
    fn throttled_action_combines_condition_with_vsthrottle() {
        let action = action_object("throttle-me", true, false, true);
        let stanza = render_stanza(&action, &resolve_pattern, &resolve_ipblock).unwrap().unwrap();
        assert!(stanza.body.contains("&& vsthrottle.is_denied("));
        assert!(stanza.body.contains("Retry-After"));
    }

    #[test]
    fn body_trims_leading_comma_and_sorts_by_name() {
        let a = Stanza { name: "zeta".to_string(), body: "if (1) {\n}".to_string() };
        let b = Stanza { name: "alpha".to_string(), body: "if (2) {\n}".to_string() };
        let body = render_vcl_body(&[a, b]);
        let alpha_pos = body.find("if (2)").unwrap();
        let zeta_pos = body.find("if (1)").unwrap();
        assert!(alpha_pos < zeta_pos);
        assert!(body.contains("regsub(req.http.X-Requestctl"));
    }
}
