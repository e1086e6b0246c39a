//! `requestctl` binary: get/dump/find/find-ip/log/enable/disable/sync/
//! commit for the edge request-filter DSL. Ported from
//! `conftool.extensions.reqconfig.cli`.

extern crate clap;
extern crate confctl_cli;
extern crate confctl_core;
extern crate failure;
extern crate log;
extern crate regex;
extern crate serde_json;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use clap::{App, Arg, SubCommand};

use confctl_cli::cli::requestctl::{check_reference_safety, find_ip, toggle_enabled, toggle_log_matching};
use confctl_cli::cli::{load_config, make_driver};
use confctl_core::announce::{Announcer, TcpIrcAnnouncer};
use confctl_core::backend::Driver;
use confctl_core::kvobject::{query, EntityType};
use confctl_core::requestctl::schema::{
    action_entity_type, get_obj_from_slug, ipblock_entity_type, pattern_entity_type, vcl_entity_type,
    SYNC_ENTITIES,
};
use confctl_core::requestctl::translate::{parse_expression, DslTranslator, VslTranslator};
use confctl_core::requestctl::vcl::{group_by_cluster_site, render_stanza, render_vcl_body};
use confctl_core::requestctl::view::View;
use confctl_core::requestctl::Format;
use confctl_core::syncer::EntitySyncer;

fn entity_type_for(label: &str) -> confctl_core::Result<EntityType> {
    match label {
        "pattern" => Ok(pattern_entity_type()),
        "ipblock" => Ok(ipblock_entity_type()),
        "action" => Ok(action_entity_type()),
        "vcl" => Ok(vcl_entity_type()),
        other => Err(failure::err_msg(format!("unknown requestctl object type: {}", other))),
    }
}

fn main() {
    confctl_cli::init();

    let matches = App::new("requestctl")
        .version("2.0.0")
        .about("Edge request-filter DSL compiler")
        .arg(Arg::with_name("debug").long("debug"))
        .arg(Arg::with_name("config").long("config").takes_value(true))
        .arg(
            Arg::with_name("format")
                .long("format")
                .takes_value(true)
                .default_value("pretty"),
        )
        .subcommand(
            SubCommand::with_name("get")
                .arg(Arg::with_name("type").required(true))
                .arg(Arg::with_name("slug").required(true)),
        )
        .subcommand(SubCommand::with_name("dump").arg(Arg::with_name("type").required(true)))
        .subcommand(
            SubCommand::with_name("find")
                .about("list actions whose expression references <type>@<name>")
                .arg(Arg::with_name("type").possible_values(&["pattern", "ipblock"]).required(true))
                .arg(Arg::with_name("name").required(true)),
        )
        .subcommand(SubCommand::with_name("find-ip").arg(Arg::with_name("ip").required(true)))
        .subcommand(
            SubCommand::with_name("log")
                .arg(Arg::with_name("slug").required(true))
                .arg(Arg::with_name("state").possible_values(&["on", "off"]).required(true)),
        )
        .subcommand(SubCommand::with_name("enable").arg(Arg::with_name("slug").required(true)))
        .subcommand(SubCommand::with_name("disable").arg(Arg::with_name("slug").required(true)))
        .subcommand(
            SubCommand::with_name("sync")
                .arg(Arg::with_name("root").required(true))
                .arg(Arg::with_name("purge").long("purge")),
        )
        .subcommand(SubCommand::with_name("commit").arg(Arg::with_name("cluster").required(true)))
        .get_matches();

    confctl_cli::init_logger(matches.is_present("debug"));

    let cfg = load_config(matches.value_of("config"));
    let driver = make_driver(&cfg);
    let announcer = TcpIrcAnnouncer::new(&cfg.tcpircbot_host, cfg.tcpircbot_port);
    let format = Format::parse(matches.value_of("format").unwrap_or("pretty")).unwrap_or(Format::Pretty);

    if let Err(e) = run(&matches, &driver, &announcer, format) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(
    matches: &clap::ArgMatches<'_>,
    driver: &dyn Driver,
    announcer: &dyn Announcer,
    format: Format,
) -> confctl_core::Result<()> {
    let view = View::new(format);

    if let Some(sub) = matches.subcommand_matches("get") {
        let et = Arc::new(entity_type_for(sub.value_of("type").unwrap())?);
        let obj = get_obj_from_slug(&et, driver, sub.value_of("slug").unwrap())?;
        println!("{}", view.render(&[obj])?);
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("dump") {
        let et = Arc::new(entity_type_for(sub.value_of("type").unwrap())?);
        let objs = query(&et, driver, &BTreeMap::new())?;
        println!("{}", view.render(&objs)?);
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("find") {
        let objs = find_referencing(driver, sub.value_of("type").unwrap(), sub.value_of("name").unwrap())?;
        println!("{}", view.render(&objs)?);
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("find-ip") {
        let objs = find_ip(driver, sub.value_of("ip").unwrap())?;
        println!("{}", view.render(&objs)?);
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("log") {
        let et = Arc::new(action_entity_type());
        let slug = sub.value_of("slug").unwrap();
        let turning_on = sub.value_of("state").unwrap() == "on";
        let mut obj = get_obj_from_slug(&et, driver, slug)?;
        toggle_log_matching(&mut obj, turning_on);
        obj.write(driver)?;
        announcer.announce(&format!("requestctl: log toggled for {}", slug)).ok();
        println!("{}: updated", slug);
        if turning_on {
            if let Some(vsl) = vsl_filter_for(&obj, driver)? {
                println!("varnishlog filter: {}", vsl);
            }
        }
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("enable") {
        let et = Arc::new(action_entity_type());
        let slug = sub.value_of("slug").unwrap();
        let mut obj = get_obj_from_slug(&et, driver, slug)?;
        toggle_enabled(&mut obj, true);
        obj.write(driver)?;
        announcer.announce(&format!("requestctl: enabled {}", slug)).ok();
        println!("{}: enabled", slug);
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("disable") {
        let et = Arc::new(action_entity_type());
        let slug = sub.value_of("slug").unwrap();
        let mut obj = get_obj_from_slug(&et, driver, slug)?;
        toggle_enabled(&mut obj, false);
        obj.write(driver)?;
        announcer.announce(&format!("requestctl: disabled {}", slug)).ok();
        println!("{}: disabled", slug);
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("sync") {
        let root = Path::new(sub.value_of("root").unwrap());
        sync(root, driver, sub.is_present("purge"))?;
        println!("synced");
        return Ok(());
    }

    if let Some(sub) = matches.subcommand_matches("commit") {
        let cluster = sub.value_of("cluster").unwrap();
        commit(cluster, driver, announcer)?;
        println!("committed vcl for {}", cluster);
        return Ok(());
    }

    Err(failure::err_msg("no subcommand given"))
}

/// Translate an action's stored expression into a `varnishlog -q`
/// filter string, so an operator enabling `log` can watch matching
/// requests immediately instead of guessing at the VSL grammar.
fn vsl_filter_for(action: &confctl_core::kvobject::Object, driver: &dyn Driver) -> confctl_core::Result<Option<String>> {
    let expression = match action.values.get("expression").and_then(|v| v.as_str()) {
        Some(e) if !e.is_empty() => e,
        _ => return Ok(None),
    };
    let pattern_et = Arc::new(pattern_entity_type());
    let ipblock_et = Arc::new(ipblock_entity_type());
    let resolve_pattern = |slug: &str| get_obj_from_slug(&pattern_et, driver, slug);
    let resolve_ipblock = |slug: &str| -> confctl_core::Result<(String, String)> {
        let obj = get_obj_from_slug(&ipblock_et, driver, slug)?;
        let scope = obj.tags.get("scope").cloned().unwrap_or_default();
        Ok((scope, obj.name.clone()))
    };
    let expr = parse_expression(expression)?;
    let translator = VslTranslator;
    Ok(Some(translator.translate(&expr, &resolve_pattern, &resolve_ipblock)?))
}

/// Return every `action` whose stored expression contains the literal
/// token `<kind>@<name>` — i.e. every action that references the given
/// `pattern` or `ipblock` object, regardless of where in the boolean
/// expression it appears.
fn find_referencing(
    driver: &dyn Driver,
    kind: &str,
    name: &str,
) -> confctl_core::Result<Vec<confctl_core::kvobject::Object>> {
    let needle = format!("{}@{}", kind, name);
    let action_et = Arc::new(action_entity_type());
    let actions = query(&action_et, driver, &BTreeMap::new())?;
    Ok(actions
        .into_iter()
        .filter(|obj| {
            obj.values
                .get("expression")
                .and_then(|v| v.as_str())
                .map(|expr| expr.split_whitespace().any(|tok| tok == needle))
                .unwrap_or(false)
        })
        .collect())
}

/// Load the three on-disk-syncable entity trees, push every change, and
/// (only with `--purge`) delete backend objects absent from disk —
/// refusing to remove any `ipblock`/`pattern` still referenced by a live
/// `action`.
fn sync(root: &Path, driver: &dyn Driver, purge: bool) -> confctl_core::Result<()> {
    let mut syncers: Vec<EntitySyncer> = SYNC_ENTITIES
        .iter()
        .map(|label| EntitySyncer::new(Arc::new(entity_type_for(label).expect("known requestctl label"))))
        .collect();

    for syncer in &mut syncers {
        syncer.load_files(root);
    }
    for syncer in &syncers {
        syncer.push_changes(driver)?;
    }

    if !purge {
        return Ok(());
    }

    let action_et = Arc::new(action_entity_type());
    let live_actions = query(&action_et, driver, &BTreeMap::new())?;

    for syncer in syncers.iter().rev() {
        let label = syncer.entity_type.label.as_str();
        if label == "ipblock" || label == "pattern" {
            let expected: BTreeSet<String> = syncer.objects.iter().map(|o| o.name.clone()).collect();
            if let Ok(all) = driver.all_data(&syncer.entity_type.base_path) {
                for (segments, _) in all {
                    if segments.len() != 2 {
                        continue;
                    }
                    let (scope, name) = (&segments[0], &segments[1]);
                    if !expected.contains(name) {
                        check_reference_safety(label, &format!("{}/{}", scope, name), &live_actions)?;
                    }
                }
            }
        }
        syncer.cleanup(driver)?;
    }
    Ok(())
}

/// Render and write the compiled VCL for every `(cluster, site)` pair
/// found among `cluster`'s enabled actions.
fn commit(cluster: &str, driver: &dyn Driver, announcer: &dyn Announcer) -> confctl_core::Result<()> {
    let action_et = Arc::new(action_entity_type());
    let pattern_et = Arc::new(pattern_entity_type());
    let ipblock_et = Arc::new(ipblock_entity_type());
    let vcl_et = Arc::new(vcl_entity_type());

    let mut selectors = BTreeMap::new();
    selectors.insert("cluster".to_string(), regex::escape(cluster));
    let actions = query(&action_et, driver, &selectors)?;

    let resolve_pattern = |slug: &str| get_obj_from_slug(&pattern_et, driver, slug);
    let resolve_ipblock = |slug: &str| -> confctl_core::Result<(String, String)> {
        let obj = get_obj_from_slug(&ipblock_et, driver, slug)?;
        let scope = obj.tags.get("scope").cloned().unwrap_or_default();
        Ok((scope, obj.name.clone()))
    };

    let mut entries = Vec::new();
    for action in &actions {
        let sites: Vec<String> = action
            .values
            .get("sites")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|s| s.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default();
        if let Some(stanza) = render_stanza(action, &resolve_pattern, &resolve_ipblock)? {
            entries.push((cluster.to_string(), sites, stanza));
        }
    }

    let grouped = group_by_cluster_site(&entries);
    for ((group_cluster, site), stanzas) in grouped {
        let body = render_vcl_body(&stanzas);
        let mut tags = BTreeMap::new();
        tags.insert("cluster".to_string(), group_cluster.clone());
        let mut obj = confctl_core::kvobject::Object::new(Arc::clone(&vcl_et), tags, site.clone());
        obj.values.insert("vcl".to_string(), serde_json::Value::from(body));
        obj.write(driver)?;
    }
    announcer
        .announce(&format!("requestctl: committed vcl for cluster {}", cluster))
        .ok();
    Ok(())
}
