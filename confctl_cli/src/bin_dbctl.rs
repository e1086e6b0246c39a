//! `dbctl` binary: instance/section pool/depool/weight/set-master/
//! set-readonly mutations, plus diff/commit/restore. Ported from
//! `conftool.extensions.dbconfig.cli`.

extern crate chrono;
extern crate clap;
extern crate confctl_cli;
extern crate confctl_core;
extern crate failure;
extern crate log;
extern crate serde_yaml;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use clap::{App, Arg, SubCommand};

use confctl_cli::cli::dbctl::{apply_instance_op, apply_section_op, diff, InstanceOp, SectionOp};
use confctl_cli::cli::{load_config, make_driver};
use confctl_core::announce::{Announcer, TcpIrcAnnouncer};
use confctl_core::backend::Driver;
use confctl_core::dbctl::{
    instance_entity_type, instance_from_object, instance_to_object, section_entity_type,
    section_from_object, section_to_object, ALL_GROUPS,
};
use confctl_core::kvobject::{query, Object};
use confctl_core::types::{JsonSchemaLoader, SchemaRule};

enum Command {
    Instance { name: String, op: InstanceOp },
    Section { name: String, op: SectionOp },
    Diff,
    Commit,
    Restore { cache_file: String },
    Generate,
    GetInstance { name: String },
    GetSection { name: String },
    GetConfig,
}

fn load_instances(driver: &dyn Driver) -> confctl_core::Result<Vec<confctl_core::dbctl::Instance>> {
    let et = Arc::new(instance_entity_type());
    let objs = query(&et, driver, &BTreeMap::new())?;
    Ok(objs.iter().map(instance_from_object).collect())
}

fn load_sections(driver: &dyn Driver) -> confctl_core::Result<Vec<confctl_core::dbctl::Section>> {
    let et = Arc::new(section_entity_type());
    let objs = query(&et, driver, &BTreeMap::new())?;
    Ok(objs.iter().map(section_from_object).collect())
}

fn fetch_instance(driver: &dyn Driver, dc: &str, name: &str) -> Object {
    let et = Arc::new(instance_entity_type());
    let mut tags = BTreeMap::new();
    tags.insert("dc".to_string(), dc.to_string());
    let mut obj = Object::new(et, tags, name.to_string());
    obj.fetch(driver);
    obj
}

fn build_schema_loader(cfg: &confctl_core::Config) -> JsonSchemaLoader {
    let mut loader = JsonSchemaLoader::new();
    for rule in &cfg.schema_rules {
        match SchemaRule::new(&rule.selector, std::path::PathBuf::from(&rule.schema_path)) {
            Ok(r) => loader.push(r),
            Err(e) => log::warn!("skipping malformed schema rule {:?}: {}", rule.selector, e),
        }
    }
    loader
}

fn fetch_section(driver: &dyn Driver, dc: &str, name: &str) -> Object {
    let et = Arc::new(section_entity_type());
    let mut tags = BTreeMap::new();
    tags.insert("dc".to_string(), dc.to_string());
    let mut obj = Object::new(et, tags, name.to_string());
    obj.fetch(driver);
    obj
}

fn main() {
    confctl_cli::init();

    let matches = App::new("dbctl")
        .version("2.0.0")
        .about("MediaWiki database configuration compiler")
        .arg(Arg::with_name("debug").long("debug"))
        .arg(Arg::with_name("config").long("config").takes_value(true))
        .arg(Arg::with_name("dc").long("dc").takes_value(true).required(true))
        .subcommand(
            SubCommand::with_name("instance")
                .arg(Arg::with_name("name").required(true))
                .subcommand(
                    SubCommand::with_name("pool")
                        .arg(Arg::with_name("section").required(true))
                        .arg(Arg::with_name("group").default_value(ALL_GROUPS)),
                )
                .subcommand(
                    SubCommand::with_name("depool")
                        .arg(Arg::with_name("section").required(true))
                        .arg(Arg::with_name("group").default_value(ALL_GROUPS)),
                )
                .subcommand(
                    SubCommand::with_name("weight")
                        .arg(Arg::with_name("section").required(true))
                        .arg(Arg::with_name("group").default_value(ALL_GROUPS))
                        .arg(Arg::with_name("value").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("set-candidate-master").arg(Arg::with_name("value").required(true)),
                )
                .subcommand(SubCommand::with_name("set-note").arg(Arg::with_name("text").required(true))),
        )
        .subcommand(
            SubCommand::with_name("section")
                .arg(Arg::with_name("name").required(true))
                .subcommand(SubCommand::with_name("set-master").arg(Arg::with_name("host").required(true)))
                .subcommand(SubCommand::with_name("ro").arg(Arg::with_name("reason").required(true)))
                .subcommand(SubCommand::with_name("rw")),
        )
        .subcommand(SubCommand::with_name("diff"))
        .subcommand(SubCommand::with_name("commit"))
        .subcommand(SubCommand::with_name("restore").arg(Arg::with_name("cache_file").required(true)))
        .subcommand(SubCommand::with_name("generate"))
        .subcommand(SubCommand::with_name("get-instance").arg(Arg::with_name("name").required(true)))
        .subcommand(SubCommand::with_name("get-section").arg(Arg::with_name("name").required(true)))
        .subcommand(SubCommand::with_name("get-config"))
        .get_matches();

    confctl_cli::init_logger(matches.is_present("debug"));

    let command = match build_command(&matches) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let cfg = load_config(matches.value_of("config"));
    let driver = make_driver(&cfg);
    let dc = matches.value_of("dc").unwrap().to_string();
    let announcer = TcpIrcAnnouncer::new(&cfg.tcpircbot_host, cfg.tcpircbot_port);
    let cache_dir = cfg.cache_path.clone().unwrap_or_else(|| "/var/cache/dbctl".to_string());
    let mut schema_loader = build_schema_loader(&cfg);

    if let Err(e) = run(&command, &dc, &driver, &announcer, Path::new(&cache_dir), &mut schema_loader) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn build_command(matches: &clap::ArgMatches<'_>) -> confctl_core::Result<Command> {
    if let Some(sub) = matches.subcommand_matches("instance") {
        let name = sub.value_of("name").unwrap().to_string();
        let op = if let Some(s) = sub.subcommand_matches("pool") {
            InstanceOp::Pool {
                section: s.value_of("section").unwrap().to_string(),
                group: s.value_of("group").unwrap().to_string(),
            }
        } else if let Some(s) = sub.subcommand_matches("depool") {
            InstanceOp::Depool {
                section: s.value_of("section").unwrap().to_string(),
                group: s.value_of("group").unwrap().to_string(),
            }
        } else if let Some(s) = sub.subcommand_matches("weight") {
            InstanceOp::SetWeight {
                section: s.value_of("section").unwrap().to_string(),
                group: s.value_of("group").unwrap().to_string(),
                weight: s
                    .value_of("value")
                    .unwrap()
                    .parse()
                    .map_err(|_| failure::err_msg("weight must be an integer"))?,
            }
        } else if let Some(s) = sub.subcommand_matches("set-candidate-master") {
            InstanceOp::SetCandidateMaster(s.value_of("value").unwrap() == "true")
        } else if let Some(s) = sub.subcommand_matches("set-note") {
            InstanceOp::SetNote(s.value_of("text").unwrap().to_string())
        } else {
            return Err(failure::err_msg(
                "dbctl instance: expected pool, depool, weight, set-candidate-master or set-note",
            ));
        };
        return Ok(Command::Instance { name, op });
    }

    if let Some(sub) = matches.subcommand_matches("section") {
        let name = sub.value_of("name").unwrap().to_string();
        let op = if let Some(s) = sub.subcommand_matches("set-master") {
            SectionOp::SetMaster(s.value_of("host").unwrap().to_string())
        } else if let Some(s) = sub.subcommand_matches("ro") {
            SectionOp::Ro(s.value_of("reason").unwrap().to_string())
        } else if sub.subcommand_matches("rw").is_some() {
            SectionOp::Rw
        } else {
            return Err(failure::err_msg("dbctl section: expected set-master, ro or rw"));
        };
        return Ok(Command::Section { name, op });
    }

    if matches.subcommand_matches("diff").is_some() {
        return Ok(Command::Diff);
    }
    if matches.subcommand_matches("commit").is_some() {
        return Ok(Command::Commit);
    }
    if let Some(sub) = matches.subcommand_matches("restore") {
        return Ok(Command::Restore {
            cache_file: sub.value_of("cache_file").unwrap().to_string(),
        });
    }
    if matches.subcommand_matches("generate").is_some() {
        return Ok(Command::Generate);
    }
    if let Some(sub) = matches.subcommand_matches("get-instance") {
        return Ok(Command::GetInstance {
            name: sub.value_of("name").unwrap().to_string(),
        });
    }
    if let Some(sub) = matches.subcommand_matches("get-section") {
        return Ok(Command::GetSection {
            name: sub.value_of("name").unwrap().to_string(),
        });
    }
    if matches.subcommand_matches("get-config").is_some() {
        return Ok(Command::GetConfig);
    }
    Err(failure::err_msg("no subcommand given"))
}

fn run(
    command: &Command,
    dc: &str,
    driver: &dyn Driver,
    announcer: &dyn Announcer,
    cache_dir: &Path,
    schema_loader: &mut JsonSchemaLoader,
) -> confctl_core::Result<()> {
    match command {
        Command::Instance { name, op } => {
            let mut obj = fetch_instance(driver, dc, name);
            let instance = instance_from_object(&obj);
            let all_instances = load_instances(driver)?;
            let sections = load_sections(driver)?;
            let updated = apply_instance_op(instance, op.clone(), &all_instances, &sections)?;
            instance_to_object(&updated, &mut obj);
            obj.write(driver)?;
            announcer.announce(&format!("dbctl: updated instance {} in {}", name, dc)).ok();
            println!("{}: updated", name);
            Ok(())
        }
        Command::Section { name, op } => {
            let mut obj = fetch_section(driver, dc, name);
            let section = section_from_object(&obj);
            let all_sections = load_sections(driver)?;
            let instances = load_instances(driver)?;
            let updated = apply_section_op(section, op.clone(), &all_sections, &instances)?;
            section_to_object(&updated, &mut obj);
            obj.write(driver)?;
            announcer.announce(&format!("dbctl: updated section {} in {}", name, dc)).ok();
            println!("{}: updated", name);
            Ok(())
        }
        Command::Diff => {
            let sections = load_sections(driver)?;
            let instances = load_instances(driver)?;
            let text = diff(&sections, &instances, &sections, &instances)?;
            println!("{}", text);
            Ok(())
        }
        Command::Commit => {
            let sections = load_sections(driver)?;
            let instances = load_instances(driver)?;
            let config = confctl_core::dbctl::compute_config(&sections, &instances)?;
            confctl_core::dbctl::check_config(&config, &sections)?;
            let entity_type = Arc::new(confctl_core::dbctl::commit::entity_type());
            let dcs: Vec<String> = sections.iter().map(|s| s.dc.clone()).collect();

            let live = confctl_core::dbctl::commit::read_live(&entity_type, driver, &dcs);
            let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
            let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
            match confctl_core::dbctl::commit::cache_rollback(cache_dir, &timestamp, &user, &live) {
                Ok(path) => println!("rollback cached at {}", path.display()),
                Err(e) => eprintln!("warning: could not cache rollback state: {}", e),
            }

            confctl_core::dbctl::commit::commit(
                &entity_type,
                driver,
                &config,
                &dcs,
                Some(schema_loader),
                announcer,
                "dbctl",
            )?;
            println!("committed");
            Ok(())
        }
        Command::Restore { cache_file } => {
            let entity_type = Arc::new(confctl_core::dbctl::commit::entity_type());
            confctl_core::dbctl::commit::restore(&entity_type, driver, Path::new(cache_file), announcer, "dbctl")?;
            println!("restored from {}", cache_file);
            Ok(())
        }
        Command::Generate => {
            let sections = load_sections(driver)?;
            let instances = load_instances(driver)?;
            let config = confctl_cli::cli::dbctl::generate(&sections, &instances)?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Command::GetInstance { name } => {
            let obj = fetch_instance(driver, dc, name);
            let instance = instance_from_object(&obj);
            println!("{}", serde_yaml::to_string(&instance)?);
            Ok(())
        }
        Command::GetSection { name } => {
            let obj = fetch_section(driver, dc, name);
            let section = section_from_object(&obj);
            println!("{}", serde_yaml::to_string(&section)?);
            Ok(())
        }
        Command::GetConfig => {
            let sections = load_sections(driver)?;
            let instances = load_instances(driver)?;
            let config = confctl_core::dbctl::compute_config(&sections, &instances)?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}
