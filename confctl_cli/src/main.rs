extern crate clap;
extern crate confctl_cli;
extern crate confctl_core;
extern crate log;

use clap::{App, Arg};

use confctl_cli::cli::confctl::{run, ConfctlArgs};
use confctl_cli::cli::{load_config, make_driver};
use confctl_core::schema::Schema;

fn main() {
    confctl_cli::init();

    let matches = App::new("confctl")
        .version("2.0.0")
        .about("Operator CLI for conftool pool objects")
        .arg(Arg::with_name("debug").long("debug").help("enable verbose logging"))
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .help("path to the tool configuration file"),
        )
        .arg(
            Arg::with_name("schema")
                .long("schema")
                .takes_value(true)
                .default_value("/etc/conftool/schema.yaml"),
        )
        .arg(
            Arg::with_name("object-type")
                .long("object-type")
                .takes_value(true)
                .default_value("node"),
        )
        .arg(
            Arg::with_name("tags")
                .long("tags")
                .takes_value(true)
                .help("comma-separated tag=value pairs"),
        )
        .arg(
            Arg::with_name("action")
                .long("action")
                .number_of_values(2)
                .multiple(true)
                .value_names(&["NAME", "VALUE"])
                .help("an action name and its value; may be repeated"),
        )
        .arg(Arg::with_name("selector").required(true).help("all | re:<pattern> | <name>"))
        .get_matches();

    confctl_cli::init_logger(matches.is_present("debug"));

    let cfg = load_config(matches.value_of("config"));
    let schema = match Schema::from_file(matches.value_of("schema").unwrap()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: could not load schema: {}", e);
            std::process::exit(1);
        }
    };
    let driver = make_driver(&cfg);

    let tags: Vec<String> = matches
        .value_of("tags")
        .map(|t| t.split(',').map(|s| s.to_string()).collect())
        .unwrap_or_default();
    let actions: Vec<(String, String)> = matches
        .values_of("action")
        .map(|vals| {
            let items: Vec<&str> = vals.collect();
            items
                .chunks(2)
                .filter(|c| c.len() == 2)
                .map(|c| (c[0].to_string(), c[1].to_string()))
                .collect()
        })
        .unwrap_or_default();

    let args = ConfctlArgs {
        object_type: matches.value_of("object-type").unwrap().to_string(),
        tags,
        selector: matches.value_of("selector").unwrap().to_string(),
        actions,
        debug: matches.is_present("debug"),
    };

    match run(&args, &schema, &driver) {
        Ok(messages) => {
            for m in messages {
                println!("{}", m);
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
