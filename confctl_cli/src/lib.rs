extern crate chrono;
extern crate clap;
extern crate confctl_core;
extern crate dirs;
extern crate failure;
extern crate log;
extern crate loggerv;
extern crate openssl_probe;
extern crate regex;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;

#[cfg(test)]
extern crate mockito;

pub mod cli;

pub use confctl_core::Result;

/// Common process bootstrap shared by all three binaries: sets up the
/// process-wide TLS trust store for the etcd HTTPS backend, and honours
/// `CONFTOOL_CONFIG_DIR` to let tests/dev loops point at a scratch
/// config directory without touching the real one.
pub fn init() {
    openssl_probe::init_ssl_cert_env_vars();
    if let Ok(dir) = std::env::var("CONFTOOL_CONFIG_DIR") {
        let _ = std::env::set_current_dir(dir);
    }
}

pub fn init_logger(debug: bool) {
    let level = if debug { 2 } else { 0 };
    loggerv::Logger::new()
        .verbosity(level)
        .level(true)
        .module_path(false)
        .init()
        .ok();
}
