extern crate chrono;
extern crate dirs;
extern crate failure;
extern crate ipnetwork;
extern crate jsonschema;
extern crate log;
extern crate petgraph;
extern crate regex;
extern crate reqwest;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate shell_words;
extern crate similar;
extern crate tempfile;
extern crate url;
extern crate walkdir;

#[cfg(test)]
extern crate mockito;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub mod action;
pub mod announce;
pub mod backend;
pub mod config;
pub mod dbctl;
pub mod kvobject;
pub mod node;
pub mod requestctl;
pub mod schema;
pub mod service;
pub mod syncer;
pub mod types;

pub use config::Config;
pub use kvobject::Entity;
