//! Shared CLI glue used by all three binaries: config loading, driver
//! construction, and the destructive-action confirmation flow ported
//! from `conftool.cli.tool.raise_warning`.

pub mod confctl;
pub mod dbctl;
pub mod requestctl;

use std::io::{self, IsTerminal, Write};

use confctl_core::backend::etcd::EtcdDriver;
use confctl_core::Config;

pub fn load_config(path: Option<&str>) -> Config {
    match path {
        Some(p) => Config::from_file(p).unwrap_or_else(|e| {
            log::warn!("could not load config {}: {}, using defaults", p, e);
            Config::default()
        }),
        None => Config::from_file("/etc/conftool/config.yaml").unwrap_or_default(),
    }
}

pub fn make_driver(cfg: &Config) -> EtcdDriver {
    EtcdDriver::from_config(cfg)
}

/// `host_list`'s `warn = len(objlist) <= 2 * len(retval)` rule: true when
/// more than half of all candidate objects were selected, which gates
/// the typed-confirmation prompt below.
pub fn should_warn(selected: usize, total: usize) -> bool {
    total > 0 && total <= 2 * selected
}

/// `raise_warning`: only prompts when both stdin and stdout are a TTY
/// (never blocks a scripted/piped invocation), requiring the operator to
/// type the exact confirmation string.
pub fn confirm_destructive(action_description: &str) -> bool {
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        // non-interactive: proceed without prompting, matching the
        // original's behaviour of only gating TTY sessions.
        return true;
    }
    println!(
        "You are about to {}. This will affect more than half of the selected objects.",
        action_description
    );
    print!("Type \"Yes, I am sure of what I am doing.\" to continue: ");
    io::stdout().flush().ok();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim() == "Yes, I am sure of what I am doing."
}

/// Expand a CLI object-name selector: `all`, `re:<pattern>`, or a
/// literal name, against a candidate name list. Mirrors
/// `conftool.cli.tool.host_list`.
pub fn expand_selector(selector: &str, candidates: &[String]) -> Vec<String> {
    if selector == "all" {
        return candidates.to_vec();
    }
    if let Some(pattern) = selector.strip_prefix("re:") {
        if let Ok(re) = regex::Regex::new(pattern) {
            return candidates
                .iter()
                .filter(|c| re.is_match(c))
                .cloned()
                .collect();
        }
        return Vec::new();
    }
    candidates
        .iter()
        .filter(|c| c.as_str() == selector)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_threshold_matches_original() {
        assert!(should_warn(3, 5));
        assert!(!should_warn(2, 5));
    }

    #[test]
    fn expand_selector_all() {
        let candidates = vec!["a".to_string(), "b".to_string()];
        assert_eq!(expand_selector("all", &candidates), candidates);
    }

    #[test]
    fn expand_selector_regex() {
        let candidates = vec!["cp1001".to_string(), "cp1002".to_string(), "db1001".to_string()];
        let out = expand_selector("re:^cp.*", &candidates);
        assert_eq!(out, vec!["cp1001".to_string(), "cp1002".to_string()]);
    }
}
