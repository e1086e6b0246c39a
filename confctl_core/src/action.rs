//! The action layer: parses `get`/`delete`/`edit`/`set/k=v:...`/`set/@file`
//! action strings, coerces CLI values against an entity's schema, and
//! drives the `$EDITOR` round-trip for `edit`. Ported from
//! `conftool.action`.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write as _;
use std::process::Command;

use failure::{Context, Fail};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::backend::Driver;
use crate::kvobject::{EntityType, Object};
use crate::types::ExpectedType;

pub type ActionResult<T> = std::result::Result<T, ActionError>;

#[derive(Debug)]
pub struct ActionError {
    inner: Context<ActionErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ActionErrKind {
    #[fail(display = "malformed action string: {}", _0)]
    Malformed(String),
    #[fail(display = "dict values cannot be set from the command line: {}", _0)]
    DictFromCli(String),
    #[fail(display = "could not parse set file {}", _0)]
    SetFile(String),
    #[fail(display = "edit aborted by user")]
    UserAbort,
    #[fail(display = "editor command failed: {}", _0)]
    EditorFailed(String),
}

impl Fail for ActionError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl From<ActionErrKind> for ActionError {
    fn from(kind: ActionErrKind) -> ActionError {
        ActionError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ActionErrKind>> for ActionError {
    fn from(inner: Context<ActionErrKind>) -> ActionError {
        ActionError { inner }
    }
}

/// A single parsed action, ready to run against an `Object`.
#[derive(Clone, Debug)]
pub enum Action {
    Get,
    Delete,
    Edit,
    Set(BTreeMap<String, Value>),
}

/// Parse a CLI `--action name value` pair into an `Action`. `name` is one
/// of `get`, `delete`, `edit`, or `set/k=v:k2=v2` / `set/@path.yaml`.
pub fn parse_action(name: &str, value: &str, entity_type: &EntityType) -> ActionResult<Action> {
    match name {
        "get" => Ok(Action::Get),
        "delete" => Ok(Action::Delete),
        "edit" => Ok(Action::Edit),
        "set" => {
            if let Some(path) = value.strip_prefix('@') {
                Ok(Action::Set(from_file(path)?))
            } else {
                Ok(Action::Set(from_cli(value, entity_type)?))
            }
        }
        other => Err(ActionErrKind::Malformed(other.to_string()).into()),
    }
}

/// `k1=v1:k2=v2` CLI form. Values are coerced per the target field's
/// expected type: lists split on `,`, bools must be exactly `true`/
/// `false`, dicts are rejected outright (there is no sane CLI syntax for
/// them — use `set/@file` instead).
fn from_cli(expr: &str, entity_type: &EntityType) -> ActionResult<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for clause in expr.split(':') {
        let mut parts = clause.splitn(2, '=');
        let key = parts
            .next()
            .ok_or_else(|| ActionErrKind::Malformed(expr.to_string()))?
            .trim();
        let raw = parts
            .next()
            .ok_or_else(|| ActionErrKind::Malformed(expr.to_string()))?;
        let validator = entity_type.schema.get(key);
        let expected = validator.map(|v| v.expected_type()).unwrap_or(ExpectedType::Any);
        let value = match expected {
            ExpectedType::Int => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| ActionErrKind::Malformed(clause.to_string()))?,
            ExpectedType::Bool => match raw {
                "true" => Value::from(true),
                "false" => Value::from(false),
                _ => return Err(ActionErrKind::Malformed(clause.to_string()).into()),
            },
            ExpectedType::List => Value::Array(raw.split(',').map(Value::from).collect()),
            ExpectedType::Dict => return Err(ActionErrKind::DictFromCli(key.to_string()).into()),
            ExpectedType::Str | ExpectedType::Any => Value::from(raw),
        };
        out.insert(key.to_string(), value);
    }
    Ok(out)
}

fn from_file(path: &str) -> ActionResult<BTreeMap<String, Value>> {
    let raw = fs::read_to_string(path).map_err(|_| ActionErrKind::SetFile(path.to_string()))?;
    serde_yaml::from_str(&raw).map_err(|_| ActionErrKind::SetFile(path.to_string()).into())
}

/// Apply an action to an object, returning a human-readable diff message
/// for `set` actions (matching `Action.run`'s logging, which a caller
/// typically feeds straight to the announcement sink).
pub fn run(action: &Action, obj: &mut Object, driver: &dyn Driver) -> crate::Result<Option<String>> {
    match action {
        Action::Get => Ok(None),
        Action::Delete => {
            obj.delete(driver)?;
            Ok(Some(format!("{}: deleted", obj.pprint())))
        }
        Action::Edit => {
            let example = None;
            edit(obj, driver, example)?;
            Ok(Some(format!("{}: edited", obj.pprint())))
        }
        Action::Set(values) => {
            let before = obj.values.clone();
            obj.update(values, driver)?;
            let mut diffs = Vec::new();
            for (k, new_v) in values {
                let old_v = before.get(k).cloned().unwrap_or(Value::Null);
                diffs.push(format!("{}: {} -> {}", k, old_v, new_v));
            }
            Ok(Some(format!("{}: {}", obj.pprint(), diffs.join(", "))))
        }
    }
}

/// Editor round-trip: dump the object to a temp YAML file (optionally
/// with an appended commented-out example), open `$EDITOR` on it, parse
/// the result, and re-validate; on a validation failure, reopen the
/// editor with the error appended rather than silently discarding the
/// edit. Aborting (editor exits non-zero, or the file is left unchanged)
/// raises `UserAbort`, which callers should map to exit code 0.
pub fn edit(obj: &mut Object, driver: &dyn Driver, example: Option<&str>) -> crate::Result<()> {
    let mut tmp = NamedTempFile::new()?;
    let mut body = serde_yaml::to_string(&obj.asdict())?;
    if let Some(example) = example {
        body.push_str("\n# Example:\n");
        for line in example.lines() {
            body.push_str("# ");
            body.push_str(line);
            body.push('\n');
        }
    }
    tmp.write_all(body.as_bytes())?;

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let mut parts = shell_words::split(&editor).map_err(|e| failure::err_msg(e.to_string()))?;
    if parts.is_empty() {
        parts.push("vi".to_string());
    }
    let path = tmp.path().to_path_buf();
    loop {
        let status = Command::new(&parts[0])
            .args(&parts[1..])
            .arg(&path)
            .status()
            .map_err(|e| ActionErrKind::EditorFailed(e.to_string()))?;
        if !status.success() {
            return Err(ActionErrKind::UserAbort.into());
        }
        let edited = fs::read_to_string(&path)?;
        let cleaned: String = edited
            .lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n");
        let parsed: BTreeMap<String, BTreeMap<String, Value>> = match serde_yaml::from_str(&cleaned)
        {
            Ok(p) => p,
            Err(e) => {
                reprompt(&path, &format!("could not parse YAML: {}", e))?;
                continue;
            }
        };
        let values = match parsed.get(&obj.name) {
            Some(v) => v.clone(),
            None => {
                reprompt(&path, &format!("missing top-level key {}", obj.name))?;
                continue;
            }
        };
        match obj.update(&values, driver) {
            Ok(()) => return Ok(()),
            Err(e) => {
                reprompt(&path, &e.to_string())?;
                continue;
            }
        }
    }
}

fn reprompt(path: &std::path::Path, message: &str) -> crate::Result<()> {
    let mut existing = fs::read_to_string(path)?;
    existing = format!("# ERROR: {}\n{}", message, existing);
    fs::write(path, existing)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node;

    #[test]
    fn parses_set_from_cli() {
        let et = node::entity_type();
        let action = parse_action("set", "weight=3:pooled=yes", &et).unwrap();
        match action {
            Action::Set(values) => {
                assert_eq!(values.get("weight").unwrap(), &Value::from(3));
                assert_eq!(values.get("pooled").unwrap(), &Value::from("yes"));
            }
            _ => panic!("expected Set"),
        }
    }

    #[test]
    fn rejects_unknown_action_name() {
        let et = node::entity_type();
        assert!(parse_action("frobnicate", "x", &et).is_err());
    }
}
