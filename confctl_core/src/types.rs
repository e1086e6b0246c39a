//! Field-level validators and the JSON-schema rule engine.
//!
//! Ported from `conftool.types`. Each `ValidatorKind` both validates a
//! `serde_json::Value` and exposes the type it expects, so the Action
//! layer (`crate::action`) knows how to coerce a raw CLI string into the
//! right JSON shape before validating it.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use failure::{Context, Fail};
use ipnetwork::IpNetwork;
use jsonschema::JSONSchema;
use log::warn;
use regex::Regex;
use serde_json::Value;

pub type TypesResult<T> = std::result::Result<T, TypesError>;

#[derive(Debug)]
pub struct TypesError {
    inner: Context<TypesErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum TypesErrKind {
    #[fail(display = "invalid value for {} validator: {}", _0, _1)]
    Invalid(String, String),
    #[fail(display = "unknown validator string: {}", _0)]
    UnknownValidator(String),
    #[fail(display = "could not load json schema {}", _0)]
    SchemaLoad(String),
    #[fail(display = "value does not satisfy json schema {}", _0)]
    SchemaMismatch(String),
}

impl Fail for TypesError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
}

impl std::fmt::Display for TypesError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl From<TypesErrKind> for TypesError {
    fn from(kind: TypesErrKind) -> TypesError {
        TypesError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<TypesErrKind>> for TypesError {
    fn from(inner: Context<TypesErrKind>) -> TypesError {
        TypesError { inner }
    }
}

/// The JSON type a validator expects from the CLI layer, used purely for
/// coercing raw strings (`set/k=v`) into the right `serde_json::Value`
/// shape before validation runs.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ExpectedType {
    Int,
    Str,
    Bool,
    List,
    Dict,
    Any,
}

#[derive(Clone, Debug)]
pub enum ValidatorKind {
    Int,
    Str,
    Bool,
    List,
    Dict,
    Any,
    Enum(Vec<String>),
    CidrList,
}

impl ValidatorKind {
    /// Parse a schema-file validator string: `int`, `string`, `bool`,
    /// `list`, `dict`, `any`, `cidr-list`, or `enum:a|b|c`.
    pub fn parse(s: &str) -> TypesResult<ValidatorKind> {
        if let Some(rest) = s.strip_prefix("enum:") {
            let choices: Vec<String> = rest.split('|').map(|c| c.to_string()).collect();
            if choices.is_empty() {
                return Err(TypesErrKind::UnknownValidator(s.to_string()).into());
            }
            return Ok(ValidatorKind::Enum(choices));
        }
        match s {
            "int" => Ok(ValidatorKind::Int),
            "string" => Ok(ValidatorKind::Str),
            "bool" => Ok(ValidatorKind::Bool),
            "list" => Ok(ValidatorKind::List),
            "dict" => Ok(ValidatorKind::Dict),
            "any" => Ok(ValidatorKind::Any),
            "cidr-list" => Ok(ValidatorKind::CidrList),
            other => Err(TypesErrKind::UnknownValidator(other.to_string()).into()),
        }
    }

    pub fn expected_type(&self) -> ExpectedType {
        match self {
            ValidatorKind::Int => ExpectedType::Int,
            ValidatorKind::Str | ValidatorKind::Enum(_) => ExpectedType::Str,
            ValidatorKind::Bool => ExpectedType::Bool,
            ValidatorKind::List | ValidatorKind::CidrList => ExpectedType::List,
            ValidatorKind::Dict => ExpectedType::Dict,
            ValidatorKind::Any => ExpectedType::Any,
        }
    }

    pub fn validate(&self, value: &Value) -> TypesResult<Value> {
        match self {
            ValidatorKind::Int => value
                .as_i64()
                .map(|i| Value::from(i))
                .ok_or_else(|| TypesErrKind::Invalid("int".into(), value.to_string()).into()),
            ValidatorKind::Str => value
                .as_str()
                .map(|s| Value::from(s))
                .ok_or_else(|| TypesErrKind::Invalid("string".into(), value.to_string()).into()),
            ValidatorKind::Bool => value
                .as_bool()
                .map(Value::from)
                .ok_or_else(|| TypesErrKind::Invalid("bool".into(), value.to_string()).into()),
            ValidatorKind::List => {
                if value.is_array() {
                    Ok(value.clone())
                } else {
                    Err(TypesErrKind::Invalid("list".into(), value.to_string()).into())
                }
            }
            ValidatorKind::Dict => {
                if value.is_object() {
                    Ok(value.clone())
                } else {
                    Err(TypesErrKind::Invalid("dict".into(), value.to_string()).into())
                }
            }
            ValidatorKind::Any => {
                // any JSON-serializable value is accepted by definition
                Ok(value.clone())
            }
            ValidatorKind::Enum(choices) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| TypesErrKind::Invalid("enum".into(), value.to_string()))?;
                if choices.iter().any(|c| c == s) {
                    Ok(Value::from(s))
                } else {
                    Err(TypesErrKind::Invalid(
                        format!("enum:{}", choices.join("|")),
                        s.to_string(),
                    )
                    .into())
                }
            }
            ValidatorKind::CidrList => {
                let items = value
                    .as_array()
                    .ok_or_else(|| TypesErrKind::Invalid("cidr-list".into(), value.to_string()))?;
                let mut kept = Vec::new();
                for item in items {
                    let s = item.as_str().ok_or_else(|| {
                        TypesErrKind::Invalid("cidr-list".into(), item.to_string())
                    })?;
                    match IpNetwork::from_str(s) {
                        Ok(_) => kept.push(Value::from(s)),
                        Err(_) => warn!("dropping invalid cidr-list entry: {}", s),
                    }
                }
                Ok(Value::Array(kept))
            }
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            ValidatorKind::Int => Value::from(0),
            ValidatorKind::Str | ValidatorKind::Enum(_) => Value::from(""),
            ValidatorKind::Bool => Value::from(false),
            ValidatorKind::List | ValidatorKind::CidrList => Value::from(Vec::<Value>::new()),
            ValidatorKind::Dict => Value::Object(Default::default()),
            ValidatorKind::Any => Value::Null,
        }
    }
}

/// Parses the CIDR list values out of a list value, used by
/// `requestctl find-ip`.
pub fn parse_cidr_list(value: &Value) -> TypesResult<Vec<IpNetwork>> {
    let items = value
        .as_array()
        .ok_or_else(|| TypesErrKind::Invalid("cidr-list".into(), value.to_string()))?;
    items
        .iter()
        .map(|item| {
            let s = item
                .as_str()
                .ok_or_else(|| TypesErrKind::Invalid("cidr-list".into(), item.to_string()))?;
            IpNetwork::from_str(s)
                .map_err(|_| TypesErrKind::Invalid("cidr-list".into(), s.to_string()).into())
        })
        .collect()
}

/// A single entry of a JSON-schema selection rule: `tag=regex,tag2=regex2`
/// anchored per-tag, paired with the path to a JSON-schema file that is
/// lazily compiled on first use.
pub struct SchemaRule {
    selectors: BTreeMap<String, Regex>,
    schema_path: PathBuf,
    compiled: Option<JSONSchema>,
}

impl SchemaRule {
    pub fn new(selector_expr: &str, schema_path: PathBuf) -> TypesResult<SchemaRule> {
        let mut selectors = BTreeMap::new();
        for clause in selector_expr.split(',') {
            let mut parts = clause.splitn(2, '=');
            let tag = parts
                .next()
                .ok_or_else(|| TypesErrKind::UnknownValidator(selector_expr.to_string()))?
                .trim();
            let expr = parts
                .next()
                .ok_or_else(|| TypesErrKind::UnknownValidator(selector_expr.to_string()))?
                .trim();
            let anchored = format!("^{}$", expr);
            let re = Regex::new(&anchored)
                .map_err(|_| TypesErrKind::UnknownValidator(selector_expr.to_string()))?;
            selectors.insert(tag.to_string(), re);
        }
        Ok(SchemaRule {
            selectors,
            schema_path,
            compiled: None,
        })
    }

    pub fn matches(&self, tags: &BTreeMap<String, String>, name: &str) -> bool {
        for (tag, re) in &self.selectors {
            let subject = if tag == "name" {
                name
            } else {
                match tags.get(tag) {
                    Some(v) => v.as_str(),
                    None => return false,
                }
            };
            if !re.is_match(subject) {
                return false;
            }
        }
        true
    }

    fn schema(&mut self) -> TypesResult<&JSONSchema> {
        if self.compiled.is_none() {
            let raw = fs::read_to_string(&self.schema_path)
                .map_err(|_| TypesErrKind::SchemaLoad(self.schema_path.display().to_string()))?;
            let value: Value = serde_json::from_str(&raw)
                .map_err(|_| TypesErrKind::SchemaLoad(self.schema_path.display().to_string()))?;
            let compiled = JSONSchema::compile(&value)
                .map_err(|_| TypesErrKind::SchemaLoad(self.schema_path.display().to_string()))?;
            self.compiled = Some(compiled);
        }
        Ok(self.compiled.as_ref().unwrap())
    }

    pub fn validate(&mut self, value: &Value) -> TypesResult<()> {
        let path = self.schema_path.display().to_string();
        let schema = self.schema()?;
        schema
            .validate(value)
            .map_err(|_| TypesErrKind::SchemaMismatch(path))?;
        Ok(())
    }
}

/// A stack of `SchemaRule`s. A `JsonSchemaEntity` validates by union: it
/// must pass every rule whose selector matches its tag set, not just the
/// first.
#[derive(Default)]
pub struct JsonSchemaLoader {
    rules: Vec<SchemaRule>,
}

impl JsonSchemaLoader {
    pub fn new() -> JsonSchemaLoader {
        JsonSchemaLoader { rules: Vec::new() }
    }

    pub fn push(&mut self, rule: SchemaRule) {
        self.rules.push(rule);
    }

    pub fn rules_for(&mut self, tags: &BTreeMap<String, String>, name: &str) -> Vec<&mut SchemaRule> {
        self.rules
            .iter_mut()
            .filter(|r| r.matches(tags, name))
            .collect()
    }

    /// Validate `value` against every rule matching `(tags, name)`. A
    /// `(tags, name)` pair matched by zero rules passes trivially.
    pub fn validate_all(
        &mut self,
        tags: &BTreeMap<String, String>,
        name: &str,
        value: &Value,
    ) -> TypesResult<()> {
        for rule in self.rules_for(tags, name) {
            rule.validate(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_validator_rejects_out_of_set() {
        let v = ValidatorKind::Enum(vec!["yes".into(), "no".into(), "inactive".into()]);
        assert!(v.validate(&Value::from("yes")).is_ok());
        assert!(v.validate(&Value::from("maybe")).is_err());
    }

    #[test]
    fn cidr_list_accepts_valid_entries() {
        let v = ValidatorKind::CidrList;
        assert!(v.validate(&serde_json::json!(["10.0.0.0/8"])).is_ok());
    }

    #[test]
    fn cidr_list_drops_invalid_entries() {
        let v = ValidatorKind::CidrList;
        let result = v
            .validate(&serde_json::json!(["10.0.0.0/8", "not-a-cidr"]))
            .unwrap();
        assert_eq!(result, serde_json::json!(["10.0.0.0/8"]));
    }

    #[test]
    fn parse_enum_string() {
        let v = ValidatorKind::parse("enum:yes|no|inactive").unwrap();
        assert!(matches!(v, ValidatorKind::Enum(_)));
    }
}
