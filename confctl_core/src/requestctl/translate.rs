//! The request-filter boolean DSL: parsing, canonical storage form, and
//! translation into VCL (for commit) and VSL (for `requestctl log`).
//! Ported from `conftool.extensions.reqconfig.translate`.
//!
//! Grammar (as stored, single-space token-joined):
//!
//! ```text
//! expr   := term { ("AND" | "OR") ["NOT"] term }
//! term   := "(" expr ")" | "pattern@" slug | "ipblock@" slug
//! slug   := scope "/" name
//! ```

use std::collections::BTreeMap;

use failure::{Context, Fail};

use crate::kvobject::Object;

pub type TranslateResult<T> = std::result::Result<T, TranslateError>;

#[derive(Debug)]
pub struct TranslateError {
    inner: Context<TranslateErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum TranslateErrKind {
    #[fail(display = "malformed expression: {}", _0)]
    Malformed(String),
    #[fail(display = "unknown ipblock scope: {}", _0)]
    UnknownScope(String),
    #[fail(display = "dangling reference: {}", _0)]
    DanglingReference(String),
}

impl Fail for TranslateError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl From<TranslateErrKind> for TranslateError {
    fn from(kind: TranslateErrKind) -> TranslateError {
        TranslateError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<TranslateErrKind>> for TranslateError {
    fn from(inner: Context<TranslateErrKind>) -> TranslateError {
        TranslateError { inner }
    }
}

pub const PATTERN_PREFIX: &str = "pattern@";
pub const IPBLOCK_PREFIX: &str = "ipblock@";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Term {
    Pattern(String),
    Ipblock(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Op {
    And,
    Or,
}

/// The parsed expression tree. A `Group`'s `negated` flag covers the
/// whole parenthesized span, matching the original tokenizer's
/// one-token-lookback negation detection (DESIGN.md open question 3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expr {
    Leaf(Term, bool),
    Group(Box<Expr>, bool),
    Binary(Op, Box<Expr>, Box<Expr>),
}

fn tokenize(expr: &str) -> Vec<String> {
    let spaced = expr.replace('(', " ( ").replace(')', " ) ");
    spaced.split_whitespace().map(|s| s.to_string()).collect()
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn next(&mut self) -> Option<String> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> TranslateResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some("AND") => Op::And,
                Some("OR") => Op::Or,
                _ => break,
            };
            self.next();
            let negated = if self.peek() == Some("NOT") {
                self.next();
                true
            } else {
                false
            };
            let mut right = self.parse_term()?;
            if negated {
                right = negate(right);
            }
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> TranslateResult<Expr> {
        match self.next() {
            Some(tok) if tok == "(" => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(ref t) if t == ")" => Ok(Expr::Group(Box::new(inner), false)),
                    _ => Err(TranslateErrKind::Malformed("unbalanced parentheses".to_string()).into()),
                }
            }
            Some(tok) if tok.starts_with(PATTERN_PREFIX) => {
                Ok(Expr::Leaf(Term::Pattern(tok[PATTERN_PREFIX.len()..].to_string()), false))
            }
            Some(tok) if tok.starts_with(IPBLOCK_PREFIX) => {
                Ok(Expr::Leaf(Term::Ipblock(tok[IPBLOCK_PREFIX.len()..].to_string()), false))
            }
            Some(tok) => Err(TranslateErrKind::Malformed(tok).into()),
            None => Err(TranslateErrKind::Malformed("empty expression".to_string()).into()),
        }
    }
}

fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Leaf(term, negated) => Expr::Leaf(term, !negated),
        Expr::Group(inner, negated) => Expr::Group(inner, !negated),
        other => Expr::Group(Box::new(other), true),
    }
}

pub fn parse_expression(expr: &str) -> TranslateResult<Expr> {
    let tokens = tokenize(expr);
    let mut parser = Parser { tokens, pos: 0 };
    let parsed = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(TranslateErrKind::Malformed(expr.to_string()).into());
    }
    Ok(parsed)
}

/// Re-emit an expression in canonical single-space token-joined form.
pub fn canonicalize(expr: &Expr) -> String {
    render(expr)
}

fn render(expr: &Expr) -> String {
    match expr {
        Expr::Leaf(Term::Pattern(slug), negated) => {
            let base = format!("{}{}", PATTERN_PREFIX, slug);
            if *negated {
                format!("{} NOT", base)
            } else {
                base
            }
        }
        Expr::Leaf(Term::Ipblock(slug), negated) => {
            let base = format!("{}{}", IPBLOCK_PREFIX, slug);
            if *negated {
                format!("{} NOT", base)
            } else {
                base
            }
        }
        Expr::Group(inner, negated) => {
            let base = format!("( {} )", render(inner));
            if *negated {
                format!("{} NOT", base)
            } else {
                base
            }
        }
        Expr::Binary(op, left, right) => {
            let op_str = match op {
                Op::And => "AND",
                Op::Or => "OR",
            };
            format!("{} {} {}", render(left), op_str, render(right))
        }
    }
}

/// Walk every slug referenced by an expression. Used by reference-safety
/// validation (both datastore and on-disk tree modes).
pub fn referenced_slugs(expr: &Expr) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();
    collect(expr, &mut out);
    out
}

fn collect(expr: &Expr, out: &mut Vec<(&'static str, String)>) {
    match expr {
        Expr::Leaf(Term::Pattern(slug), _) => out.push(("pattern", slug.clone())),
        Expr::Leaf(Term::Ipblock(slug), _) => out.push(("ipblock", slug.clone())),
        Expr::Group(inner, _) => collect(inner, out),
        Expr::Binary(_, left, right) => {
            collect(left, out);
            collect(right, out);
        }
    }
}

/// Shared field-clause construction and scope routing between the VCL
/// and VSL backends; only the per-token format strings differ, which
/// concrete translators supply.
pub trait DslTranslator {
    fn bool_and(&self) -> &'static str;
    fn bool_or(&self) -> &'static str;
    fn no(&self) -> &'static str;
    fn acl_template(&self) -> &'static str;
    fn no_acl_template(&self) -> &'static str;
    fn method_var(&self) -> &'static str;
    fn url_var(&self) -> &'static str;
    fn header_prefix(&self) -> &'static str;
    fn body_var(&self) -> Option<&'static str>;
    fn equality(&self) -> &'static str;
    fn method_equality(&self) -> &'static str;
    fn escape_backslash(&self) -> bool;

    fn acl_scopes(&self) -> &'static [&'static str] {
        &["abuse"]
    }

    fn custom_header_scopes(&self) -> BTreeMap<&'static str, &'static str> {
        let mut m = BTreeMap::new();
        m.insert("cloud", "X-Public-Cloud");
        m.insert("known-clients", "X-Known-Client");
        m
    }

    fn escape(&self, value: &str) -> String {
        if self.escape_backslash() {
            value.replace('\\', "\\\\")
        } else {
            value.to_string()
        }
    }

    fn from_ipblock(&self, scope: &str, value: &str, negated: bool) -> TranslateResult<String> {
        let template = if negated {
            self.no_acl_template()
        } else {
            self.acl_template()
        };
        if self.acl_scopes().contains(&scope) {
            return Ok(template.replace("{value}", value));
        }
        if let Some(header) = self.custom_header_scopes().get(scope) {
            let op = if negated { "!~" } else { "~" };
            return Ok(format!("{}{} {} \"^{}$\"", self.header_prefix(), header, op, value));
        }
        Err(TranslateErrKind::UnknownScope(scope.to_string()).into())
    }

    /// Build the (possibly multi-clause) boolean expression for one
    /// pattern object's declared fields, joined with `&&`/`and`
    /// depending on translator, and parenthesized when there's more
    /// than one clause or the whole thing is negated.
    fn from_pattern(&self, pattern: &Object, negated: bool) -> String {
        let mut clauses = Vec::new();
        let get = |field: &str| {
            pattern
                .values
                .get(field)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        if let Some(method) = get("method") {
            clauses.push(format!("{} {} \"{}\"", self.method_var(), self.method_equality(), self.escape(&method)));
        }
        if let Some(url) = get("url_path") {
            clauses.push(self.url_match(&url, get("query_parameter"), get("query_parameter_value")));
        }
        if let Some(header) = get("header") {
            match get("header_value") {
                Some(value) if !value.is_empty() => {
                    clauses.push(format!(
                        "{}{} {} \"{}\"",
                        self.header_prefix(),
                        header,
                        self.equality(),
                        self.escape(&value)
                    ));
                }
                _ => {
                    clauses.push(format!("{}{}{}", self.no(), self.header_prefix(), header));
                }
            }
        }
        if let (Some(var), Some(body)) = (self.body_var(), get("request_body")) {
            clauses.push(format!("{} {} \"{}\"", var, self.equality(), self.escape(&body)));
        }
        let joined = clauses.join(&format!(" {} ", self.bool_and()));
        if clauses.len() > 1 || negated {
            let wrapped = format!("({})", joined);
            if negated {
                format!("{}{}", self.no(), wrapped)
            } else {
                wrapped
            }
        } else {
            joined
        }
    }

    fn url_match(&self, path: &str, param: Option<String>, value: Option<String>) -> String {
        let mut pattern = regex::escape(path);
        if let Some(p) = param {
            pattern.push_str(&format!(".*[?&]{}", regex::escape(&p)));
            if let Some(v) = value {
                pattern.push_str(&format!("={}", regex::escape(&v)));
            }
        }
        format!("{} {} \"{}\"", self.url_var(), self.equality(), pattern)
    }

    /// Translate a full expression tree into backend syntax, resolving
    /// each referenced slug through `resolve_pattern`/`resolve_ipblock`.
    fn translate(
        &self,
        expr: &Expr,
        resolve_pattern: &dyn Fn(&str) -> crate::Result<Object>,
        resolve_ipblock: &dyn Fn(&str) -> crate::Result<(String, String)>,
    ) -> crate::Result<String>
    where
        Self: Sized,
    {
        match expr {
            Expr::Leaf(Term::Pattern(slug), negated) => {
                let obj = resolve_pattern(slug)?;
                Ok(self.from_pattern(&obj, *negated))
            }
            Expr::Leaf(Term::Ipblock(slug), negated) => {
                let (scope, value) = resolve_ipblock(slug)?;
                Ok(self.from_ipblock(&scope, &value, *negated)?)
            }
            Expr::Group(inner, negated) => {
                let body = self.translate(inner, resolve_pattern, resolve_ipblock)?;
                if *negated {
                    Ok(format!("{}({})", self.no(), body))
                } else {
                    Ok(format!("({})", body))
                }
            }
            Expr::Binary(op, left, right) => {
                let l = self.translate(left, resolve_pattern, resolve_ipblock)?;
                let r = self.translate(right, resolve_pattern, resolve_ipblock)?;
                let joiner = match op {
                    Op::And => self.bool_and(),
                    Op::Or => self.bool_or(),
                };
                Ok(format!("{} {} {}", l, joiner, r))
            }
        }
    }
}

pub struct VclTranslator;

impl DslTranslator for VclTranslator {
    fn bool_and(&self) -> &'static str {
        "&&"
    }
    fn bool_or(&self) -> &'static str {
        "||"
    }
    fn no(&self) -> &'static str {
        "!"
    }
    fn acl_template(&self) -> &'static str {
        "std.ip(req.http.X-Client-IP, \"192.0.2.1\") ~ {value}"
    }
    fn no_acl_template(&self) -> &'static str {
        "std.ip(req.http.X-Client-IP, \"192.0.2.1\") !~ {value}"
    }
    fn method_var(&self) -> &'static str {
        "req.method"
    }
    fn url_var(&self) -> &'static str {
        "req.url"
    }
    fn header_prefix(&self) -> &'static str {
        "req.http."
    }
    fn body_var(&self) -> Option<&'static str> {
        None
    }
    fn equality(&self) -> &'static str {
        "~"
    }
    fn method_equality(&self) -> &'static str {
        "=="
    }
    fn escape_backslash(&self) -> bool {
        false
    }
}

pub struct VslTranslator;

impl DslTranslator for VslTranslator {
    fn bool_and(&self) -> &'static str {
        "and"
    }
    fn bool_or(&self) -> &'static str {
        "or"
    }
    fn no(&self) -> &'static str {
        "not "
    }
    fn acl_template(&self) -> &'static str {
        "VCL_acl ~ \"^MATCH {value}.*\""
    }
    fn no_acl_template(&self) -> &'static str {
        "VCL_acl ~ \"^NO_MATCH {value}\""
    }
    fn method_var(&self) -> &'static str {
        "ReqMethod"
    }
    fn url_var(&self) -> &'static str {
        "ReqURL"
    }
    fn header_prefix(&self) -> &'static str {
        "ReqHeader:"
    }
    fn body_var(&self) -> Option<&'static str> {
        None
    }
    fn equality(&self) -> &'static str {
        "~"
    }
    fn method_equality(&self) -> &'static str {
        "~"
    }
    fn escape_backslash(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_and() {
        let expr = parse_expression("pattern@ua/evil AND ipblock@abuse/bots").unwrap();
        match expr {
            Expr::Binary(Op::And, _, _) => {}
            _ => panic!("expected AND"),
        }
    }

    #[test]
    fn and_not_negates_rhs() {
        let expr = parse_expression("pattern@ua/evil AND NOT ipblock@abuse/bots").unwrap();
        if let Expr::Binary(Op::And, _, right) = expr {
            assert_eq!(*right, Expr::Leaf(Term::Ipblock("abuse/bots".into()), true));
        } else {
            panic!("expected AND");
        }
    }

    #[test]
    fn canonical_round_trip() {
        let raw = "pattern@ua/evil AND ( ipblock@abuse/bots OR ipblock@abuse/scrapers )";
        let expr = parse_expression(raw).unwrap();
        assert_eq!(canonicalize(&expr), raw);
    }

    #[test]
    fn unknown_ipblock_scope_rejected() {
        let t = VclTranslator;
        assert!(t.from_ipblock("nope", "x", false).is_err());
    }

    #[test]
    fn acl_scope_uses_acl_template() {
        let t = VclTranslator;
        let out = t.from_ipblock("abuse", "bots_acl", false).unwrap();
        assert!(out.contains("std.ip"));
    }

    #[test]
    fn custom_header_scope_uses_header() {
        let t = VclTranslator;
        let out = t.from_ipblock("cloud", "1.2.3.0/24", false).unwrap();
        assert_eq!(out, "req.http.X-Public-Cloud ~ \"^1.2.3.0/24$\"");
    }

    #[test]
    fn custom_header_scope_negated_uses_not_tilde() {
        let t = VclTranslator;
        let out = t.from_ipblock("cloud", "gcp", true).unwrap();
        assert_eq!(out, "req.http.X-Public-Cloud !~ \"^gcp$\"");
    }

    #[test]
    fn vcl_method_clause_uses_double_equals() {
        let t = VclTranslator;
        let mut values = BTreeMap::new();
        values.insert("method".to_string(), serde_json::Value::from("GET"));
        let pattern = Object {
            entity_type: std::sync::Arc::new(crate::requestctl::schema::pattern_entity_type()),
            tags: BTreeMap::new(),
            name: "t".to_string(),
            values,
            extra: BTreeMap::new(),
            exists: true,
        };
        let out = t.from_pattern(&pattern, false);
        assert_eq!(out, "req.method == \"GET\"");
    }

    #[test]
    fn vsl_method_clause_uses_tilde() {
        let t = VslTranslator;
        let mut values = BTreeMap::new();
        values.insert("method".to_string(), serde_json::Value::from("GET"));
        let pattern = Object {
            entity_type: std::sync::Arc::new(crate::requestctl::schema::pattern_entity_type()),
            tags: BTreeMap::new(),
            name: "t".to_string(),
            values,
            extra: BTreeMap::new(),
            exists: true,
        };
        let out = t.from_pattern(&pattern, false);
        assert_eq!(out, "ReqMethod ~ \"GET\"");
    }

    #[test]
    fn empty_header_value_renders_absence_clause() {
        let t = VclTranslator;
        let mut values = BTreeMap::new();
        values.insert("header".to_string(), serde_json::Value::from("X-Foo"));
        values.insert("header_value".to_string(), serde_json::Value::from(""));
        let pattern = Object {
            entity_type: std::sync::Arc::new(crate::requestctl::schema::pattern_entity_type()),
            tags: BTreeMap::new(),
            name: "t".to_string(),
            values,
            extra: BTreeMap::new(),
            exists: true,
        };
        let out = t.from_pattern(&pattern, false);
        assert_eq!(out, "!req.http.X-Foo");
    }
}
