//! FR-005: Parameter templating — compile-time expansion, deferred values, execution-time evaluation.
//!
//! Placeholders use `{name}`. Compile-time variables (`version`, `version_tag`,
//! `os`, `arch`) are substituted while compiling. Execution-time variables
//! (`install_dir`, `work_dir`, `tools_dir`, `current_dir`) turn the value into a
//! [`ParamValue::Deferred`]. Anything else is a typed error. `${NAME}` is shell
//! syntax and left untouched. `{{` and `}}` write a literal brace; they stay
//! escaped inside deferred values until evaluation.

use super::error::Error;
use super::types::{Deferred, ParamValue, Params, Platform, VersionInfo};
use indexmap::IndexMap;
use serde_json::Value;

pub const EXECUTION_VARS: [&str; 4] = ["install_dir", "work_dir", "tools_dir", "current_dir"];

/// Step keys that remap `{os}`/`{arch}` and are consumed during expansion.
pub const MAPPING_KEYS: [&str; 2] = ["os_mapping", "arch_mapping"];

pub type Vars = IndexMap<String, String>;

enum Segment<'a> {
    Text(&'a str),
    Var(&'a str),
    /// `{{` or `}}`, holding the single brace.
    Escaped(&'a str),
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn scan(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(at) = rest.find(&['{', '}'][..]) {
        let bytes = rest.as_bytes();
        if bytes.get(at + 1) == Some(&bytes[at]) {
            segments.push(Segment::Text(&rest[..at]));
            segments.push(Segment::Escaped(&rest[at..at + 1]));
            rest = &rest[at + 2..];
            continue;
        }
        if bytes[at] == b'}' {
            segments.push(Segment::Text(&rest[..=at]));
            rest = &rest[at + 1..];
            continue;
        }
        let open = at;
        let shell_expansion = open > 0 && bytes[open - 1] == b'$';
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        let name = &rest[open + 1..close];
        if shell_expansion || !is_var_name(name) {
            segments.push(Segment::Text(&rest[..=close]));
        } else {
            segments.push(Segment::Text(&rest[..open]));
            segments.push(Segment::Var(name));
        }
        rest = &rest[close + 1..];
    }
    segments.push(Segment::Text(rest));
    segments
}

/// Variables available while compiling one step, after os/arch remapping.
pub fn compile_vars(
    action: &str,
    version: &VersionInfo,
    target: &Platform,
    step_params: &IndexMap<String, Value>,
) -> Result<Vars, Error> {
    let mut vars = Vars::new();
    vars.insert("version".into(), version.version.clone());
    vars.insert("version_tag".into(), version.tag.clone());
    vars.insert("os".into(), apply_mapping(action, step_params, "os_mapping", &target.os)?);
    vars.insert("arch".into(), apply_mapping(action, step_params, "arch_mapping", &target.arch)?);
    Ok(vars)
}

fn apply_mapping(
    action: &str,
    params: &IndexMap<String, Value>,
    key: &str,
    value: &str,
) -> Result<String, Error> {
    match params.get(key) {
        None => Ok(value.to_string()),
        Some(Value::Object(map)) => match map.get(value) {
            None => Ok(value.to_string()),
            Some(Value::String(mapped)) => Ok(mapped.clone()),
            Some(_) => Err(Error::malformed(action, key, "mapping values must be strings")),
        },
        Some(_) => Err(Error::malformed(action, key, "expected a table of strings")),
    }
}

/// Expand one string. Execution-time references make the result deferred.
pub fn expand_str(action: &str, key: &str, template: &str, vars: &Vars) -> Result<ParamValue, Error> {
    // `expr` keeps escapes for a later evaluation pass; `out` is final text
    let mut out = String::with_capacity(template.len());
    let mut expr = String::with_capacity(template.len());
    let mut deferred = false;
    for segment in scan(template) {
        match segment {
            Segment::Text(t) => {
                out.push_str(t);
                expr.push_str(t);
            }
            Segment::Escaped(brace) => {
                out.push_str(brace);
                expr.push_str(brace);
                expr.push_str(brace);
            }
            Segment::Var(name) => {
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                    expr.push_str(&value.replace('{', "{{").replace('}', "}}"));
                } else if EXECUTION_VARS.contains(&name) {
                    expr.push('{');
                    expr.push_str(name);
                    expr.push('}');
                    deferred = true;
                } else {
                    return Err(Error::malformed(
                        action,
                        key,
                        format!("unknown variable {{{}}}", name),
                    ));
                }
            }
        }
    }
    if deferred {
        Ok(ParamValue::Deferred(Deferred { expr }))
    } else {
        Ok(ParamValue::Literal(Value::String(out)))
    }
}

/// Expand a raw recipe value recursively through lists and tables.
pub fn expand_value(action: &str, key: &str, value: &Value, vars: &Vars) -> Result<ParamValue, Error> {
    match value {
        Value::String(s) => expand_str(action, key, s, vars),
        Value::Array(items) => items
            .iter()
            .map(|v| expand_value(action, key, v, vars))
            .collect::<Result<Vec<_>, _>>()
            .map(ParamValue::List),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), expand_value(action, key, v, vars)?)))
            .collect::<Result<IndexMap<_, _>, Error>>()
            .map(ParamValue::Map),
        other => Ok(ParamValue::Literal(other.clone())),
    }
}

/// Expand every parameter of a recipe step. Mapping keys are consumed.
pub fn expand_params(action: &str, params: &IndexMap<String, Value>, vars: &Vars) -> Result<Params, Error> {
    let mut out = Params::new();
    for (key, value) in params {
        if MAPPING_KEYS.contains(&key.as_str()) {
            continue;
        }
        out.insert(key.clone(), expand_value(action, key, value, vars)?);
    }
    Ok(out)
}

/// Does a raw recipe value mention an execution-time variable?
pub fn references_execution_var(value: &Value) -> bool {
    match value {
        Value::String(s) => scan(s)
            .iter()
            .any(|seg| matches!(seg, Segment::Var(name) if EXECUTION_VARS.contains(name))),
        Value::Array(items) => items.iter().any(references_execution_var),
        Value::Object(map) => map.values().any(references_execution_var),
        _ => false,
    }
}

/// Resolve a plan value against execution-time variables.
pub fn evaluate(action: &str, key: &str, value: &ParamValue, exec: &Vars) -> Result<Value, Error> {
    match value {
        ParamValue::Literal(v) => Ok(v.clone()),
        ParamValue::Deferred(Deferred { expr }) => {
            let mut out = String::with_capacity(expr.len());
            for segment in scan(expr) {
                match segment {
                    Segment::Text(t) | Segment::Escaped(t) => out.push_str(t),
                    Segment::Var(name) => {
                        let bound = exec.get(name).ok_or_else(|| {
                            Error::malformed(action, key, format!("unbound execution variable {{{}}}", name))
                        })?;
                        out.push_str(bound);
                    }
                }
            }
            Ok(Value::String(out))
        }
        ParamValue::List(items) => items
            .iter()
            .map(|v| evaluate(action, key, v, exec))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ParamValue::Map(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), evaluate(action, key, v, exec)?)))
            .collect::<Result<serde_json::Map<_, _>, Error>>()
            .map(Value::Object),
    }
}

/// Resolve every parameter of a plan step.
pub fn evaluate_params(action: &str, params: &Params, exec: &Vars) -> Result<IndexMap<String, Value>, Error> {
    params
        .iter()
        .map(|(k, v)| Ok((k.clone(), evaluate(action, k, v, exec)?)))
        .collect()
}
