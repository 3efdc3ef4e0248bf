//! CLI-facing graph configuration: component specs, connection rules, and
//! the `key=value` parameter syntax.

use crate::component::ComponentClassKind;
use crate::error::Error;
use crate::value::Value;
use std::str::FromStr;

/// One `--component` argument: `[NAME:]KIND.PLUGIN.CLASS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentSpec {
    pub name: Option<String>,
    pub kind: ComponentClassKind,
    pub plugin: String,
    pub class: String,
}

impl ComponentSpec {
    /// The instance name: explicit, or derived from the class coordinates.
    pub fn instance_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}-{}-{}", self.kind, self.plugin, self.class),
        }
    }
}

impl FromStr for ComponentSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => {
                if name.is_empty() || name.contains('.') {
                    return Err(Error::invalid_params(format!(
                        "invalid component name in `{s}`"
                    )));
                }
                (Some(name.to_owned()), rest)
            }
            None => (None, s),
        };
        let mut parts = rest.splitn(3, '.');
        let kind = match parts.next() {
            Some("source") | Some("src") => ComponentClassKind::Source,
            Some("filter") | Some("flt") => ComponentClassKind::Filter,
            Some("sink") => ComponentClassKind::Sink,
            _ => {
                return Err(Error::invalid_params(format!(
                    "invalid component class kind in `{s}` (expected source, filter or sink)"
                )))
            }
        };
        let plugin = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::invalid_params(format!("missing plugin name in `{s}`")))?;
        let class = parts
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                Error::invalid_params(format!("missing component class name in `{s}`"))
            })?;
        Ok(ComponentSpec {
            name,
            kind,
            plugin: plugin.to_owned(),
            class: class.to_owned(),
        })
    }
}

/// One `--connect` argument: `UPSTREAM[.PORT]:DOWNSTREAM[.PORT]`.
///
/// Port patterns may end in `*` to match a name prefix; a missing pattern
/// matches any port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionRule {
    pub upstream_component: String,
    pub upstream_port: Option<String>,
    pub downstream_component: String,
    pub downstream_port: Option<String>,
}

fn split_endpoint(s: &str) -> Result<(String, Option<String>), Error> {
    let (component, port) = match s.split_once('.') {
        Some((component, port)) => (component, Some(port.to_owned())),
        None => (s, None),
    };
    if component.is_empty() {
        return Err(Error::invalid_params(format!(
            "missing component name in connection endpoint `{s}`"
        )));
    }
    Ok((component.to_owned(), port))
}

impl FromStr for ConnectionRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (upstream, downstream) = s.split_once(':').ok_or_else(|| {
            Error::invalid_params(format!(
                "invalid connection `{s}` (expected UPSTREAM[.PORT]:DOWNSTREAM[.PORT])"
            ))
        })?;
        let (upstream_component, upstream_port) = split_endpoint(upstream)?;
        let (downstream_component, downstream_port) = split_endpoint(downstream)?;
        Ok(ConnectionRule {
            upstream_component,
            upstream_port,
            downstream_component,
            downstream_port,
        })
    }
}

/// Matches a connection-rule port pattern against a port name.
pub fn port_pattern_matches(pattern: Option<&str>, name: &str) -> bool {
    match pattern {
        None => true,
        Some(pattern) => match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => pattern == name,
        },
    }
}

/// Parses `KEY=VALUE[,KEY=VALUE...]` into a map value.
///
/// Values: `null`, booleans, signed/unsigned integers, reals, double-quoted
/// strings (commas allowed inside), and bare strings.
pub fn parse_params(s: &str) -> Result<Value, Error> {
    let mut map = Value::map();
    for entry in split_top_level(s)? {
        if entry.trim().is_empty() {
            continue;
        }
        let (key, raw_value) = entry.split_once('=').ok_or_else(|| {
            Error::invalid_params(format!("missing `=` in parameter `{entry}`"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::invalid_params(format!(
                "missing key in parameter `{entry}`"
            )));
        }
        map.insert(key.to_owned(), parse_param_value(raw_value.trim())?);
    }
    Ok(Value::Map(map))
}

/// Splits on top-level commas, leaving double-quoted sections intact.
fn split_top_level(s: &str) -> Result<Vec<String>, Error> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                entries.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err(Error::invalid_params(format!(
            "unterminated string in parameters `{s}`"
        )));
    }
    entries.push(current);
    Ok(entries)
}

fn parse_param_value(s: &str) -> Result<Value, Error> {
    if s == "null" {
        return Ok(Value::Null);
    }
    if s == "true" {
        return Ok(Value::Bool(true));
    }
    if s == "false" {
        return Ok(Value::Bool(false));
    }
    if let Some(stripped) = s.strip_prefix('"') {
        let inner = stripped.strip_suffix('"').ok_or_else(|| {
            Error::invalid_params(format!("unterminated string value `{s}`"))
        })?;
        return Ok(Value::String(inner.replace("\\\"", "\"").replace("\\\\", "\\")));
    }
    if let Ok(v) = s.parse::<i64>() {
        return Ok(Value::SignedInteger(v));
    }
    if let Ok(v) = s.parse::<u64>() {
        return Ok(Value::UnsignedInteger(v));
    }
    if let Ok(v) = s.parse::<f64>() {
        return Ok(Value::Real(v));
    }
    if s.is_empty() {
        return Err(Error::invalid_params("empty parameter value"));
    }
    Ok(Value::String(s.to_owned()))
}
