use indexmap::IndexMap;

/// Insertion-ordered string-keyed mapping, so CLI output stays reproducible.
pub type ValueMap = IndexMap<String, Value>;

/// A dynamically-typed configuration value.
///
/// Component parameters, query parameters, and query results are all value
/// trees. Equality is structural.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    UnsignedInteger(u64),
    SignedInteger(i64),
    Real(f64),
    String(String),
    Array(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    pub fn map() -> ValueMap {
        ValueMap::new()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::UnsignedInteger(_) => "unsigned integer",
            Value::SignedInteger(_) => "signed integer",
            Value::Real(_) => "real",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_unsigned_integer(&self) -> Option<u64> {
        match self {
            Value::UnsignedInteger(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_signed_integer(&self) -> Option<i64> {
        match self {
            Value::SignedInteger(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Map-entry lookup; `None` for non-maps and missing keys alike.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Renders the tree with two-space indentation for terminal output.
    pub fn to_pretty_string(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        match self {
            Value::Array(items) if !items.is_empty() => {
                for item in items {
                    out.push_str(&pad);
                    out.push_str("- ");
                    match item {
                        Value::Array(_) | Value::Map(_) => {
                            out.push('\n');
                            item.render(out, indent + 1);
                        }
                        _ => {
                            out.push_str(&item.to_string());
                            out.push('\n');
                        }
                    }
                }
            }
            Value::Map(entries) if !entries.is_empty() => {
                for (key, value) in entries {
                    out.push_str(&pad);
                    out.push_str(key);
                    out.push(':');
                    match value {
                        Value::Array(a) if !a.is_empty() => {
                            out.push('\n');
                            value.render(out, indent + 1);
                        }
                        Value::Map(m) if !m.is_empty() => {
                            out.push('\n');
                            value.render(out, indent + 1);
                        }
                        _ => {
                            out.push(' ');
                            out.push_str(&value.to_string());
                            out.push('\n');
                        }
                    }
                }
            }
            _ => {
                out.push_str(&pad);
                out.push_str(&self.to_string());
                out.push('\n');
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::UnsignedInteger(v) => write!(f, "{v}"),
            Value::SignedInteger(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UnsignedInteger(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::SignedInteger(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<ValueMap> for Value {
    fn from(v: ValueMap) -> Self {
        Value::Map(v)
    }
}
