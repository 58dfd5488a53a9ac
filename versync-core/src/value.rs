use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed field value.
///
/// Enumerated fields are stored as [`FieldValue::Str`] and checked against
/// their [`FieldType::Enum`] variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}
impl FieldValue {
    pub fn str(s: impl Into<String>) -> Self {
        FieldValue::Str(s.into())
    }

    pub fn list<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Self {
        FieldValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Whether this is the zero value of its type, i.e. what the remote
    /// service reports for a field nobody has set.
    pub fn is_zero(&self) -> bool {
        match self {
            FieldValue::Bool(b) => !b,
            FieldValue::Int(i) => *i == 0,
            FieldValue::Str(s) => s.is_empty(),
            FieldValue::List(l) => l.is_empty(),
        }
    }

    pub fn is_empty_string(&self) -> bool {
        matches!(self, FieldValue::Str(s) if s.is_empty())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Str(_) => "string",
            FieldValue::List(_) => "list",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::List(l) => Value::Array(l.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Interpret a JSON value as the given field type.
    ///
    /// Integers that arrive as decimal strings are accepted, as the remote API
    /// is not consistent about this. Returns `None` when the JSON value does
    /// not fit the type at all.
    pub fn from_json(ty: &FieldType, value: &Value) -> Option<FieldValue> {
        match (ty, value) {
            (FieldType::Bool, Value::Bool(b)) => Some(FieldValue::Bool(*b)),
            (FieldType::Int, Value::Number(n)) => n.as_i64().map(FieldValue::Int),
            (FieldType::Int, Value::String(s)) => s.parse().ok().map(FieldValue::Int),
            (FieldType::String | FieldType::Enum(_), Value::String(s)) => {
                Some(FieldValue::Str(s.clone()))
            }
            (FieldType::StringList, Value::Array(items)) => items
                .iter()
                .map(|i| i.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::List),
            _ => None,
        }
    }
}
impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Str(s) => write!(f, "{:?}", s),
            FieldValue::List(l) => write!(f, "{:?}", l),
        }
    }
}
impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}
impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}
impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}
impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// The semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Bool,
    /// A string restricted to the listed variants. The empty string is
    /// always admitted; it is how "no choice" is written.
    Enum(&'static [&'static str]),
    /// An ordered list of strings, compared element by element.
    StringList,
}
impl FieldType {
    pub fn admits(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (FieldType::String, FieldValue::Str(_)) => true,
            (FieldType::Int, FieldValue::Int(_)) => true,
            (FieldType::Bool, FieldValue::Bool(_)) => true,
            (FieldType::Enum(variants), FieldValue::Str(s)) => {
                s.is_empty() || variants.contains(&s.as_str())
            }
            (FieldType::StringList, FieldValue::List(_)) => true,
            _ => false,
        }
    }

    pub fn zero(&self) -> FieldValue {
        match self {
            FieldType::String | FieldType::Enum(_) => FieldValue::Str(String::new()),
            FieldType::Int => FieldValue::Int(0),
            FieldType::Bool => FieldValue::Bool(false),
            FieldType::StringList => FieldValue::List(Vec::new()),
        }
    }
}
impl Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Int => write!(f, "int"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::Enum(variants) => write!(f, "one of [{}]", variants.join(", ")),
            FieldType::StringList => write!(f, "list of strings"),
        }
    }
}

/// Tri-state field setting.
///
/// The remote API cannot tell "send the zero value" from "omit the field", so
/// whether a user configured a field is tracked explicitly instead of being
/// encoded as a sentinel value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "snake_case")]
pub enum Setting {
    /// Never configured. Not sent, and not compared against the remote value.
    #[default]
    Unset,
    /// The field's declared default.
    Default,
    Value(FieldValue),
}
impl Setting {
    pub fn str(s: impl Into<String>) -> Self {
        Setting::Value(FieldValue::Str(s.into()))
    }

    pub fn int(i: i64) -> Self {
        Setting::Value(FieldValue::Int(i))
    }

    pub fn bool(b: bool) -> Self {
        Setting::Value(FieldValue::Bool(b))
    }

    pub fn list<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Self {
        Setting::Value(FieldValue::list(items))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    pub fn explicit_value(&self) -> Option<&FieldValue> {
        match self {
            Setting::Value(v) => Some(v),
            _ => None,
        }
    }
}
impl From<FieldValue> for Setting {
    fn from(v: FieldValue) -> Self {
        Setting::Value(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zero_values() {
        assert!(FieldValue::Int(0).is_zero());
        assert!(!FieldValue::Int(-1).is_zero());
        assert!(FieldValue::str("").is_zero());
        assert!(FieldValue::Bool(false).is_zero());
        assert!(!FieldValue::list(["a"]).is_zero());
        assert_eq!(FieldType::Int.zero(), FieldValue::Int(0));
    }

    #[test]
    fn enum_admits_empty_and_listed_variants() {
        let ty = FieldType::Enum(&["zstd", "snappy", "gzip"]);
        assert!(ty.admits(&FieldValue::str("gzip")));
        assert!(ty.admits(&FieldValue::str("")));
        assert!(!ty.admits(&FieldValue::str("brotli")));
        assert!(!ty.admits(&FieldValue::Int(1)));
    }

    #[test]
    fn from_json_accepts_numeric_strings_for_ints() {
        assert_eq!(
            FieldValue::from_json(&FieldType::Int, &json!("24")),
            Some(FieldValue::Int(24))
        );
        assert_eq!(
            FieldValue::from_json(&FieldType::Int, &json!(5000)),
            Some(FieldValue::Int(5000))
        );
        assert_eq!(FieldValue::from_json(&FieldType::Int, &json!(true)), None);
        assert_eq!(
            FieldValue::from_json(&FieldType::StringList, &json!(["Foo: Bar", 3])),
            None
        );
    }

    #[test]
    fn setting_serialization_is_tagged() {
        let s = serde_json::to_value(Setting::int(9000)).unwrap();
        assert_eq!(s, json!({"setting": "value", "value": 9000}));
        let u = serde_json::to_value(Setting::Unset).unwrap();
        assert_eq!(u, json!({"setting": "unset"}));
        let back: Setting = serde_json::from_value(s).unwrap();
        assert_eq!(back, Setting::int(9000));
    }
}
