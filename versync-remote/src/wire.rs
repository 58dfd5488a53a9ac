use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name under which remote-assigned identities are reported.
pub const ID_FIELD: &str = "id";

/// Body of a create or update request: wire field names to JSON values.
pub type WirePayload = serde_json::Map<String, Value>;

/// One element as reported by a `List` call or returned from a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireElement(pub WirePayload);
impl WireElement {
    pub fn new(fields: WirePayload) -> Self {
        WireElement(fields)
    }

    pub fn get(&self, wire: &str) -> Option<&Value> {
        self.0.get(wire)
    }

    pub fn get_str(&self, wire: &str) -> Option<&str> {
        self.0.get(wire).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_FIELD)
    }

    pub fn fields(&self) -> &WirePayload {
        &self.0
    }
}
impl From<WirePayload> for WireElement {
    fn from(fields: WirePayload) -> Self {
        WireElement(fields)
    }
}

/// Addresses an existing element in update and delete calls.
///
/// Kinds with a remote-assigned identity are addressed by `id`; all others by
/// `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementKey {
    pub name: String,
    pub id: Option<String>,
}
impl ElementKey {
    pub fn name(name: impl Into<String>) -> Self {
        ElementKey {
            name: name.into(),
            id: None,
        }
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        ElementKey {
            name: name.into(),
            id: Some(id.into()),
        }
    }
}
impl Display for ElementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} (id {})", self.name, id),
            None => f.write_str(&self.name),
        }
    }
}
