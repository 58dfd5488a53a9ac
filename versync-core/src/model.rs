use std::{
    collections::{btree_map, BTreeMap},
    fmt::Display,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{error::CoreError, value::Setting};

/// Opaque identifier of a remote service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);
impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        ServiceId(id.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A service configuration version. Numbers increase monotonically per
/// service; an activated version is never modified again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionNumber(pub u32);
impl Display for VersionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two flavours of service. Some kinds and fields only exist for one of
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceVariant {
    Vcl,
    Compute,
}
impl Display for ServiceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceVariant::Vcl => write!(f, "vcl"),
            ServiceVariant::Compute => write!(f, "compute"),
        }
    }
}

/// A category of sub-resource, reconciled as an independent named set.
///
/// The declaration order is the default application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Condition,
    Healthcheck,
    Backend,
    RequestSetting,
    LoggingCloudfiles,
    AclEntry,
}
impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::Condition,
        Kind::Healthcheck,
        Kind::Backend,
        Kind::RequestSetting,
        Kind::LoggingCloudfiles,
        Kind::AclEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Condition => "condition",
            Kind::Healthcheck => "healthcheck",
            Kind::Backend => "backend",
            Kind::RequestSetting => "request_setting",
            Kind::LoggingCloudfiles => "logging_cloudfiles",
            Kind::AclEntry => "acl_entry",
        }
    }
}
impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for Kind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown kind: {}", s))
    }
}

static UNSET: Setting = Setting::Unset;

/// One named instance within a kind.
///
/// `name` is the value of the kind's key field. `id` is only populated for
/// kinds whose remote identity is an opaque id assigned on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Setting>,
}
impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            id: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, setting: Setting) -> Self {
        self.fields.insert(field.to_string(), setting);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The setting of a field. Fields that are not present are [`Setting::Unset`].
    pub fn setting(&self, field: &str) -> &Setting {
        self.fields.get(field).unwrap_or(&UNSET)
    }
}

/// A name-keyed set of elements of one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementSet(BTreeMap<String, Element>);
impl ElementSet {
    pub const fn new() -> Self {
        ElementSet(BTreeMap::new())
    }

    /// Build a set, rejecting elements that share a name.
    pub fn from_elements(
        kind: Kind,
        elements: impl IntoIterator<Item = Element>,
    ) -> Result<Self, CoreError> {
        let mut set = ElementSet::new();
        for element in elements {
            if set.0.contains_key(&element.name) {
                return Err(CoreError::DuplicateName {
                    kind,
                    name: element.name,
                });
            }
            set.0.insert(element.name.clone(), element);
        }
        Ok(set)
    }

    /// Insert or replace the element with the same name, returning the
    /// replaced element.
    pub fn insert(&mut self, element: Element) -> Option<Element> {
        self.0.insert(element.name.clone(), element)
    }

    pub fn remove(&mut self, name: &str) -> Option<Element> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Element> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, Element> {
        self.0.values()
    }

    pub fn names(&self) -> btree_map::Keys<'_, String, Element> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl IntoIterator for ElementSet {
    type Item = Element;
    type IntoIter = btree_map::IntoValues<String, Element>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), kind);
        }
        assert!("domain".parse::<Kind>().is_err());
    }

    #[test]
    fn kind_serializes_as_map_key() {
        let mut m = BTreeMap::new();
        m.insert(Kind::LoggingCloudfiles, 1);
        let s = serde_json::to_string(&m).unwrap();
        assert_eq!(s, r#"{"logging_cloudfiles":1}"#);
    }

    #[test]
    fn element_set_rejects_duplicate_names() {
        let r = ElementSet::from_elements(
            Kind::Backend,
            vec![Element::new("a"), Element::new("b"), Element::new("a")],
        );
        match r {
            Err(CoreError::DuplicateName { kind, name }) => {
                assert_eq!(kind, Kind::Backend);
                assert_eq!(name, "a");
            }
            other => panic!("expected DuplicateName, got {:?}", other),
        }
    }

    #[test]
    fn missing_fields_read_as_unset() {
        let e = Element::new("h").with("timeout", Setting::int(5000));
        assert_eq!(e.setting("timeout"), &Setting::int(5000));
        assert_eq!(e.setting("window"), &Setting::Unset);
    }
}
