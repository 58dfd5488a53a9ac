use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ElementSet, Kind, ServiceId, ServiceVariant, VersionNumber};

static EMPTY: ElementSet = ElementSet::new();

/// What the caller wants the service to look like, per kind.
///
/// A kind that is absent is not managed: its remote elements are left alone.
/// A kind that is present with an empty set means "delete everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub kinds: BTreeMap<Kind, ElementSet>,
}
impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: Kind, elements: ElementSet) -> &mut Self {
        self.kinds.insert(kind, elements);
        self
    }

    pub fn with(mut self, kind: Kind, elements: ElementSet) -> Self {
        self.kinds.insert(kind, elements);
        self
    }

    pub fn manages(&self, kind: Kind) -> bool {
        self.kinds.contains_key(&kind)
    }

    pub fn elements(&self, kind: Kind) -> &ElementSet {
        self.kinds.get(&kind).unwrap_or(&EMPTY)
    }

    pub fn managed_kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        self.kinds.keys().copied()
    }
}

/// What was last read from the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub service: ServiceId,
    pub variant: ServiceVariant,
    /// The version the elements were read from. `None` for a service that
    /// has never been read.
    #[serde(default)]
    pub version: Option<VersionNumber>,
    #[serde(default)]
    pub kinds: BTreeMap<Kind, ElementSet>,
}
impl ObservedState {
    pub fn empty(service: ServiceId, variant: ServiceVariant) -> Self {
        ObservedState {
            service,
            variant,
            version: None,
            kinds: BTreeMap::new(),
        }
    }

    pub fn elements(&self, kind: Kind) -> &ElementSet {
        self.kinds.get(&kind).unwrap_or(&EMPTY)
    }

    pub fn set(&mut self, kind: Kind, elements: ElementSet) {
        self.kinds.insert(kind, elements);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::Element, value::Setting};

    #[test]
    fn unmanaged_kinds_read_as_empty() {
        let desired = DesiredState::new().with(
            Kind::Backend,
            ElementSet::from_elements(Kind::Backend, vec![Element::new("a")]).unwrap(),
        );
        assert!(desired.manages(Kind::Backend));
        assert!(!desired.manages(Kind::Healthcheck));
        assert!(desired.elements(Kind::Healthcheck).is_empty());
        assert_eq!(desired.elements(Kind::Backend).len(), 1);
    }

    #[test]
    fn observed_state_json() {
        let mut observed = ObservedState::empty(ServiceId::new("svc"), ServiceVariant::Vcl);
        observed.version = Some(VersionNumber(3));
        observed.set(
            Kind::Healthcheck,
            ElementSet::from_elements(
                Kind::Healthcheck,
                vec![Element::new("h").with("timeout", Setting::int(5000))],
            )
            .unwrap(),
        );
        let json = serde_json::to_value(&observed).unwrap();
        assert_eq!(json["service"], "svc");
        assert_eq!(json["version"], 3);
        assert_eq!(
            json["kinds"]["healthcheck"]["h"]["fields"]["timeout"]["value"],
            5000
        );
        let back: ObservedState = serde_json::from_value(json).unwrap();
        assert_eq!(back, observed);
    }
}
