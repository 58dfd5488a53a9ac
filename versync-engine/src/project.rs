use tracing::trace;
use versync_core::{Element, ElementSet, ServiceId, ServiceVariant, VersionNumber};
use versync_remote::WireElement;

use crate::{
    error::ReconcileError,
    handler::{AttributeHandler, Identity},
};

/// Turns a `List` response of one kind back into an [`ElementSet`] that can
/// be diffed against desired state.
pub struct StateProjector<'a> {
    pub handler: &'a AttributeHandler,
    pub service: &'a ServiceId,
    pub variant: ServiceVariant,
    pub version: Option<VersionNumber>,
}

impl<'a> StateProjector<'a> {
    pub fn new(
        handler: &'a AttributeHandler,
        service: &'a ServiceId,
        variant: ServiceVariant,
        version: Option<VersionNumber>,
    ) -> Self {
        StateProjector {
            handler,
            service,
            variant,
            version,
        }
    }

    /// Project every wire element, then restore sticky fields.
    ///
    /// A sticky field whose remote value is its type's zero reads back as
    /// [`versync_core::Setting::Unset`] unless `prior` explicitly set it. An element that
    /// `prior` does not mention counts as leaving it unset.
    pub fn project(
        &self,
        wire: &[WireElement],
        prior: Option<&ElementSet>,
    ) -> Result<ElementSet, ReconcileError> {
        let kind = self.handler.kind;
        let mut set = ElementSet::new();
        for w in wire {
            let mut element = self.handler.project_wire(self.variant, w).map_err(|source| {
                ReconcileError::RefreshFailed {
                    service: self.service.clone(),
                    version: self.version,
                    kind: Some(kind),
                    source,
                }
            })?;
            let prior_element = prior.and_then(|p| p.get(&element.name));
            self.restore_sticky(&mut element, prior_element);
            if let Some(existing) = set.get(&element.name) {
                return Err(self.duplicate(existing, &element));
            }
            set.insert(element);
        }
        trace!("projected {} {} elements", set.len(), kind);
        Ok(set)
    }

    fn restore_sticky(&self, element: &mut Element, prior: Option<&Element>) {
        for spec in self.handler.fields_for(self.variant).filter(|f| f.sticky_unset) {
            let is_zero = element
                .setting(spec.name)
                .explicit_value()
                .is_some_and(|v| v.is_zero());
            let prior_unset = prior.map_or(true, |p| p.setting(spec.name).is_unset());
            if is_zero && prior_unset {
                element.fields.remove(spec.name);
            }
        }
    }

    fn duplicate(&self, existing: &Element, found: &Element) -> ReconcileError {
        match (self.handler.identity, &existing.id, &found.id) {
            (Identity::RemoteId, Some(expected), Some(other)) => {
                ReconcileError::ConflictingIdentity {
                    service: self.service.clone(),
                    kind: self.handler.kind,
                    name: found.name.clone(),
                    expected: expected.clone(),
                    found: other.clone(),
                }
            }
            _ => ReconcileError::DuplicateName {
                service: self.service.clone(),
                kind: self.handler.kind,
                name: found.name.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use versync_core::{Kind, Setting};
    use versync_remote::WirePayload;

    use super::*;
    use crate::handler::HandlerRegistry;

    fn wire(v: Value) -> WireElement {
        match v {
            Value::Object(m) => WireElement(m),
            _ => panic!("not an object"),
        }
    }

    fn logging_wire(gzip_level: i64) -> WireElement {
        wire(json!({
            "name": "cf",
            "access_key": "AK",
            "bucket_name": "logs",
            "user": "u",
            "compression_codec": "zstd",
            "gzip_level": gzip_level,
            "message_type": "classic",
            "path": "",
        }))
    }

    #[test]
    fn sticky_zero_reads_back_unset() {
        let registry = HandlerRegistry::standard();
        let service = ServiceId::new("svc");
        let p = StateProjector::new(
            registry.get(Kind::LoggingCloudfiles).unwrap(),
            &service,
            ServiceVariant::Vcl,
            Some(VersionNumber(2)),
        );
        let set = p.project(&[logging_wire(0)], None).unwrap();
        let e = set.get("cf").unwrap();
        assert_eq!(e.setting("gzip_level"), &Setting::Unset);
        assert_eq!(e.setting("path"), &Setting::Unset);
        assert_eq!(e.setting("compression_codec"), &Setting::str("zstd"));
    }

    #[test]
    fn sticky_zero_is_kept_when_prior_set_it() {
        let registry = HandlerRegistry::standard();
        let service = ServiceId::new("svc");
        let p = StateProjector::new(
            registry.get(Kind::LoggingCloudfiles).unwrap(),
            &service,
            ServiceVariant::Vcl,
            None,
        );
        let prior = ElementSet::from_elements(
            Kind::LoggingCloudfiles,
            vec![Element::new("cf").with("gzip_level", Setting::int(0))],
        )
        .unwrap();
        let set = p.project(&[logging_wire(0)], Some(&prior)).unwrap();
        assert_eq!(set.get("cf").unwrap().setting("gzip_level"), &Setting::int(0));

        let set = p.project(&[logging_wire(6)], None).unwrap();
        assert_eq!(set.get("cf").unwrap().setting("gzip_level"), &Setting::int(6));
    }

    #[test]
    fn duplicate_acl_ips_are_identity_conflicts() {
        let registry = HandlerRegistry::standard();
        let service = ServiceId::new("svc");
        let p = StateProjector::new(
            registry.get(Kind::AclEntry).unwrap(),
            &service,
            ServiceVariant::Vcl,
            None,
        );
        let err = p
            .project(
                &[
                    wire(json!({"ip": "10.0.0.1", "id": "a1"})),
                    wire(json!({"ip": "10.0.0.1", "id": "b2"})),
                ],
                None,
            )
            .unwrap_err();
        match err {
            ReconcileError::ConflictingIdentity { expected, found, .. } => {
                assert_eq!(expected, "a1");
                assert_eq!(found, "b2");
            }
            other => panic!("expected ConflictingIdentity, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_names_and_bad_values_fail_the_refresh() {
        let registry = HandlerRegistry::standard();
        let service = ServiceId::new("svc");
        let p = StateProjector::new(
            registry.get(Kind::Condition).unwrap(),
            &service,
            ServiceVariant::Vcl,
            Some(VersionNumber(3)),
        );
        let err = p
            .project(&[wire(json!({"name": "c"})), wire(json!({"name": "c"}))], None)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateName { .. }));

        let err = p
            .project(&[wire(json!({"name": "c", "priority": "high"}))], None)
            .unwrap_err();
        match err {
            ReconcileError::RefreshFailed { version, kind, .. } => {
                assert_eq!(version, Some(VersionNumber(3)));
                assert_eq!(kind, Some(Kind::Condition));
            }
            other => panic!("expected RefreshFailed, got {:?}", other),
        }
    }

    #[test]
    fn create_then_project_is_a_fixed_point() {
        let registry = HandlerRegistry::standard();
        let service = ServiceId::new("svc");
        let h = registry.get(Kind::Backend).unwrap();
        let desired = Element::new("origin")
            .with("address", Setting::str("origin.example.com"))
            .with("port", Setting::int(443))
            .with("override_host", Setting::str(""));
        let payload: WirePayload = h.create_payload(ServiceVariant::Vcl, &desired).unwrap();
        let p = StateProjector::new(h, &service, ServiceVariant::Vcl, None);
        let observed = p.project(&[WireElement(payload)], None).unwrap();
        let again = p
            .project(
                &[WireElement(
                    h.create_payload(ServiceVariant::Vcl, observed.get("origin").unwrap())
                        .unwrap(),
                )],
                None,
            )
            .unwrap();
        assert_eq!(observed, again);
        assert!(h
            .changed_fields(ServiceVariant::Vcl, &desired, observed.get("origin").unwrap())
            .is_empty());
    }
}
