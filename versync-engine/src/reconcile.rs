use tracing::{debug, info};
use versync_core::{
    Changeset, ChangesetSummary, Element, ElementSet, ElementUpdate, ServiceId, ServiceVariant,
    VersionNumber,
};
use versync_remote::{
    retry::retry_write, ElementApi, RemoteError, RetryPolicy, WirePayload,
};

use crate::{
    error::ReconcileError,
    handler::{AttributeHandler, Identity},
};

/// Diffs and applies the element set of one kind.
pub struct SetReconciler<'a> {
    pub handler: &'a AttributeHandler,
    pub service: &'a ServiceId,
    pub variant: ServiceVariant,
}

impl<'a> SetReconciler<'a> {
    pub fn new(
        handler: &'a AttributeHandler,
        service: &'a ServiceId,
        variant: ServiceVariant,
    ) -> Self {
        SetReconciler {
            handler,
            service,
            variant,
        }
    }

    /// Compute what it takes to turn `observed` into `desired`.
    ///
    /// Elements are matched by name. An element whose fields all match is
    /// left out entirely. For kinds with remote identities, a desired element
    /// that names a different id than the observed element of the same name
    /// is a [`ReconcileError::ConflictingIdentity`].
    pub fn diff(
        &self,
        desired: &ElementSet,
        observed: &ElementSet,
    ) -> Result<Changeset, ReconcileError> {
        let kind = self.handler.kind;
        let mut changeset = Changeset::new(kind);

        for d in desired.iter() {
            self.handler
                .check(d)
                .map_err(|e| ReconcileError::from_core(self.service, e))?;
            match observed.get(&d.name) {
                None => changeset.create.push(d.clone()),
                Some(o) => {
                    self.check_identity(d, o)?;
                    let changed = self.handler.changed_fields(self.variant, d, o);
                    if !changed.is_empty() {
                        changeset.update.insert(
                            d.name.clone(),
                            ElementUpdate {
                                desired: d.clone(),
                                id: o.id.clone(),
                                changed,
                            },
                        );
                    }
                }
            }
        }

        for o in observed.iter() {
            if !desired.contains(&o.name) {
                changeset.delete.push(o.clone());
            }
        }

        Ok(changeset)
    }

    fn check_identity(&self, desired: &Element, observed: &Element) -> Result<(), ReconcileError> {
        if self.handler.identity != Identity::RemoteId {
            return Ok(());
        }
        match (&desired.id, &observed.id) {
            (Some(expected), Some(found)) if expected != found => {
                Err(ReconcileError::ConflictingIdentity {
                    service: self.service.clone(),
                    kind: self.handler.kind,
                    name: desired.name.clone(),
                    expected: expected.clone(),
                    found: found.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Build every payload of `changeset` without sending anything, so that
    /// model violations surface before a version is cloned.
    pub fn check_payloads(&self, changeset: &Changeset) -> Result<(), ReconcileError> {
        let core = |e| ReconcileError::from_core(self.service, e);
        for e in &changeset.create {
            self.handler.create_payload(self.variant, e).map_err(core)?;
        }
        for u in changeset.update.values() {
            self.handler
                .update_payload(self.variant, &u.desired, &u.changed)
                .map_err(core)?;
        }
        Ok(())
    }

    /// Apply `changeset` to `version`: creates, then updates, then deletes.
    ///
    /// The first failing element stops the kind; nothing already applied is
    /// undone. A delete of an element that is already gone counts as done.
    pub async fn apply<R: ElementApi + ?Sized>(
        &self,
        remote: &R,
        version: VersionNumber,
        changeset: &Changeset,
        retry: &RetryPolicy,
    ) -> Result<ChangesetSummary, ReconcileError> {
        let kind = self.handler.kind;
        let service = self.service;
        let failed = |element: &str, e: RemoteError| {
            ReconcileError::from_element_write(service, version, kind, element, e)
        };
        let mut done = ChangesetSummary::default();

        for element in &changeset.create {
            let payload = self
                .handler
                .create_payload(self.variant, element)
                .map_err(|e| ReconcileError::from_core(service, e))?;
            self.log_payload("Creating", &element.name, &payload);
            retry_write(retry, "create", move || {
                remote.create(service, version, kind, payload.clone())
            })
            .await
            .map_err(|e| failed(&element.name, e))?;
            done.create += 1;
        }

        for (name, update) in &changeset.update {
            let payload = self
                .handler
                .update_payload(self.variant, &update.desired, &update.changed)
                .map_err(|e| ReconcileError::from_core(service, e))?;
            if payload.is_empty() {
                continue;
            }
            let mut target = update.desired.clone();
            target.id = update.id.clone();
            let key = self.handler.delete_key(&target);
            self.log_payload("Updating", name, &payload);
            let key = &key;
            retry_write(retry, "update", move || {
                remote.update(service, version, kind, key, payload.clone())
            })
            .await
            .map_err(|e| failed(name, e))?;
            done.update += 1;
        }

        for element in &changeset.delete {
            let key = self.handler.delete_key(element);
            info!("Deleting {} {}", kind, key);
            let key = &key;
            let r = retry_write(retry, "delete", move || {
                remote.delete(service, version, kind, key)
            })
            .await;
            match r {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("{} {} was already absent", kind, key);
                }
                Err(e) => return Err(failed(&element.name, e)),
            }
            done.delete += 1;
        }

        Ok(done)
    }

    fn log_payload(&self, action: &str, name: &str, payload: &WirePayload) {
        info!("{} {} {}", action, self.handler.kind, name);
        debug!(
            "payload: {}",
            serde_json::Value::Object(self.handler.redact(payload))
        );
    }
}
