//! An in-process emulator of the versioned remote service.
//!
//! It keeps the rules the engine relies on: activated versions are never
//! modified, element keys are unique per kind and version, clones copy every
//! element, and only one actor at a time may hold the edit lock. Failures can
//! be injected per operation so partial application, lost responses and lock
//! contention can be exercised deterministically.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::Display,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;
use versync_core::{Kind, ServiceId, ServiceVariant, VersionNumber};

use crate::{
    api::{ElementApi, ServiceInfo, Validation, VersionApi},
    error::RemoteError,
    wire::{ElementKey, WireElement, WirePayload, ID_FIELD},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Service,
    List,
    Create,
    Update,
    Delete,
    Clone,
    Validate,
    Activate,
}
impl Operation {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Create
                | Operation::Update
                | Operation::Delete
                | Operation::Clone
                | Operation::Activate
        )
    }
}
impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Service => "service",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Clone => "clone",
            Operation::Validate => "validate",
            Operation::Activate => "activate",
        };
        f.write_str(s)
    }
}

/// One call received by the emulator, including calls that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Operation,
    pub service: ServiceId,
    pub version: Option<VersionNumber>,
    pub kind: Option<Kind>,
    /// Name or id of the addressed element.
    pub target: Option<String>,
    pub payload: Option<WirePayload>,
}

/// How the service keys elements of a kind. Kinds without an entry are
/// keyed by `name` and get no id.
#[derive(Debug, Clone)]
struct Keying {
    field: String,
    assigns_id: bool,
}
impl Default for Keying {
    fn default() -> Self {
        Keying {
            field: "name".to_string(),
            assigns_id: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub active: bool,
    /// Activated versions are locked and can no longer be edited.
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub elements: BTreeMap<Kind, Vec<WireElement>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub variant: ServiceVariant,
    pub versions: BTreeMap<VersionNumber, VersionRecord>,
    #[serde(default)]
    pub next_id: u64,
}
impl ServiceRecord {
    fn active_version(&self) -> Option<VersionNumber> {
        self.versions
            .iter()
            .find(|(_, v)| v.active)
            .map(|(n, _)| *n)
    }
}

/// Persistent part of the emulator: services, versions and elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    #[serde(default)]
    pub services: BTreeMap<ServiceId, ServiceRecord>,
}

struct Fault {
    op: Operation,
    kind: Option<Kind>,
    /// Matching calls that still pass before the fault fires.
    skip: u32,
    /// How many more times the fault fires.
    times: u32,
    error: RemoteError,
}
impl Fault {
    fn matches(&self, op: Operation, kind: Option<Kind>) -> bool {
        self.op == op && (self.kind.is_none() || self.kind == kind)
    }
}

struct Rule {
    kind: Kind,
    fields: Vec<String>,
    message: String,
}

#[derive(Default)]
struct Inner {
    snapshot: RemoteSnapshot,
    faults: VecDeque<Fault>,
    rules: Vec<Rule>,
    server_defaults: BTreeMap<Kind, WirePayload>,
    keying: BTreeMap<Kind, Keying>,
    locks: BTreeMap<ServiceId, u32>,
    problems: BTreeMap<ServiceId, Vec<String>>,
    calls: Vec<Call>,
}

/// Thread-safe emulator of the remote service. Implements [`ElementApi`] and
/// [`VersionApi`].
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RemoteSnapshot) -> Self {
        MemoryRemote {
            inner: Mutex::new(Inner {
                snapshot,
                ..Default::default()
            }),
        }
    }

    pub fn snapshot(&self) -> RemoteSnapshot {
        self.lock().snapshot.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a service whose version 1 is active and empty.
    pub fn add_service(&self, service: &ServiceId, variant: ServiceVariant) -> VersionNumber {
        let mut inner = self.lock();
        let mut versions = BTreeMap::new();
        versions.insert(
            VersionNumber(1),
            VersionRecord {
                active: true,
                locked: true,
                elements: BTreeMap::new(),
            },
        );
        inner.snapshot.services.insert(
            service.clone(),
            ServiceRecord {
                variant,
                versions,
                next_id: 1,
            },
        );
        VersionNumber(1)
    }

    /// Place an element directly into the active version, bypassing every
    /// check. For setting up out-of-band state.
    pub fn seed(&self, service: &ServiceId, kind: Kind, element: WireElement) {
        let mut inner = self.lock();
        if let Some(record) = inner.snapshot.services.get_mut(service) {
            if let Some(active) = record.active_version() {
                if let Some(v) = record.versions.get_mut(&active) {
                    v.elements.entry(kind).or_default().push(element);
                }
            }
        }
    }

    /// The elements of a kind in a version, in creation order.
    pub fn elements(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
    ) -> Vec<WireElement> {
        self.lock()
            .snapshot
            .services
            .get(service)
            .and_then(|s| s.versions.get(&version))
            .and_then(|v| v.elements.get(&kind))
            .cloned()
            .unwrap_or_default()
    }

    pub fn active_version(&self, service: &ServiceId) -> Option<VersionNumber> {
        self.lock()
            .snapshot
            .services
            .get(service)
            .and_then(ServiceRecord::active_version)
    }

    pub fn versions(&self, service: &ServiceId) -> Vec<VersionNumber> {
        self.lock()
            .snapshot
            .services
            .get(service)
            .map(|s| s.versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Fail the next matching call once with `error`.
    pub fn fail(&self, op: Operation, kind: Option<Kind>, error: RemoteError) {
        self.fail_after(op, kind, 0, error)
    }

    /// Let `passes` matching calls through, then fail the next one.
    pub fn fail_after(&self, op: Operation, kind: Option<Kind>, passes: u32, error: RemoteError) {
        self.lock().faults.push_back(Fault {
            op,
            kind,
            skip: passes,
            times: 1,
            error,
        });
    }

    /// Fail the next `times` matching calls.
    pub fn fail_times(&self, op: Operation, kind: Option<Kind>, times: u32, error: RemoteError) {
        self.lock().faults.push_back(Fault {
            op,
            kind,
            skip: 0,
            times,
            error,
        });
    }

    /// Report the service as locked by another actor for the next `polls`
    /// clone attempts.
    pub fn hold_lock(&self, service: &ServiceId, polls: u32) {
        self.lock().locks.insert(service.clone(), polls);
    }

    /// Reject create and update payloads of `kind` that carry all of
    /// `fields`.
    pub fn reject_together(&self, kind: Kind, fields: &[&str], message: impl Into<String>) {
        self.lock().rules.push(Rule {
            kind,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            message: message.into(),
        });
    }

    /// Values the service fills in for fields a create payload leaves out.
    pub fn set_server_defaults(&self, kind: Kind, defaults: WirePayload) {
        self.lock().server_defaults.insert(kind, defaults);
    }

    /// Key elements of `kind` by `field`. With `assigns_id`, created elements
    /// get an opaque id and are addressed by it.
    pub fn set_keying(&self, kind: Kind, field: impl Into<String>, assigns_id: bool) {
        self.lock().keying.insert(
            kind,
            Keying {
                field: field.into(),
                assigns_id,
            },
        );
    }

    /// Make validation of any version of `service` report `problems`.
    pub fn set_validation_problems(&self, service: &ServiceId, problems: Vec<String>) {
        self.lock().problems.insert(service.clone(), problems);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: Operation) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Number of calls that modify remote state.
    pub fn write_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.op.is_write()).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear()
    }
}

impl Inner {
    fn record(&mut self, call: Call) {
        trace!(
            "remote call: {} {} v{:?} {:?} {:?}",
            call.op,
            call.service,
            call.version,
            call.kind,
            call.target
        );
        self.calls.push(call);
    }

    /// The error of the first matching fault that is due, consuming it.
    fn take_fault(&mut self, op: Operation, kind: Option<Kind>) -> Option<RemoteError> {
        let mut fired = None;
        for (i, fault) in self.faults.iter_mut().enumerate() {
            if !fault.matches(op, kind) {
                continue;
            }
            if fault.skip > 0 {
                fault.skip -= 1;
                continue;
            }
            fault.times -= 1;
            fired = Some((i, fault.error.clone(), fault.times == 0));
            break;
        }
        let (i, error, exhausted) = fired?;
        if exhausted {
            self.faults.remove(i);
        }
        Some(error)
    }

    fn service(&self, service: &ServiceId) -> Result<&ServiceRecord, RemoteError> {
        self.snapshot
            .services
            .get(service)
            .ok_or_else(|| RemoteError::not_found(format!("service {}", service)))
    }

    fn version(
        &self,
        service: &ServiceId,
        version: VersionNumber,
    ) -> Result<&VersionRecord, RemoteError> {
        self.service(service)?
            .versions
            .get(&version)
            .ok_or_else(|| RemoteError::not_found(format!("version {} of {}", version, service)))
    }

    /// The editable version, and the service's id counter.
    fn editable(
        &mut self,
        service: &ServiceId,
        version: VersionNumber,
    ) -> Result<(&mut VersionRecord, &mut u64), RemoteError> {
        let record = self
            .snapshot
            .services
            .get_mut(service)
            .ok_or_else(|| RemoteError::not_found(format!("service {}", service)))?;
        let v = record
            .versions
            .get_mut(&version)
            .ok_or_else(|| RemoteError::not_found(format!("version {} of {}", version, service)))?;
        if v.locked {
            return Err(RemoteError::rejected(
                409,
                format!("version {} is locked and cannot be edited", version),
            ));
        }
        Ok((v, &mut record.next_id))
    }

    fn keying(&self, kind: Kind) -> Keying {
        self.keying.get(&kind).cloned().unwrap_or_default()
    }

    fn check_rules(&self, kind: Kind, payload: &WirePayload) -> Result<(), RemoteError> {
        for rule in self.rules.iter().filter(|r| r.kind == kind) {
            if rule.fields.iter().all(|f| payload.contains_key(f)) {
                return Err(RemoteError::rejected(400, rule.message.clone()));
            }
        }
        Ok(())
    }

    fn create(
        &mut self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        payload: WirePayload,
    ) -> Result<WireElement, RemoteError> {
        self.check_rules(kind, &payload)?;
        let keying = self.keying(kind);
        let key = keying.field.as_str();
        let name = payload
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::rejected(400, format!("missing {}", key)))?
            .to_string();
        let mut fields = self.server_defaults.get(&kind).cloned().unwrap_or_default();
        fields.extend(payload);
        let (v, next_id) = self.editable(service, version)?;
        let elements = v.elements.entry(kind).or_default();
        if elements.iter().any(|e| e.get_str(key) == Some(name.as_str())) {
            return Err(RemoteError::rejected(
                409,
                format!("duplicate {} {} '{}'", kind, key, name),
            ));
        }
        if keying.assigns_id {
            fields.insert(ID_FIELD.to_string(), Value::String(format!("{:x}", 0x1000 + *next_id)));
            *next_id += 1;
        }
        let element = WireElement(fields);
        elements.push(element.clone());
        Ok(element)
    }

    fn update(
        &mut self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        key: &ElementKey,
        payload: WirePayload,
    ) -> Result<WireElement, RemoteError> {
        self.check_rules(kind, &payload)?;
        let keying = self.keying(kind);
        let key_name = keying.field.as_str();
        let (v, _) = self.editable(service, version)?;
        let elements = v.elements.entry(kind).or_default();
        let index = find(elements, &keying, key)
            .ok_or_else(|| RemoteError::not_found(format!("{} {}", kind, key)))?;
        if let Some(new_name) = payload.get(key_name).and_then(Value::as_str) {
            let clash = elements
                .iter()
                .enumerate()
                .any(|(i, e)| i != index && e.get_str(key_name) == Some(new_name));
            if clash {
                return Err(RemoteError::rejected(
                    409,
                    format!("duplicate {} {} '{}'", kind, key_name, new_name),
                ));
            }
        }
        let element = &mut elements[index];
        element.0.extend(payload);
        Ok(element.clone())
    }

    fn delete(
        &mut self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        key: &ElementKey,
    ) -> Result<(), RemoteError> {
        let keying = self.keying(kind);
        let (v, _) = self.editable(service, version)?;
        let elements = v.elements.entry(kind).or_default();
        let index = find(elements, &keying, key)
            .ok_or_else(|| RemoteError::not_found(format!("{} {}", kind, key)))?;
        elements.remove(index);
        Ok(())
    }

    fn clone_version(
        &mut self,
        service: &ServiceId,
        source: VersionNumber,
    ) -> Result<VersionNumber, RemoteError> {
        let elements = self.version(service, source)?.elements.clone();
        let record = self
            .snapshot
            .services
            .get_mut(service)
            .ok_or_else(|| RemoteError::not_found(format!("service {}", service)))?;
        let next = record
            .versions
            .keys()
            .next_back()
            .map_or(VersionNumber(1), |v| VersionNumber(v.0 + 1));
        record.versions.insert(
            next,
            VersionRecord {
                active: false,
                locked: false,
                elements,
            },
        );
        Ok(next)
    }

    fn validation(&self, service: &ServiceId) -> Validation {
        let problems = self.problems.get(service).cloned().unwrap_or_default();
        Validation {
            ok: problems.is_empty(),
            problems,
        }
    }

    fn activate(&mut self, service: &ServiceId, version: VersionNumber) -> Result<(), RemoteError> {
        self.version(service, version)?;
        let validation = self.validation(service);
        if !validation.ok {
            return Err(RemoteError::rejected(
                400,
                format!("version {} is invalid: {}", version, validation.problems.join("; ")),
            ));
        }
        let record = self
            .snapshot
            .services
            .get_mut(service)
            .ok_or_else(|| RemoteError::not_found(format!("service {}", service)))?;
        for (n, v) in record.versions.iter_mut() {
            v.active = *n == version;
            if *n == version {
                v.locked = true;
            }
        }
        Ok(())
    }
}

fn find(elements: &[WireElement], keying: &Keying, key: &ElementKey) -> Option<usize> {
    match (&key.id, keying.assigns_id) {
        (Some(id), true) => elements.iter().position(|e| e.id() == Some(id.as_str())),
        _ => elements
            .iter()
            .position(|e| e.get_str(&keying.field) == Some(key.name.as_str())),
    }
}

/// Runs a call against the emulator: records it, fires any due fault, and
/// otherwise performs it. A fault of [`RemoteError::ResponseLost`] on a write
/// performs the write before reporting the error.
fn perform<T>(
    remote: &MemoryRemote,
    call: Call,
    f: impl FnOnce(&mut Inner) -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    let mut inner = remote.lock();
    let (op, kind) = (call.op, call.kind);
    inner.record(call);
    match inner.take_fault(op, kind) {
        Some(RemoteError::ResponseLost { message }) if op.is_write() => {
            // Side effects happen, the caller just does not learn of them.
            let _ = f(&mut *inner);
            Err(RemoteError::ResponseLost { message })
        }
        Some(error) => Err(error),
        None => f(&mut *inner),
    }
}

#[async_trait]
impl ElementApi for MemoryRemote {
    async fn list(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
    ) -> Result<Vec<WireElement>, RemoteError> {
        let call = Call {
            op: Operation::List,
            service: service.clone(),
            version: Some(version),
            kind: Some(kind),
            target: None,
            payload: None,
        };
        perform(self, call, |inner| {
            Ok(inner
                .version(service, version)?
                .elements
                .get(&kind)
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn create(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        payload: WirePayload,
    ) -> Result<WireElement, RemoteError> {
        let key = self.lock().keying(kind).field;
        let call = Call {
            op: Operation::Create,
            service: service.clone(),
            version: Some(version),
            kind: Some(kind),
            target: payload
                .get(&key)
                .and_then(Value::as_str)
                .map(str::to_string),
            payload: Some(payload.clone()),
        };
        perform(self, call, |inner| inner.create(service, version, kind, payload))
    }

    async fn update(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        key: &ElementKey,
        payload: WirePayload,
    ) -> Result<WireElement, RemoteError> {
        let call = Call {
            op: Operation::Update,
            service: service.clone(),
            version: Some(version),
            kind: Some(kind),
            target: Some(key.name.clone()),
            payload: Some(payload.clone()),
        };
        perform(self, call, |inner| {
            inner.update(service, version, kind, key, payload)
        })
    }

    async fn delete(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        key: &ElementKey,
    ) -> Result<(), RemoteError> {
        let call = Call {
            op: Operation::Delete,
            service: service.clone(),
            version: Some(version),
            kind: Some(kind),
            target: Some(key.name.clone()),
            payload: None,
        };
        perform(self, call, |inner| inner.delete(service, version, kind, key))
    }
}

#[async_trait]
impl VersionApi for MemoryRemote {
    async fn service(&self, service: &ServiceId) -> Result<ServiceInfo, RemoteError> {
        let call = Call {
            op: Operation::Service,
            service: service.clone(),
            version: None,
            kind: None,
            target: None,
            payload: None,
        };
        perform(self, call, |inner| {
            let record = inner.service(service)?;
            let active_version = record.active_version().ok_or_else(|| {
                RemoteError::not_found(format!("active version of {}", service))
            })?;
            Ok(ServiceInfo {
                id: service.clone(),
                variant: record.variant,
                active_version,
            })
        })
    }

    async fn clone_version(
        &self,
        service: &ServiceId,
        source: VersionNumber,
    ) -> Result<VersionNumber, RemoteError> {
        let call = Call {
            op: Operation::Clone,
            service: service.clone(),
            version: Some(source),
            kind: None,
            target: None,
            payload: None,
        };
        perform(self, call, |inner| {
            if let Some(polls) = inner.locks.get_mut(service) {
                if *polls > 0 {
                    *polls -= 1;
                    return Err(RemoteError::Locked {
                        service: service.clone(),
                        version: source,
                    });
                }
            }
            inner.clone_version(service, source)
        })
    }

    async fn validate(
        &self,
        service: &ServiceId,
        version: VersionNumber,
    ) -> Result<Validation, RemoteError> {
        let call = Call {
            op: Operation::Validate,
            service: service.clone(),
            version: Some(version),
            kind: None,
            target: None,
            payload: None,
        };
        perform(self, call, |inner| {
            inner.version(service, version)?;
            Ok(inner.validation(service))
        })
    }

    async fn activate(
        &self,
        service: &ServiceId,
        version: VersionNumber,
    ) -> Result<(), RemoteError> {
        let call = Call {
            op: Operation::Activate,
            service: service.clone(),
            version: Some(version),
            kind: None,
            target: None,
            payload: None,
        };
        perform(self, call, |inner| inner.activate(service, version))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(v: Value) -> WirePayload {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn svc() -> ServiceId {
        ServiceId::new("svc")
    }

    #[tokio::test]
    async fn clone_copies_elements_and_active_version_is_immutable() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        remote.seed(&svc(), Kind::Backend, WireElement(payload(json!({"name": "a"}))));

        let err = remote
            .create(&svc(), v1, Kind::Backend, payload(json!({"name": "b"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 409, .. }));

        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        assert_eq!(v2, VersionNumber(2));
        remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "b"})))
            .await
            .unwrap();
        assert_eq!(remote.elements(&svc(), v1, Kind::Backend).len(), 1);
        assert_eq!(remote.elements(&svc(), v2, Kind::Backend).len(), 2);
    }

    #[tokio::test]
    async fn names_are_unique_per_kind_and_version() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "a"})))
            .await
            .unwrap();
        let err = remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "a"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 409, .. }));
        remote
            .create(&svc(), v2, Kind::Healthcheck, payload(json!({"name": "a"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn acl_entries_get_ids_and_are_addressed_by_id() {
        let remote = MemoryRemote::new();
        remote.set_keying(Kind::AclEntry, "ip", true);
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        let created = remote
            .create(
                &svc(),
                v2,
                Kind::AclEntry,
                payload(json!({"ip": "10.0.0.1", "negated": false})),
            )
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();
        remote
            .update(
                &svc(),
                v2,
                Kind::AclEntry,
                &ElementKey::with_id("10.0.0.1", id.clone()),
                payload(json!({"negated": true})),
            )
            .await
            .unwrap();
        let listed = remote.list(&svc(), v2, Kind::AclEntry).await.unwrap();
        assert_eq!(listed[0].get("negated"), Some(&json!(true)));
        assert_eq!(listed[0].id(), Some(id.as_str()));

        let err = remote
            .delete(
                &svc(),
                v2,
                Kind::AclEntry,
                &ElementKey::with_id("10.0.0.1", "nope"),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn unkeyed_kinds_are_addressed_by_name() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        let created = remote
            .create(&svc(), v2, Kind::AclEntry, payload(json!({"name": "a", "ip": "10.0.0.1"})))
            .await
            .unwrap();
        assert_eq!(created.id(), None);
        remote
            .delete(&svc(), v2, Kind::AclEntry, &ElementKey::name("a"))
            .await
            .unwrap();
        assert!(remote.list(&svc(), v2, Kind::AclEntry).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lost_response_still_applies_write() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        remote.fail(
            Operation::Create,
            Some(Kind::Backend),
            RemoteError::response_lost("reset"),
        );
        let err = remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "a"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::ResponseLost { .. }));
        assert_eq!(remote.elements(&svc(), v2, Kind::Backend).len(), 1);
    }

    #[tokio::test]
    async fn transport_fault_does_not_apply_write() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        remote.fail_after(
            Operation::Create,
            None,
            1,
            RemoteError::transport("refused"),
        );
        remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "a"})))
            .await
            .unwrap();
        remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "b"})))
            .await
            .unwrap_err();
        remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "c"})))
            .await
            .unwrap();
        let names: Vec<_> = remote
            .elements(&svc(), v2, Kind::Backend)
            .iter()
            .map(|e| e.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(remote.calls_of(Operation::Create).len(), 3);
    }

    #[tokio::test]
    async fn rules_reject_field_combinations_and_defaults_fill_in() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        remote.reject_together(
            Kind::LoggingCloudfiles,
            &["compression_codec", "gzip_level"],
            "cannot set both compression_codec and gzip_level",
        );
        remote.set_server_defaults(Kind::LoggingCloudfiles, payload(json!({"gzip_level": 0})));

        let err = remote
            .create(
                &svc(),
                v2,
                Kind::LoggingCloudfiles,
                payload(json!({"name": "l", "compression_codec": "zstd", "gzip_level": 0})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 400, .. }));

        let created = remote
            .create(
                &svc(),
                v2,
                Kind::LoggingCloudfiles,
                payload(json!({"name": "l", "compression_codec": "zstd"})),
            )
            .await
            .unwrap();
        assert_eq!(created.get("gzip_level"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn lock_and_validation() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Compute);
        remote.hold_lock(&svc(), 1);
        assert!(remote.clone_version(&svc(), v1).await.unwrap_err().is_locked());
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();

        remote.set_validation_problems(&svc(), vec!["backend a unreachable".to_string()]);
        let validation = remote.validate(&svc(), v2).await.unwrap();
        assert!(!validation.ok);
        assert!(remote.activate(&svc(), v2).await.is_err());
        assert_eq!(remote.active_version(&svc()), Some(v1));

        remote.set_validation_problems(&svc(), vec![]);
        remote.activate(&svc(), v2).await.unwrap();
        assert_eq!(remote.active_version(&svc()), Some(v2));
        let info = remote.service(&svc()).await.unwrap();
        assert_eq!(info.active_version, v2);
        assert_eq!(info.variant, ServiceVariant::Compute);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_json() {
        let remote = MemoryRemote::new();
        let v1 = remote.add_service(&svc(), ServiceVariant::Vcl);
        let v2 = remote.clone_version(&svc(), v1).await.unwrap();
        remote
            .create(&svc(), v2, Kind::Backend, payload(json!({"name": "a", "port": 80})))
            .await
            .unwrap();
        let json = serde_json::to_string(&remote.snapshot()).unwrap();
        let restored = MemoryRemote::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), remote.snapshot());
        assert_eq!(restored.versions(&svc()), vec![v1, v2]);
    }
}
