//! Per-kind knowledge: which fields exist, how they map to the wire, and how
//! create, update and delete payloads are built.
//!
//! A handler is a plain struct of a field table plus four function pointers.
//! Most kinds use the table-driven [`generic_create`], [`generic_update`],
//! [`generic_delete`] and [`generic_project`]; a kind overrides a pointer only
//! where its wire format deviates.

mod acl_entry;
mod backend;
mod condition;
mod healthcheck;
mod logging_cloudfiles;
mod request_setting;

use std::collections::BTreeSet;

use serde_json::Value;
use versync_core::{
    CoreError, Element, FieldSpec, FieldValue, Kind, ServiceVariant, Setting,
};
use versync_remote::{
    memory::MemoryRemote, wire::ID_FIELD, ElementKey, RemoteError, WireElement, WirePayload,
};

/// How the remote service identifies elements of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// By the value of the key field.
    Name,
    /// By an opaque id assigned on creation.
    RemoteId,
}

pub type BuildCreate =
    fn(&AttributeHandler, ServiceVariant, &Element) -> Result<WirePayload, CoreError>;
pub type BuildUpdate = fn(
    &AttributeHandler,
    ServiceVariant,
    &Element,
    &BTreeSet<String>,
) -> Result<WirePayload, CoreError>;
pub type BuildDelete = fn(&AttributeHandler, &Element) -> ElementKey;
pub type Project =
    fn(&AttributeHandler, ServiceVariant, &WireElement) -> Result<Element, RemoteError>;

pub struct AttributeHandler {
    pub kind: Kind,
    /// Wire field holding the element name.
    pub key_field: &'static str,
    pub identity: Identity,
    /// Kinds whose elements this kind refers to by name.
    pub depends_on: &'static [Kind],
    /// Service variants offering this kind.
    pub variants: &'static [ServiceVariant],
    pub fields: Vec<FieldSpec>,
    pub build_create: BuildCreate,
    pub build_update: BuildUpdate,
    pub build_delete: BuildDelete,
    pub project: Project,
}

const ALL_VARIANTS: &[ServiceVariant] = &[ServiceVariant::Vcl, ServiceVariant::Compute];
const REDACTED: &str = "<redacted>";

impl AttributeHandler {
    pub fn new(kind: Kind, fields: Vec<FieldSpec>) -> Self {
        AttributeHandler {
            kind,
            key_field: "name",
            identity: Identity::Name,
            depends_on: &[],
            variants: ALL_VARIANTS,
            fields,
            build_create: generic_create,
            build_update: generic_update,
            build_delete: generic_delete,
            project: generic_project,
        }
    }

    pub fn key_field(mut self, key_field: &'static str) -> Self {
        self.key_field = key_field;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn depends_on(mut self, kinds: &'static [Kind]) -> Self {
        self.depends_on = kinds;
        self
    }

    pub fn variants(mut self, variants: &'static [ServiceVariant]) -> Self {
        self.variants = variants;
        self
    }

    pub fn project_with(mut self, project: Project) -> Self {
        self.project = project;
        self
    }

    pub fn create_with(mut self, build_create: BuildCreate) -> Self {
        self.build_create = build_create;
        self
    }

    pub fn schema(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields_for(&self, variant: ServiceVariant) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(move |f| f.applies_to(variant))
    }

    pub fn supports(&self, variant: ServiceVariant) -> bool {
        self.variants.contains(&variant)
    }

    /// Reject fields the kind does not know and explicit values of the wrong
    /// type.
    pub fn check(&self, element: &Element) -> Result<(), CoreError> {
        for (name, setting) in &element.fields {
            let spec = self.field(name).ok_or_else(|| CoreError::UnknownField {
                kind: self.kind,
                element: element.name.clone(),
                field: name.clone(),
            })?;
            if let Some(value) = setting.explicit_value() {
                spec.check(self.kind, &element.name, value)?;
            }
        }
        Ok(())
    }

    /// Fields of `desired` that differ from `observed`, by field-aware
    /// equality. Fields `desired` leaves unset, or at a default the field
    /// does not declare, never differ.
    pub fn changed_fields(
        &self,
        variant: ServiceVariant,
        desired: &Element,
        observed: &Element,
    ) -> BTreeSet<String> {
        self.fields_for(variant)
            .filter(|f| !f.matches(desired.setting(f.name), observed.setting(f.name)))
            .map(|f| f.name.to_string())
            .collect()
    }

    pub fn create_payload(
        &self,
        variant: ServiceVariant,
        element: &Element,
    ) -> Result<WirePayload, CoreError> {
        (self.build_create)(self, variant, element)
    }

    pub fn update_payload(
        &self,
        variant: ServiceVariant,
        element: &Element,
        changed: &BTreeSet<String>,
    ) -> Result<WirePayload, CoreError> {
        (self.build_update)(self, variant, element, changed)
    }

    pub fn delete_key(&self, element: &Element) -> ElementKey {
        (self.build_delete)(self, element)
    }

    pub fn project_wire(
        &self,
        variant: ServiceVariant,
        wire: &WireElement,
    ) -> Result<Element, RemoteError> {
        (self.project)(self, variant, wire)
    }

    /// A copy of `payload` that is safe to log.
    pub fn redact(&self, payload: &WirePayload) -> WirePayload {
        let mut out = payload.clone();
        for spec in self.fields.iter().filter(|f| f.sensitive) {
            if let Some(v) = out.get_mut(spec.wire) {
                *v = Value::String(REDACTED.to_string());
            }
        }
        out
    }

    fn spec_by_wire(&self, wire: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.wire == wire)
    }
}

/// Every applicable field that resolves to a value. Unset fields, and empty
/// strings of `omit_empty` fields, are left out of the payload.
pub fn generic_create(
    h: &AttributeHandler,
    variant: ServiceVariant,
    element: &Element,
) -> Result<WirePayload, CoreError> {
    h.check(element)?;
    let mut payload = WirePayload::new();
    payload.insert(
        h.key_field.to_string(),
        Value::String(element.name.clone()),
    );
    for spec in h.fields_for(variant) {
        match spec.resolve(element.setting(spec.name)) {
            Some(value) => {
                payload.insert(spec.wire.to_string(), value.to_json());
            }
            None if spec.required => {
                return Err(CoreError::MissingRequiredField {
                    kind: h.kind,
                    element: element.name.clone(),
                    field: spec.name.to_string(),
                });
            }
            None => {}
        }
    }
    Ok(payload)
}

/// Exactly the `changed` fields. A changed field that no longer resolves to
/// a value is cleared by sending its type's zero value.
pub fn generic_update(
    h: &AttributeHandler,
    variant: ServiceVariant,
    element: &Element,
    changed: &BTreeSet<String>,
) -> Result<WirePayload, CoreError> {
    h.check(element)?;
    let mut payload = WirePayload::new();
    for name in changed {
        let spec = h.field(name).ok_or_else(|| CoreError::UnknownField {
            kind: h.kind,
            element: element.name.clone(),
            field: name.clone(),
        })?;
        if !spec.applies_to(variant) {
            continue;
        }
        let value = spec
            .resolve(element.setting(spec.name))
            .unwrap_or_else(|| spec.ty.zero());
        payload.insert(spec.wire.to_string(), value.to_json());
    }
    Ok(payload)
}

pub fn generic_delete(h: &AttributeHandler, element: &Element) -> ElementKey {
    match (h.identity, &element.id) {
        (Identity::RemoteId, Some(id)) => ElementKey::with_id(element.name.clone(), id.clone()),
        _ => ElementKey::name(element.name.clone()),
    }
}

/// The inverse of [`generic_create`]. Absent and `null` wire fields, and
/// empty strings of `omit_empty` fields, read back as [`Setting::Unset`].
/// Wire fields the table does not describe are ignored.
pub fn generic_project(
    h: &AttributeHandler,
    variant: ServiceVariant,
    wire: &WireElement,
) -> Result<Element, RemoteError> {
    let name = wire.get_str(h.key_field).ok_or_else(|| {
        RemoteError::decode(format!("{} without a '{}' field", h.kind, h.key_field))
    })?;
    let mut element = Element::new(name);
    if h.identity == Identity::RemoteId {
        element.id = wire.id().map(str::to_string);
    }
    for spec in h.fields_for(variant) {
        let setting = match wire.get(spec.wire) {
            None | Some(Value::Null) => continue,
            Some(json) => {
                let value = FieldValue::from_json(&spec.ty, json).ok_or_else(|| {
                    RemoteError::decode(format!(
                        "{} '{}': field '{}' is not a {}: {}",
                        h.kind, element.name, spec.wire, spec.ty, json
                    ))
                })?;
                if spec.omit_empty && value.is_empty_string() {
                    continue;
                }
                Setting::Value(value)
            }
        };
        element.fields.insert(spec.name.to_string(), setting);
    }
    Ok(element)
}

/// Turn one JSON object of configuration into an element.
///
/// Fields the object leaves out become [`Setting::Default`] when the field
/// declares a default and is not sticky, and [`Setting::Unset`] otherwise.
/// `null` always means unset.
pub fn element_from_json(h: &AttributeHandler, object: &Value) -> Result<Element, CoreError> {
    let unnamed = || "<unnamed>".to_string();
    let map = object.as_object().ok_or_else(|| CoreError::FieldTypeMismatch {
        kind: h.kind,
        element: unnamed(),
        field: h.key_field.to_string(),
        expected: "object".to_string(),
        found: json_type(object).to_string(),
    })?;
    let name = match map.get(h.key_field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(CoreError::FieldTypeMismatch {
                kind: h.kind,
                element: unnamed(),
                field: h.key_field.to_string(),
                expected: "string".to_string(),
                found: json_type(other).to_string(),
            })
        }
        None => {
            return Err(CoreError::MissingRequiredField {
                kind: h.kind,
                element: unnamed(),
                field: h.key_field.to_string(),
            })
        }
    };
    let mut element = Element::new(name);

    for (key, json) in map {
        if key == h.key_field {
            continue;
        }
        if key == ID_FIELD && h.identity == Identity::RemoteId {
            element.id = json.as_str().map(str::to_string);
            continue;
        }
        let spec = h.field(key).ok_or_else(|| CoreError::UnknownField {
            kind: h.kind,
            element: element.name.clone(),
            field: key.clone(),
        })?;
        let setting = if json.is_null() {
            Setting::Unset
        } else {
            let value = FieldValue::from_json(&spec.ty, json).ok_or_else(|| {
                CoreError::FieldTypeMismatch {
                    kind: h.kind,
                    element: element.name.clone(),
                    field: key.clone(),
                    expected: spec.ty.to_string(),
                    found: json_type(json).to_string(),
                }
            })?;
            spec.check(h.kind, &element.name, &value)?;
            Setting::Value(value)
        };
        element.fields.insert(key.clone(), setting);
    }

    for spec in &h.fields {
        if !element.fields.contains_key(spec.name) && spec.default.is_some() && !spec.sticky_unset
        {
            element
                .fields
                .insert(spec.name.to_string(), Setting::Default);
        }
    }
    Ok(element)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// The handlers of all kinds, in application order.
pub struct HandlerRegistry {
    handlers: Vec<AttributeHandler>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<AttributeHandler>) -> Self {
        HandlerRegistry { handlers }
    }

    /// The built-in kinds. Conditions come first because most other kinds
    /// refer to them by name.
    pub fn standard() -> Self {
        HandlerRegistry::new(vec![
            condition::handler(),
            healthcheck::handler(),
            backend::handler(),
            request_setting::handler(),
            logging_cloudfiles::handler(),
            acl_entry::handler(),
        ])
    }

    pub fn get(&self, kind: Kind) -> Option<&AttributeHandler> {
        self.handlers.iter().find(|h| h.kind == kind)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttributeHandler> {
        self.handlers.iter()
    }

    pub fn kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        self.handlers.iter().map(|h| h.kind)
    }

    /// Position of `kind` in application order.
    pub fn position(&self, kind: Kind) -> Option<usize> {
        self.handlers.iter().position(|h| h.kind == kind)
    }

    /// Wire values the service fills in for fields a create leaves out:
    /// the zero value of every sticky field.
    pub fn server_defaults(&self, kind: Kind) -> WirePayload {
        let mut defaults = WirePayload::new();
        if let Some(h) = self.get(kind) {
            for spec in h.fields.iter().filter(|f| f.sticky_unset) {
                defaults.insert(spec.wire.to_string(), spec.ty.zero().to_json());
            }
        }
        defaults
    }

    /// Key every kind of the emulator the way its handler addresses it.
    pub fn configure_keying(&self, remote: &MemoryRemote) {
        for h in &self.handlers {
            remote.set_keying(h.kind, h.key_field, h.identity == Identity::RemoteId);
        }
    }

    /// Look a wire field up across a kind's table.
    pub fn wire_field(&self, kind: Kind, wire: &str) -> Option<&FieldSpec> {
        self.get(kind).and_then(|h| h.spec_by_wire(wire))
    }
}
