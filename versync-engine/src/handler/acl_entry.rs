use serde_json::Value;
use versync_core::{Element, FieldSpec, Kind, ServiceVariant};
use versync_remote::{RemoteError, WireElement};

use super::{generic_project, AttributeHandler, Identity};

/// Entries of an access control list, keyed by IP address. The service
/// assigns each entry an id on creation and addresses it by that id.
pub(super) fn handler() -> AttributeHandler {
    AttributeHandler::new(
        Kind::AclEntry,
        vec![
            FieldSpec::string("subnet").omit_empty(),
            FieldSpec::boolean("negated").default_value(false),
            FieldSpec::string("comment").default_value(""),
        ],
    )
    .key_field("ip")
    .identity(Identity::RemoteId)
    .project_with(project)
}

/// Some API versions report the subnet prefix length as a number.
fn project(
    h: &AttributeHandler,
    variant: ServiceVariant,
    wire: &WireElement,
) -> Result<Element, RemoteError> {
    match wire.get("subnet") {
        Some(Value::Number(n)) => {
            let mut normalized = wire.clone();
            normalized
                .0
                .insert("subnet".to_string(), Value::String(n.to_string()));
            generic_project(h, variant, &normalized)
        }
        _ => generic_project(h, variant, wire),
    }
}
