use versync_core::{FieldSpec, Kind, ServiceVariant};

use super::AttributeHandler;

pub(super) const CONDITION_TYPES: &[&str] = &["REQUEST", "RESPONSE", "CACHE", "PREFETCH"];

/// Named VCL conditions. Other kinds refer to them by name.
pub(super) fn handler() -> AttributeHandler {
    AttributeHandler::new(
        Kind::Condition,
        vec![
            FieldSpec::string("statement").required(),
            FieldSpec::enumeration("type", CONDITION_TYPES).required(),
            FieldSpec::int("priority").default_int(10),
        ],
    )
    .variants(&[ServiceVariant::Vcl])
}
