use versync_core::{FieldSpec, Kind, ServiceVariant};

use super::AttributeHandler;

pub(super) fn handler() -> AttributeHandler {
    AttributeHandler::new(
        Kind::RequestSetting,
        vec![
            FieldSpec::enumeration("action", &["lookup", "pass"]).omit_empty(),
            FieldSpec::boolean("bypass_busy_wait"),
            FieldSpec::string("default_host"),
            FieldSpec::boolean("force_miss"),
            FieldSpec::boolean("force_ssl"),
            FieldSpec::boolean("geo_headers"),
            FieldSpec::string("hash_keys"),
            FieldSpec::int("max_stale_age"),
            FieldSpec::string("request_condition"),
            FieldSpec::boolean("timer_support"),
            FieldSpec::enumeration(
                "xff",
                &["clear", "leave", "append", "append_all", "overwrite"],
            )
            .omit_empty(),
        ],
    )
    .depends_on(&[Kind::Condition])
    .variants(&[ServiceVariant::Vcl])
}
