use versync_core::{FieldSpec, Kind, ServiceVariant};

use super::AttributeHandler;

/// Rackspace Cloud Files logging endpoints.
///
/// The service reports every string field it has no value for as an empty
/// string, so all string fields are `omit_empty`. `gzip_level` is sticky: the
/// service substitutes 0 when it is not sent, and must not be sent together
/// with `compression_codec`.
pub(super) fn handler() -> AttributeHandler {
    AttributeHandler::new(
        Kind::LoggingCloudfiles,
        vec![
            FieldSpec::string("access_key")
                .required()
                .sensitive()
                .omit_empty(),
            FieldSpec::string("bucket_name").required().omit_empty(),
            FieldSpec::enumeration("compression_codec", &["zstd", "snappy", "gzip"]).omit_empty(),
            FieldSpec::int("gzip_level").sticky_unset(),
            FieldSpec::enumeration("message_type", &["classic", "loggly", "logplex", "blank"])
                .default_value("classic")
                .omit_empty(),
            FieldSpec::string("path").omit_empty(),
            FieldSpec::int("period").default_int(3600),
            FieldSpec::string("public_key").omit_empty(),
            FieldSpec::string("region").omit_empty(),
            FieldSpec::string("timestamp_format")
                .default_value("%Y-%m-%dT%H:%M:%S.000")
                .omit_empty(),
            FieldSpec::string("user").required().omit_empty(),
            FieldSpec::string("format")
                .omit_empty()
                .only_for(ServiceVariant::Vcl),
            FieldSpec::int("format_version")
                .default_int(2)
                .only_for(ServiceVariant::Vcl),
            FieldSpec::string("response_condition")
                .omit_empty()
                .only_for(ServiceVariant::Vcl),
            FieldSpec::enumeration("placement", &["none", "waf_debug"])
                .omit_empty()
                .only_for(ServiceVariant::Vcl),
        ],
    )
    .depends_on(&[Kind::Condition])
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use versync_core::Setting;

    use super::*;
    use crate::handler::element_from_json;

    fn endpoint() -> serde_json::Value {
        json!({
            "name": "logs", "user": "u", "access_key": "secret", "bucket_name": "b",
            "compression_codec": "zstd"
        })
    }

    #[test]
    fn unset_gzip_level_is_not_sent() {
        let h = handler();
        let e = element_from_json(&h, &endpoint()).unwrap();
        assert_eq!(e.setting("gzip_level"), &Setting::Unset);
        let payload = h.create_payload(ServiceVariant::Vcl, &e).unwrap();
        assert!(!payload.contains_key("gzip_level"));
        assert_eq!(payload["compression_codec"], json!("zstd"));
        assert_eq!(payload["message_type"], json!("classic"));
        assert_eq!(payload["format_version"], json!(2));
        assert!(!payload.contains_key("response_condition"));
    }

    #[test]
    fn explicit_zero_gzip_level_is_sent() {
        let h = handler();
        let e = element_from_json(
            &h,
            &json!({"name": "logs", "user": "u", "access_key": "k", "bucket_name": "b", "gzip_level": 0}),
        )
        .unwrap();
        let payload = h.create_payload(ServiceVariant::Compute, &e).unwrap();
        assert_eq!(payload["gzip_level"], json!(0));
        assert!(!payload.contains_key("format_version"));
    }
}
