use versync_core::{FieldSpec, Kind, ServiceVariant};

use super::AttributeHandler;

pub(super) fn handler() -> AttributeHandler {
    AttributeHandler::new(
        Kind::Backend,
        vec![
            FieldSpec::string("address").required(),
            FieldSpec::boolean("auto_loadbalance").default_value(false),
            FieldSpec::int("between_bytes_timeout").default_int(10000),
            FieldSpec::int("connect_timeout").default_int(1000),
            FieldSpec::int("error_threshold").default_int(0),
            FieldSpec::int("first_byte_timeout").default_int(15000),
            FieldSpec::string("healthcheck").default_value(""),
            FieldSpec::int("max_conn").default_int(200),
            FieldSpec::string("max_tls_version").default_value(""),
            FieldSpec::string("min_tls_version").default_value(""),
            // Sending an empty host makes the service reject the request.
            FieldSpec::string("override_host").omit_empty(),
            FieldSpec::int("port").default_int(80),
            FieldSpec::string("shield").default_value(""),
            FieldSpec::string("ssl_ca_cert").default_value(""),
            FieldSpec::string("ssl_cert_hostname").default_value(""),
            FieldSpec::boolean("ssl_check_cert").default_value(true),
            FieldSpec::string("ssl_ciphers").default_value(""),
            FieldSpec::string("ssl_client_cert").default_value("").sensitive(),
            FieldSpec::string("ssl_client_key").default_value("").sensitive(),
            FieldSpec::string("ssl_sni_hostname").default_value(""),
            FieldSpec::boolean("use_ssl").default_value(false),
            FieldSpec::int("weight").default_int(100),
            FieldSpec::string("request_condition")
                .default_value("")
                .only_for(ServiceVariant::Vcl),
        ],
    )
    .depends_on(&[Kind::Condition, Kind::Healthcheck])
}
