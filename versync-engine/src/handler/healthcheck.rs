use versync_core::{FieldSpec, Kind};

use super::AttributeHandler;

pub(super) fn handler() -> AttributeHandler {
    AttributeHandler::new(
        Kind::Healthcheck,
        vec![
            FieldSpec::string("host").required(),
            FieldSpec::string("path").required(),
            FieldSpec::int("check_interval").default_int(5000),
            FieldSpec::int("expected_response").default_int(200),
            // Sent and compared in order.
            FieldSpec::string_list("headers"),
            FieldSpec::string("http_version").default_value("1.1"),
            FieldSpec::int("initial").default_int(2),
            FieldSpec::string("method").default_value("HEAD"),
            FieldSpec::int("threshold").default_int(3),
            FieldSpec::int("timeout").default_int(500),
            FieldSpec::int("window").default_int(5),
        ],
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use versync_core::{ServiceVariant, Setting};
    use versync_remote::WireElement;

    use super::*;
    use crate::handler::element_from_json;

    #[test]
    fn header_order_matters() {
        let h = handler();
        let desired = element_from_json(
            &h,
            &json!({"name": "h", "host": "a", "path": "/", "headers": ["Foo: Bar", "Baz: Qux"]}),
        )
        .unwrap();
        let wire = json!({
            "name": "h", "host": "a", "path": "/", "headers": ["Baz: Qux", "Foo: Bar"],
            "check_interval": 5000, "expected_response": 200, "http_version": "1.1",
            "initial": 2, "method": "HEAD", "threshold": 3, "timeout": 500, "window": 5
        });
        let observed = h
            .project_wire(
                ServiceVariant::Vcl,
                &WireElement(wire.as_object().cloned().unwrap_or_default()),
            )
            .unwrap();
        let changed = h.changed_fields(ServiceVariant::Vcl, &desired, &observed);
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["headers"]);
        assert_eq!(observed.setting("timeout"), &Setting::int(500));
    }
}
