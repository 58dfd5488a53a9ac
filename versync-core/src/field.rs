use crate::{
    error::CoreError,
    model::{Kind, ServiceVariant},
    value::{FieldType, FieldValue, Setting},
};

/// Description of one field of a kind: how it is named on the wire, its type,
/// its default and the rules that keep re-reads from producing spurious diffs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub wire: &'static str,
    pub ty: FieldType,
    pub default: Option<FieldValue>,
    pub required: bool,
    /// An empty string is never sent on create, and reads back as absent.
    pub omit_empty: bool,
    /// The remote substitutes its zero value when this field is not sent.
    /// When the previous desired setting was [`Setting::Unset`], a remote zero
    /// is read back as `Unset` again.
    pub sticky_unset: bool,
    /// Redacted in logs.
    pub sensitive: bool,
    /// The field only exists for this service variant.
    pub variant: Option<ServiceVariant>,
}

impl FieldSpec {
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        FieldSpec {
            name,
            wire: name,
            ty,
            default: None,
            required: false,
            omit_empty: false,
            sticky_unset: false,
            sensitive: false,
            variant: None,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn enumeration(name: &'static str, variants: &'static [&'static str]) -> Self {
        Self::new(name, FieldType::Enum(variants))
    }

    pub fn string_list(name: &'static str) -> Self {
        Self::new(name, FieldType::StringList)
    }

    pub fn wire(mut self, wire: &'static str) -> Self {
        self.wire = wire;
        self
    }

    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn default_int(self, value: i64) -> Self {
        self.default_value(FieldValue::Int(value))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn omit_empty(mut self) -> Self {
        self.omit_empty = true;
        self
    }

    pub fn sticky_unset(mut self) -> Self {
        self.sticky_unset = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn only_for(mut self, variant: ServiceVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn applies_to(&self, variant: ServiceVariant) -> bool {
        self.variant.map_or(true, |v| v == variant)
    }

    /// The value this setting stands for, or `None` if nothing would be sent.
    pub fn resolve(&self, setting: &Setting) -> Option<FieldValue> {
        let value = match setting {
            Setting::Unset => return None,
            Setting::Default => self.default.clone()?,
            Setting::Value(v) => v.clone(),
        };
        if self.omit_empty && value.is_empty_string() {
            None
        } else {
            Some(value)
        }
    }

    /// Field-aware equality of a desired setting against an observed one.
    ///
    /// A desired [`Setting::Unset`] expresses no opinion and always matches,
    /// and so does [`Setting::Default`] on a field without a declared
    /// default. Otherwise both sides are resolved and compared by value:
    /// strings case sensitively, integers numerically, lists in order.
    pub fn matches(&self, desired: &Setting, observed: &Setting) -> bool {
        let no_opinion = match desired {
            Setting::Unset => true,
            Setting::Default => self.default.is_none(),
            Setting::Value(_) => false,
        };
        if no_opinion {
            return true;
        }
        self.resolve(desired) == self.resolve(observed)
    }

    /// Check an explicit value against the declared type.
    pub fn check(&self, kind: Kind, element: &str, value: &FieldValue) -> Result<(), CoreError> {
        if self.ty.admits(value) {
            Ok(())
        } else {
            let found = match value {
                FieldValue::Str(s) if matches!(self.ty, FieldType::Enum(_)) => format!("{:?}", s),
                _ => value.type_name().to_string(),
            };
            Err(CoreError::FieldTypeMismatch {
                kind,
                element: element.to_string(),
                field: self.name.to_string(),
                expected: self.ty.to_string(),
                found,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_applies_default_and_omit_empty() {
        let port = FieldSpec::int("port").default_int(80);
        assert_eq!(port.resolve(&Setting::Default), Some(FieldValue::Int(80)));
        assert_eq!(port.resolve(&Setting::int(8080)), Some(FieldValue::Int(8080)));
        assert_eq!(port.resolve(&Setting::Unset), None);

        let host = FieldSpec::string("override_host").omit_empty();
        assert_eq!(host.resolve(&Setting::str("")), None);
        assert_eq!(host.resolve(&Setting::Default), None);
    }

    #[test]
    fn empty_path_is_kept_without_omit_empty() {
        let path = FieldSpec::string("path");
        assert_eq!(path.resolve(&Setting::str("")), Some(FieldValue::str("")));
    }

    #[test]
    fn unset_desired_matches_anything() {
        let gzip = FieldSpec::int("gzip_level").sticky_unset();
        assert!(gzip.matches(&Setting::Unset, &Setting::int(0)));
        assert!(gzip.matches(&Setting::Unset, &Setting::int(9)));
        assert!(!gzip.matches(&Setting::int(3), &Setting::int(0)));
    }

    #[test]
    fn default_matches_observed_default_value() {
        let method = FieldSpec::string("method").default_value("HEAD");
        assert!(method.matches(&Setting::Default, &Setting::str("HEAD")));
        assert!(!method.matches(&Setting::Default, &Setting::str("head")));
    }

    #[test]
    fn default_without_declared_value_has_no_opinion() {
        let max_stale_age = FieldSpec::int("max_stale_age");
        assert!(max_stale_age.matches(&Setting::Default, &Setting::int(0)));
        assert!(max_stale_age.matches(&Setting::Default, &Setting::Unset));
        let gzip = FieldSpec::int("gzip_level").sticky_unset();
        assert!(gzip.matches(&Setting::Default, &Setting::int(0)));
        assert!(!gzip.matches(&Setting::int(6), &Setting::int(0)));
    }

    #[test]
    fn check_reports_enum_variant() {
        let codec = FieldSpec::enumeration("compression_codec", &["zstd", "snappy", "gzip"]);
        let err = codec
            .check(Kind::LoggingCloudfiles, "logs", &FieldValue::str("brotli"))
            .unwrap_err();
        assert!(err.to_string().contains("one of [zstd, snappy, gzip]"));
        assert!(err.to_string().contains("\"brotli\""));
    }

    #[test]
    fn variant_restriction() {
        let f = FieldSpec::string("request_condition").only_for(ServiceVariant::Vcl);
        assert!(f.applies_to(ServiceVariant::Vcl));
        assert!(!f.applies_to(ServiceVariant::Compute));
        assert!(FieldSpec::string("name").applies_to(ServiceVariant::Compute));
    }
}
