//! Loading desired state from a JSON file.
//!
//! ```json
//! {
//!   "service": "svc-1",
//!   "condition": [{ "name": "api", "statement": "req.url ~ \"^/api\"", "type": "REQUEST" }],
//!   "backend": [{ "name": "origin", "address": "origin.example.com", "port": 443 }]
//! }
//! ```
//!
//! Each kind key that is present is managed, and an empty list deletes every
//! element of that kind. Kinds that are left out are not touched.

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use versync_core::{DesiredState, ElementSet, Kind, ServiceId};
use versync_engine::{handler::element_from_json, HandlerRegistry};

use crate::options::DesiredArgs;

const SERVICE_KEY: &str = "service";

/// A parsed desired-state document.
#[derive(Debug)]
pub struct DesiredFile {
    pub service: Option<ServiceId>,
    pub state: DesiredState,
}

pub fn parse(text: &str, registry: &HandlerRegistry) -> Result<DesiredFile> {
    let document: Value = serde_json::from_str(text)?;
    let Value::Object(map) = document else {
        bail!("desired state must be a JSON object");
    };
    let mut file = DesiredFile {
        service: None,
        state: DesiredState::new(),
    };
    for (key, value) in &map {
        if key == SERVICE_KEY {
            let id = value
                .as_str()
                .context("`service` must be a string")?;
            file.service = Some(ServiceId::new(id));
            continue;
        }
        let kind: Kind = key.parse().map_err(anyhow::Error::msg)?;
        let handler = registry
            .get(kind)
            .with_context(|| format!("no handler for kind {}", kind))?;
        let items = value
            .as_array()
            .with_context(|| format!("`{}` must be a list of elements", kind))?;
        let elements = items
            .iter()
            .map(|item| element_from_json(handler, item))
            .collect::<Result<Vec<_>, _>>()?;
        file.state.set(kind, ElementSet::from_elements(kind, elements)?);
    }
    Ok(file)
}

impl DesiredArgs {
    /// Load the desired file and decide which service it is for.
    ///
    /// With `allow_missing`, an absent file counts as managing nothing,
    /// which is enough for commands that only read.
    pub fn load(
        &self,
        registry: &HandlerRegistry,
        allow_missing: bool,
    ) -> Result<(ServiceId, DesiredState)> {
        let path: &Path = &self.desired;
        let file = if allow_missing && !path.exists() {
            DesiredFile {
                service: None,
                state: DesiredState::new(),
            }
        } else {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading desired state {}", path.display()))?;
            parse(&text, registry)
                .with_context(|| format!("loading desired state {}", path.display()))?
        };
        let service = match (&self.service, file.service) {
            (Some(flag), _) => ServiceId::new(flag.as_str()),
            (None, Some(service)) => service,
            (None, None) => bail!(
                "no service given: pass --service or set `service` in {}",
                path.display()
            ),
        };
        Ok((service, file.state))
    }
}

#[cfg(test)]
mod tests {
    use versync_core::Setting;

    use super::*;

    #[test]
    fn parses_kinds_and_service() {
        let registry = HandlerRegistry::standard();
        let file = parse(
            r#"{
                "service": "svc-1",
                "backend": [{"name": "origin", "address": "origin.example.com", "port": 443}],
                "acl_entry": []
            }"#,
            &registry,
        )
        .unwrap();
        assert_eq!(file.service, Some(ServiceId::new("svc-1")));
        assert!(file.state.manages(Kind::Backend));
        assert!(file.state.manages(Kind::AclEntry));
        assert!(!file.state.manages(Kind::Condition));
        let origin = file.state.elements(Kind::Backend).get("origin").unwrap();
        assert_eq!(origin.setting("port"), &Setting::int(443));
        assert_eq!(origin.setting("weight"), &Setting::Default);
    }

    #[test]
    fn rejects_bad_documents() {
        let registry = HandlerRegistry::standard();
        assert!(parse("[]", &registry).is_err());
        assert!(parse(r#"{"varnish": []}"#, &registry).is_err());
        assert!(parse(r#"{"backend": {"name": "x"}}"#, &registry).is_err());
        assert!(parse(r#"{"backend": [{"name": "x", "colour": "red"}]}"#, &registry).is_err());
        assert!(parse(
            r#"{"condition": [{"name": "a", "statement": "x", "type": "REQUEST"},
                              {"name": "a", "statement": "y", "type": "REQUEST"}]}"#,
            &registry
        )
        .is_err());
    }

    #[test]
    fn service_flag_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versync.json");
        fs::write(&path, r#"{"service": "from-file", "condition": []}"#).unwrap();
        let registry = HandlerRegistry::standard();

        let args = DesiredArgs {
            desired: path.clone(),
            service: None,
        };
        let (service, state) = args.load(&registry, false).unwrap();
        assert_eq!(service, ServiceId::new("from-file"));
        assert!(state.manages(Kind::Condition));

        let args = DesiredArgs {
            desired: path,
            service: Some("from-flag".to_string()),
        };
        assert_eq!(args.load(&registry, false).unwrap().0, ServiceId::new("from-flag"));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandlerRegistry::standard();
        let args = DesiredArgs {
            desired: dir.path().join("absent.json"),
            service: Some("svc".to_string()),
        };
        assert!(args.load(&registry, false).is_err());
        let (_, state) = args.load(&registry, true).unwrap();
        assert_eq!(state, DesiredState::new());

        let args = DesiredArgs {
            desired: dir.path().join("absent.json"),
            service: None,
        };
        assert!(args.load(&registry, true).is_err());
    }
}
