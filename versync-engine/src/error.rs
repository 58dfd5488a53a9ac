use std::time::Duration;

use thiserror::Error;
use versync_core::{CoreError, Kind, ServiceId, ServiceVariant, VersionNumber};
use versync_remote::RemoteError;

/// A kind whose changeset did not apply completely.
#[derive(Debug, Clone)]
pub struct KindFailure {
    pub kind: Kind,
    pub error: ReconcileError,
}

/// Why a reconciliation run, or part of one, failed.
///
/// Every variant carries the service and, where one exists, the version,
/// kind and element involved, so that an operator can find what was left
/// behind.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("service {service}, version {version}: {kind} '{element}': transport failure persisted after retries: {source}")]
    TransientTransport {
        service: ServiceId,
        version: VersionNumber,
        kind: Kind,
        element: String,
        #[source]
        source: RemoteError,
    },

    #[error("service {service}, version {version}: {kind} '{element}': {source}")]
    ElementFailed {
        service: ServiceId,
        version: VersionNumber,
        kind: Kind,
        element: String,
        #[source]
        source: RemoteError,
    },

    #[error("service {service}: version {version} failed validation: {}", problems.join("; "))]
    RemoteValidationRejected {
        service: ServiceId,
        version: VersionNumber,
        problems: Vec<String>,
    },

    #[error("service {service}: {kind} '{name}' is known by id {expected} but the service reports id {found}")]
    ConflictingIdentity {
        service: ServiceId,
        kind: Kind,
        name: String,
        expected: String,
        found: String,
    },

    #[error("service {service}: {kind} '{element}': field '{field}' expects {expected}, got {found}")]
    FieldTypeMismatch {
        service: ServiceId,
        kind: Kind,
        element: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("service {service}: {kind} '{element}': unknown field '{field}'")]
    UnknownField {
        service: ServiceId,
        kind: Kind,
        element: String,
        field: String,
    },

    #[error("service {service}: {kind} '{element}': required field '{field}' is not set")]
    MissingRequiredField {
        service: ServiceId,
        kind: Kind,
        element: String,
        field: String,
    },

    #[error("service {service}: {kind} '{name}' is defined more than once")]
    DuplicateName {
        service: ServiceId,
        kind: Kind,
        name: String,
    },

    #[error("service {service}: {kind} is not available for {variant} services")]
    KindNotSupported {
        service: ServiceId,
        kind: Kind,
        variant: ServiceVariant,
    },

    #[error("service {service}: could not clone version {source_version}: {source}")]
    CloneFailed {
        service: ServiceId,
        source_version: VersionNumber,
        #[source]
        source: RemoteError,
    },

    #[error("service {service}: gave up waiting for the edit lock after {}s", waited.as_secs())]
    LockTimeout { service: ServiceId, waited: Duration },

    #[error("service {service}: could not activate version {version}: {source}")]
    ActivationFailed {
        service: ServiceId,
        version: VersionNumber,
        #[source]
        source: RemoteError,
    },

    #[error("service {service}: could not read {}: {source}", describe_read(*version, *kind))]
    RefreshFailed {
        service: ServiceId,
        version: Option<VersionNumber>,
        kind: Option<Kind>,
        #[source]
        source: RemoteError,
    },

    #[error("service {service}: version {version} was left partially applied; completed: [{}], failed: [{}], not attempted: [{}]",
        join(completed), join(&failed.iter().map(|f| f.kind).collect::<Vec<_>>()), join(not_attempted))]
    PartialApplyFailure {
        service: ServiceId,
        version: VersionNumber,
        completed: Vec<Kind>,
        failed: Vec<KindFailure>,
        not_attempted: Vec<Kind>,
    },

    #[error("service {service}: cancelled; version {} holds the kinds completed so far: [{}]",
        version.map_or_else(|| "none".to_string(), |v| v.to_string()), join(completed))]
    Cancelled {
        service: ServiceId,
        version: Option<VersionNumber>,
        completed: Vec<Kind>,
        not_attempted: Vec<Kind>,
    },

    #[error("kind dependencies form a cycle: {cycle}")]
    DependencyCycle { cycle: String },
}

fn join(kinds: &[Kind]) -> String {
    kinds
        .iter()
        .map(Kind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_read(version: Option<VersionNumber>, kind: Option<Kind>) -> String {
    match (version, kind) {
        (Some(v), Some(k)) => format!("{} of version {}", k, v),
        (None, Some(k)) => k.to_string(),
        (Some(v), None) => format!("version {}", v),
        (None, None) => "service details".to_string(),
    }
}

impl ReconcileError {
    /// Attach the service to a model violation.
    pub fn from_core(service: &ServiceId, error: CoreError) -> Self {
        let service = service.clone();
        match error {
            CoreError::FieldTypeMismatch {
                kind,
                element,
                field,
                expected,
                found,
            } => ReconcileError::FieldTypeMismatch {
                service,
                kind,
                element,
                field,
                expected,
                found,
            },
            CoreError::UnknownField {
                kind,
                element,
                field,
            } => ReconcileError::UnknownField {
                service,
                kind,
                element,
                field,
            },
            CoreError::MissingRequiredField {
                kind,
                element,
                field,
            } => ReconcileError::MissingRequiredField {
                service,
                kind,
                element,
                field,
            },
            CoreError::DuplicateName { kind, name } => {
                ReconcileError::DuplicateName { service, kind, name }
            }
        }
    }

    /// Classify a failed element write.
    pub fn from_element_write(
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        element: &str,
        error: RemoteError,
    ) -> Self {
        if error.retryable_for_write() {
            ReconcileError::TransientTransport {
                service: service.clone(),
                version,
                kind,
                element: element.to_string(),
                source: error,
            }
        } else {
            ReconcileError::ElementFailed {
                service: service.clone(),
                version,
                kind,
                element: element.to_string(),
                source: error,
            }
        }
    }

    /// The version that was left behind by the failed run, if any.
    pub fn version(&self) -> Option<VersionNumber> {
        match self {
            ReconcileError::TransientTransport { version, .. }
            | ReconcileError::ElementFailed { version, .. }
            | ReconcileError::RemoteValidationRejected { version, .. }
            | ReconcileError::ActivationFailed { version, .. }
            | ReconcileError::PartialApplyFailure { version, .. } => Some(*version),
            ReconcileError::Cancelled { version, .. } => *version,
            _ => None,
        }
    }
}
