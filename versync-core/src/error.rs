use thiserror::Error;

use crate::model::Kind;

/// Violations of the element model. These are caller contract violations:
/// retrying will not help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("{kind} '{element}': field '{field}' expects {expected}, got {found}")]
    FieldTypeMismatch {
        kind: Kind,
        element: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("{kind} '{element}': unknown field '{field}'")]
    UnknownField {
        kind: Kind,
        element: String,
        field: String,
    },

    #[error("{kind} '{element}': required field '{field}' is not set")]
    MissingRequiredField {
        kind: Kind,
        element: String,
        field: String,
    },

    #[error("{kind}: element name '{name}' appears more than once")]
    DuplicateName { kind: Kind, name: String },
}

impl CoreError {
    /// The kind the error was raised for.
    pub fn kind(&self) -> Kind {
        match self {
            CoreError::FieldTypeMismatch { kind, .. }
            | CoreError::UnknownField { kind, .. }
            | CoreError::MissingRequiredField { kind, .. }
            | CoreError::DuplicateName { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::FieldTypeMismatch {
            kind: Kind::Backend,
            element: "origin".to_string(),
            field: "port".to_string(),
            expected: "int".to_string(),
            found: "string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "backend 'origin': field 'port' expects int, got string"
        );
        assert_eq!(err.kind(), Kind::Backend);
    }
}
