use std::time::Duration;

use thiserror::Error;
use versync_core::{ServiceId, VersionNumber};

/// A failed call to the remote service, classified by what the caller may do
/// about it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The request never reached the service, so it did not take effect.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The request was sent but no response arrived; it may have taken effect.
    #[error("response lost: {message}")]
    ResponseLost { message: String },

    /// Another actor holds the edit lock on the service.
    #[error("service {service} is locked for editing (version {version})")]
    Locked {
        service: ServiceId,
        version: VersionNumber,
    },

    #[error("gave up waiting for the edit lock after {}s", waited.as_secs())]
    LockTimeout { waited: Duration },

    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("could not decode response: {message}")]
    Decode { message: String },
}

impl RemoteError {
    pub fn not_found(what: impl Into<String>) -> Self {
        RemoteError::NotFound { what: what.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
        }
    }

    pub fn response_lost(message: impl Into<String>) -> Self {
        RemoteError::ResponseLost {
            message: message.into(),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        RemoteError::Decode {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, RemoteError::Locked { .. })
    }

    /// Whether an idempotent read may be re-issued.
    pub fn retryable_for_read(&self) -> bool {
        matches!(
            self,
            RemoteError::Transport { .. } | RemoteError::ResponseLost { .. }
        )
    }

    /// Whether a mutating call may be re-issued. Only failures where the
    /// operation is known not to have taken effect qualify.
    pub fn retryable_for_write(&self) -> bool {
        matches!(self, RemoteError::Transport { .. })
    }
}
