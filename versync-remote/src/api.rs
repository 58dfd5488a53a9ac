use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use versync_core::{Kind, ServiceId, ServiceVariant, VersionNumber};

use crate::{
    error::RemoteError,
    wire::{ElementKey, WireElement, WirePayload},
};

/// Per-kind element operations against one version of a service.
#[async_trait]
pub trait ElementApi: Send + Sync {
    async fn list(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
    ) -> Result<Vec<WireElement>, RemoteError>;

    async fn create(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        payload: WirePayload,
    ) -> Result<WireElement, RemoteError>;

    async fn update(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        key: &ElementKey,
        payload: WirePayload,
    ) -> Result<WireElement, RemoteError>;

    /// Fails with [`RemoteError::NotFound`] if the element does not exist.
    async fn delete(
        &self,
        service: &ServiceId,
        version: VersionNumber,
        kind: Kind,
        key: &ElementKey,
    ) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub variant: ServiceVariant,
    pub active_version: VersionNumber,
}

/// Result of asking the remote service to validate a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub ok: bool,
    #[serde(default)]
    pub problems: Vec<String>,
}

/// The version lifecycle of a service.
#[async_trait]
pub trait VersionApi: Send + Sync {
    async fn service(&self, service: &ServiceId) -> Result<ServiceInfo, RemoteError>;

    /// Copy `source` into a new, editable version. Fails with
    /// [`RemoteError::Locked`] while another actor holds the edit lock.
    async fn clone_version(
        &self,
        service: &ServiceId,
        source: VersionNumber,
    ) -> Result<VersionNumber, RemoteError>;

    async fn validate(
        &self,
        service: &ServiceId,
        version: VersionNumber,
    ) -> Result<Validation, RemoteError>;

    async fn activate(&self, service: &ServiceId, version: VersionNumber)
        -> Result<(), RemoteError>;
}

/// Everything the coordinator needs from the remote side.
pub trait RemoteApi: ElementApi + VersionApi {}
impl<T: ElementApi + VersionApi + ?Sized> RemoteApi for T {}
