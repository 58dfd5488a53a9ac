//! Interfaces to the remote service that owns the versioned configuration,
//! and the policies used when talking to it.
//!
//! The engine only ever sees [`ElementApi`] and [`VersionApi`]. The
//! [`memory::MemoryRemote`] emulator implements both and is what tests and the
//! command line's local mode run against.

pub mod api;
pub mod error;
pub mod memory;
pub mod retry;
pub mod wire;

pub use api::{ElementApi, RemoteApi, ServiceInfo, Validation, VersionApi};
pub use error::RemoteError;
pub use retry::{LockPolicy, RetryPolicy};
pub use wire::{ElementKey, WireElement, WirePayload};
