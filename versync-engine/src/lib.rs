//! Reconciliation of desired element sets against a versioned remote service.
//!
//! - [`handler`]: per-kind field tables and payload builders.
//! - [`reconcile::SetReconciler`]: diffs one kind and applies the changeset.
//! - [`project::StateProjector`]: turns `List` responses back into elements.
//! - [`coordinator::VersionCoordinator`]: clone, apply, validate, activate.

pub mod coordinator;
pub mod error;
pub mod handler;
pub mod interrupt;
pub mod project;
pub mod reconcile;
pub mod schedule;

pub use coordinator::{Activation, Phase, Plan, RunOptions, RunReport, VersionCoordinator};
pub use error::{KindFailure, ReconcileError};
pub use handler::{AttributeHandler, HandlerRegistry, Identity};
pub use interrupt::InterruptState;
