//! Data model for reconciling named sets of configuration elements against a
//! versioned remote service.
//!
//! Nothing in this crate talks to the remote service. It defines what the
//! engine diffs ([`ElementSet`]), how individual fields are described
//! ([`FieldSpec`]) and what a diff produces ([`Changeset`]).

pub mod changeset;
pub mod error;
pub mod field;
pub mod model;
pub mod state;
pub mod value;

pub use changeset::{Changeset, ChangesetSummary, ElementUpdate};
pub use error::CoreError;
pub use field::FieldSpec;
pub use model::{Element, ElementSet, Kind, ServiceId, ServiceVariant, VersionNumber};
pub use state::{DesiredState, ObservedState};
pub use value::{FieldType, FieldValue, Setting};
