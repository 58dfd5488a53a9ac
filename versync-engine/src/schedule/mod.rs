//! Scheduling of per-kind work.
//!
//! Kinds are tasks keyed by [`versync_core::Kind`]. A task may require the
//! tasks of the kinds it references; each runs at most once per run and
//! dependency cycles are reported instead of deadlocking.

pub mod task_tracker;
pub mod thunk;
