use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag shared between the process signal handler
/// and a reconciliation run. Calls already issued are allowed to complete;
/// the run only checks the flag between kinds.
#[derive(Clone, Debug, Default)]
pub struct InterruptState {
    interrupted: Arc<AtomicBool>,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
