use anyhow::{Context, Result};
use versync_engine::InterruptState;

fn set_process_interrupt_handler(interrupted: &InterruptState) -> Result<()> {
    let interrupted = interrupted.clone();
    ctrlc::set_handler(move || {
        if interrupted.is_interrupted() {
            // second Ctrl-C exits without waiting
            std::process::exit(130);
        }
        eprintln!("Interrupted; finishing the calls already in flight");
        interrupted.set_interrupted();
    })
    .context("setting interrupt handler")
}

/// Route SIGINT into an [`InterruptState`] that reconciliation runs observe
/// between kinds.
pub fn set_up_process_interrupt_handler() -> Result<InterruptState> {
    let interrupt_state = InterruptState::new();
    set_process_interrupt_handler(&interrupt_state)?;
    Ok(interrupt_state)
}
