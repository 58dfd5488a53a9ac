use crate::{
    options::StoreArgs,
    remote::LocalRemote,
    state::ObservedStore,
};
use anyhow::{Context, Result};
use std::{process::exit, sync::Arc};
use tracing::warn;
use versync_core::{DesiredState, ObservedState, ServiceId, VersionNumber};
use versync_engine::{HandlerRegistry, RunOptions, VersionCoordinator};
use versync_remote::memory::MemoryRemote;

/// Create the single-threaded tokio runtime used by the CLI.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize tokio runtime")
}

/// Handle a Result, printing the error and exiting with code 1 on failure.
pub fn handle_result(r: Result<()>) {
    match r {
        Ok(()) => {}
        Err(e) => {
            eprintln!("versync error: {:?}", e);
            exit(1);
        }
    }
}

/// Everything a command needs to talk to the service and remember what it
/// saw: the handlers, the emulated remote, and the observed-state log.
pub struct Session {
    pub registry: Arc<HandlerRegistry>,
    pub local: LocalRemote,
    pub store: ObservedStore,
}

impl Session {
    pub fn open(args: &StoreArgs) -> Result<Session> {
        let registry = Arc::new(HandlerRegistry::standard());
        let local = LocalRemote::open(&args.remote, &registry)?;
        let store = ObservedStore::open(&args.state)?;
        Ok(Session {
            registry,
            local,
            store,
        })
    }

    pub fn coordinator(&self, options: RunOptions) -> VersionCoordinator<MemoryRemote> {
        VersionCoordinator::new(self.local.remote(), self.registry.clone(), options)
    }

    /// Read the service and append what was seen to the log.
    pub async fn refresh(
        &mut self,
        coordinator: &VersionCoordinator<MemoryRemote>,
        service: &ServiceId,
        version: Option<VersionNumber>,
        prior: &DesiredState,
        reason: &str,
    ) -> Result<ObservedState> {
        let observed = coordinator
            .observe(service, version, prior)
            .await
            .with_context(|| format!("refreshing {}", service))?;
        self.store.record(&observed, reason)?;
        Ok(observed)
    }

    /// The observed state to diff against: freshly read, or the last one
    /// recorded when `use_stored` is set and there is one.
    pub async fn observed(
        &mut self,
        coordinator: &VersionCoordinator<MemoryRemote>,
        service: &ServiceId,
        prior: &DesiredState,
        use_stored: bool,
    ) -> Result<ObservedState> {
        if use_stored {
            if let Some(observed) = self.store.observed(service)? {
                return Ok(observed);
            }
            warn!("no observed state recorded for {}, refreshing", service);
        }
        self.refresh(coordinator, service, None, prior, "refresh")
            .await
    }

    /// Persist the emulated service.
    pub fn close(self) -> Result<()> {
        self.local.save()
    }
}

/// Combine a primary result with a cleanup result, preserving both errors if both fail.
pub fn and_cleanup<T>(primary: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (primary, cleanup) {
        (Ok(r), Ok(())) => Ok(r),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e1), Err(e2)) => Err(e1.context(format!("Additionally, cleanup failed: {}", e2))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_errors_are_kept() {
        let r: Result<()> = and_cleanup(Ok(()), Err(anyhow::anyhow!("save failed")));
        assert_eq!(r.unwrap_err().to_string(), "save failed");

        let r: Result<()> = and_cleanup(
            Err(anyhow::anyhow!("apply failed")),
            Err(anyhow::anyhow!("save failed")),
        );
        let e = r.unwrap_err();
        assert_eq!(
            e.to_string(),
            "Additionally, cleanup failed: save failed"
        );
        assert_eq!(e.root_cause().to_string(), "apply failed");
    }
}
