//! The emulated remote service, persisted as a snapshot file between
//! invocations.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use tracing::debug;
use versync_engine::HandlerRegistry;
use versync_remote::memory::{MemoryRemote, RemoteSnapshot};

pub struct LocalRemote {
    path: PathBuf,
    remote: Arc<MemoryRemote>,
}

impl LocalRemote {
    /// Load the snapshot at `path`. A missing file is an emulator without
    /// services.
    pub fn open(path: &Path, registry: &HandlerRegistry) -> Result<LocalRemote> {
        let snapshot = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading remote snapshot {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing remote snapshot {}", path.display()))?
        } else {
            debug!("no remote snapshot at {}, starting empty", path.display());
            RemoteSnapshot::default()
        };
        let remote = MemoryRemote::from_snapshot(snapshot);
        registry.configure_keying(&remote);
        for kind in registry.kinds() {
            let defaults = registry.server_defaults(kind);
            if !defaults.is_empty() {
                remote.set_server_defaults(kind, defaults);
            }
        }
        Ok(LocalRemote {
            path: path.to_path_buf(),
            remote: Arc::new(remote),
        })
    }

    pub fn remote(&self) -> Arc<MemoryRemote> {
        self.remote.clone()
    }

    /// Write the snapshot back, replacing the file atomically.
    pub fn save(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.remote.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text + "\n")
            .with_context(|| format!("writing remote snapshot {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing remote snapshot {}", self.path.display()))
    }
}
