//! The observed-state store: an append-only log of JSON events.
//!
//! Event 0 creates the document; every later event is a JSON Patch against
//! the document as of the previous event. Replaying the log yields the most
//! recently recorded [`ObservedState`] of every service.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::{de::IoRead, json, Deserializer, StreamDeserializer, Value};
use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, Seek as _, Write},
    path::Path,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};
use versync_core::{ObservedState, ServiceId};

const DOCUMENT_TYPE: &str = "versyncState";

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct StateEvent {
    pub index: u64,
    pub meta: StateEventMeta,
    pub patch: json_patch::Patch,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct StateEventMeta {
    pub time: String,
    #[serde(flatten)]
    pub other_fields: Value,
}

pub struct StateEventStream<'a, R: io::Read> {
    iter: StreamDeserializer<'a, IoRead<R>, StateEvent>,
    /// The validated first event, handed out before the rest of the stream.
    first_event: Option<StateEvent>,
}
impl<'a, R: io::Read> StateEventStream<'a, R> {
    pub fn open_from_reader(reader: R) -> Result<StateEventStream<'a, R>> {
        let deserializer = Deserializer::from_reader(reader);
        let mut iter = deserializer.into_iter();
        let first_event = match iter.next() {
            Some(Ok(ev @ StateEvent { index, .. })) => {
                if index != 0 {
                    bail!("Expected initial state event with index 0, got {}", index);
                }
                ev
            }
            Some(Err(e)) => bail!(
                "State file invalid: error parsing initial state event: {}",
                e
            ),
            None => bail!("State file invalid: no initial state event"),
        };
        Ok(StateEventStream {
            iter,
            first_event: Some(first_event),
        })
    }
}

impl<'a, R: io::Read> Iterator for StateEventStream<'a, R> {
    type Item = Result<StateEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first_event.is_some() {
            self.first_event.take().map(Ok)
        } else {
            self.iter.next().map(|r| r.map_err(Into::into))
        }
    }
}

/// Reports on the console while a task that may block for long is running.
/// After SILENT_INTERVAL: print activity
/// After LOG_INTERVAL: print activity and duration
pub struct WaitMonitor {
    done: Arc<AtomicBool>,
}
impl WaitMonitor {
    const SILENT_INTERVAL: Duration = Duration::from_millis(500);
    const LOG_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(activity: String) -> WaitMonitor {
        let done = Arc::new(AtomicBool::new(false));
        let r = WaitMonitor { done: done.clone() };
        std::thread::spawn(|| {
            WaitMonitor::run(done, activity);
        });
        r
    }
    fn run(done: Arc<AtomicBool>, activity: String) {
        let start = std::time::Instant::now();
        let mut next_log = start + Self::SILENT_INTERVAL;
        loop {
            if done.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(next_log.saturating_duration_since(std::time::Instant::now()));
            if done.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            let waited = next_log.duration_since(start);
            if waited <= Self::SILENT_INTERVAL {
                eprintln!("{}", activity);
            } else {
                eprintln!("{} ({} s)", activity, waited.as_secs());
            }
            next_log += Self::LOG_INTERVAL;
        }
    }
    pub fn done(&self) {
        self.done.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}
impl Drop for WaitMonitor {
    fn drop(&mut self) {
        self.done()
    }
}

/// Write access to the event log. Appends take an exclusive file lock.
pub struct StateHandle {
    file: Arc<File>,
    locking: fd_lock::RwLock<Arc<File>>,
    expected_size: Option<u64>,
}
impl StateHandle {
    pub fn open<P: AsRef<Path>>(name: P, create_new: bool) -> Result<StateHandle> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(create_new)
            .open(name)?;
        let file = Arc::new(file);
        let locking = fd_lock::RwLock::new(file.clone());
        let mut handle = StateHandle {
            file,
            locking,
            expected_size: None,
        };
        if create_new {
            handle.append(&[&Self::init_event()])?;
        }
        Ok(handle)
    }

    fn init_document() -> Value {
        json!({
            "_type": DOCUMENT_TYPE,
            "services": {},
        })
    }

    fn init_event() -> StateEvent {
        StateEvent {
            index: 0,
            meta: StateEventMeta {
                time: Utc::now().to_rfc3339(),
                other_fields: json!({}),
            },
            patch: json_patch::Patch(vec![json_patch::PatchOperation::Add(
                json_patch::AddOperation {
                    path: Default::default(),
                    value: Self::init_document(),
                },
            )]),
        }
    }

    fn lock_write(
        locking: &mut fd_lock::RwLock<Arc<File>>,
    ) -> Result<fd_lock::RwLockWriteGuard<'_, Arc<File>>> {
        let lock_wait_mon = WaitMonitor::new("Waiting for state file write lock".to_owned());
        let lock = locking.write()?;
        lock_wait_mon.done();
        Ok(lock)
    }

    pub fn append(&mut self, events: &[&StateEvent]) -> Result<()> {
        let lock_guard = Self::lock_write(&mut self.locking)?;
        let pos = self.file.seek(io::SeekFrom::End(0))?;
        match self.expected_size {
            None => self.expected_size = Some(pos),
            Some(expected_size) => {
                if pos != expected_size {
                    tracing::warn!(
                        "Detected concurrent writing to the state file. Foreign bytes: [{}..{})",
                        expected_size,
                        pos
                    );
                }
            }
        }
        let mut writer = io::BufWriter::new(self.file.clone());

        for event in events {
            // Pretty, so that the log stays readable and diffable by hand.
            serde_json::to_writer_pretty(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        self.expected_size = Some(self.file.stream_position()?);

        drop(lock_guard);
        Ok(())
    }
}

pub fn apply_state_event(state: &mut Value, event: &StateEvent) -> Result<()> {
    json_patch::patch(state, event.patch.0.as_slice()).map_err(Into::into)
}

/// Replay `events` onto `state`, returning the index of the last event.
pub fn apply_state_events(
    state: &mut Value,
    events: impl Iterator<Item = Result<StateEvent>>,
) -> Result<Option<u64>> {
    let mut last = None;
    for event in events {
        let event = event?;
        apply_state_event(state, &event)
            .with_context(|| format!("applying state event {}", event.index))?;
        last = Some(event.index);
    }
    Ok(last)
}

/// Replay the log at `path` into the current document.
pub fn read_document<P: AsRef<Path>>(path: P) -> Result<(Value, Option<u64>)> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("opening state file {}", path.as_ref().display()))?;
    let stream = StateEventStream::open_from_reader(BufReader::new(file))?;
    let mut document = json!({});
    let last = apply_state_events(&mut document, stream)?;
    if document.get("_type").and_then(Value::as_str) != Some(DOCUMENT_TYPE) {
        bail!(
            "State file {} is not a versync state file",
            path.as_ref().display()
        );
    }
    Ok((document, last))
}

/// The observed state of each service, backed by the event log.
pub struct ObservedStore {
    handle: StateHandle,
    document: Value,
    next_index: u64,
}
impl ObservedStore {
    /// Open the log at `path`, creating it if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ObservedStore> {
        let path = path.as_ref();
        if !path.exists() {
            let handle = StateHandle::open(path, true)
                .with_context(|| format!("creating state file {}", path.display()))?;
            return Ok(ObservedStore {
                handle,
                document: StateHandle::init_document(),
                next_index: 1,
            });
        }
        let (document, last) = read_document(path)?;
        let handle = StateHandle::open(path, false)
            .with_context(|| format!("opening state file {}", path.display()))?;
        Ok(ObservedStore {
            handle,
            document,
            next_index: last.map_or(0, |i| i + 1),
        })
    }

    pub fn observed(&self, service: &ServiceId) -> Result<Option<ObservedState>> {
        observed_in(&self.document, service)
    }

    /// Append the difference between the stored and the given observed
    /// state. Nothing is written when they are equal.
    pub fn record(&mut self, observed: &ObservedState, reason: &str) -> Result<()> {
        let mut next = self.document.clone();
        let services = next
            .get_mut("services")
            .and_then(Value::as_object_mut)
            .context("state document has no services map")?;
        services.insert(
            observed.service.as_str().to_string(),
            serde_json::to_value(observed)?,
        );
        let patch = json_patch::diff(&self.document, &next);
        if patch.0.is_empty() {
            tracing::debug!("observed state of {} unchanged", observed.service);
            return Ok(());
        }
        let event = StateEvent {
            index: self.next_index,
            meta: StateEventMeta {
                time: Utc::now().to_rfc3339(),
                other_fields: json!({ "reason": reason, "service": observed.service }),
            },
            patch,
        };
        self.handle.append(&[&event])?;
        self.document = next;
        self.next_index += 1;
        Ok(())
    }
}

pub fn observed_in(document: &Value, service: &ServiceId) -> Result<Option<ObservedState>> {
    match document
        .get("services")
        .and_then(|s| s.get(service.as_str()))
    {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .with_context(|| format!("reading observed state of {}", service)),
    }
}
