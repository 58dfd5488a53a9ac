//! The version lifecycle of one reconciliation run.
//!
//! ```text
//! Idle -> Cloning -> Applying -> Activating -> Active
//!                          \--> Staged     (validated, left for manual promotion)
//!                          \--> Abandoned  (dry run)
//! ```
//!
//! The active version is never edited. Changes go into a clone; a failure
//! part way leaves the clone as it is and reports it, so that an operator can
//! inspect it.

use std::{
    collections::BTreeMap,
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};
use versync_core::{
    Changeset, ChangesetSummary, DesiredState, Kind, ObservedState, ServiceId, ServiceVariant,
    VersionNumber,
};
use versync_remote::{
    retry::{poll_while_locked, retry_read, retry_write},
    LockPolicy, RemoteApi, RemoteError, RetryPolicy,
};

use crate::{
    error::{KindFailure, ReconcileError},
    handler::HandlerRegistry,
    interrupt::InterruptState,
    project::StateProjector,
    reconcile::SetReconciler,
    schedule::{
        task_tracker::{Cycle, TaskContext, TaskTracker, TaskWork},
        thunk::Thunk,
    },
};

/// What to do with the new version once every changeset is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Validate, then make it the active version.
    #[default]
    Activate,
    /// Validate and keep it for manual promotion.
    LeaveInactive,
    /// Dry run: apply, then leave the version unvalidated and inactive.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub activation: Activation,
    pub retry: RetryPolicy,
    pub lock: LockPolicy,
    /// How many kinds may be applied at the same time. `1` applies them one
    /// after the other in registry order.
    pub max_parallel_kinds: usize,
}
impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            activation: Activation::default(),
            retry: RetryPolicy::default(),
            lock: LockPolicy::default(),
            max_parallel_kinds: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Cloning,
    Applying,
    Activating,
    Active,
    Staged,
    Abandoned,
}
impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Cloning => "cloning",
            Phase::Applying => "applying",
            Phase::Activating => "activating",
            Phase::Active => "active",
            Phase::Staged => "staged",
            Phase::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// The changesets of one run, for the kinds that have changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub service: ServiceId,
    pub variant: ServiceVariant,
    pub changesets: BTreeMap<Kind, Changeset>,
}
impl Plan {
    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    pub fn summary(&self) -> ChangesetSummary {
        let mut total = ChangesetSummary::default();
        for changeset in self.changesets.values() {
            total += changeset.summary();
        }
        total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub service: ServiceId,
    pub phase: Phase,
    /// The version the clone was made from, or the observed version for a
    /// run without changes.
    pub source_version: Option<VersionNumber>,
    pub target_version: Option<VersionNumber>,
    pub applied: BTreeMap<Kind, ChangesetSummary>,
}

/// Drives a service from its observed state to the desired state through a
/// cloned version.
pub struct VersionCoordinator<R: RemoteApi + ?Sized + 'static> {
    remote: Arc<R>,
    registry: Arc<HandlerRegistry>,
    options: RunOptions,
}

impl<R: RemoteApi + ?Sized + 'static> VersionCoordinator<R> {
    pub fn new(remote: Arc<R>, registry: Arc<HandlerRegistry>, options: RunOptions) -> Self {
        VersionCoordinator {
            remote,
            registry,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Diff every managed kind. Makes no remote calls.
    ///
    /// Payloads are built up front, so an element that cannot be sent fails
    /// the plan instead of a half-applied version.
    pub fn plan(
        &self,
        desired: &DesiredState,
        observed: &ObservedState,
    ) -> Result<Plan, ReconcileError> {
        let mut changesets = BTreeMap::new();
        for handler in self.registry.iter() {
            let kind = handler.kind;
            if !desired.manages(kind) {
                continue;
            }
            let wanted = desired.elements(kind);
            if !handler.supports(observed.variant) {
                if wanted.is_empty() {
                    continue;
                }
                return Err(ReconcileError::KindNotSupported {
                    service: observed.service.clone(),
                    kind,
                    variant: observed.variant,
                });
            }
            let reconciler = SetReconciler::new(handler, &observed.service, observed.variant);
            let changeset = reconciler.diff(wanted, observed.elements(kind))?;
            reconciler.check_payloads(&changeset)?;
            if !changeset.is_empty() {
                debug!("{}: {}", kind, changeset.summary());
                changesets.insert(kind, changeset);
            }
        }
        Ok(Plan {
            service: observed.service.clone(),
            variant: observed.variant,
            changesets,
        })
    }

    /// Plan, clone the active version, apply, and then validate and activate
    /// according to [`RunOptions::activation`].
    pub async fn run(
        &self,
        desired: &DesiredState,
        observed: &ObservedState,
        interrupt: &InterruptState,
    ) -> Result<RunReport, ReconcileError> {
        let plan = self.plan(desired, observed)?;
        let service = plan.service.clone();
        let span = info_span!("Reconciling service", service = %service);
        self.run_plan(plan, observed.version, interrupt)
            .instrument(span)
            .await
    }

    async fn run_plan(
        &self,
        plan: Plan,
        observed_version: Option<VersionNumber>,
        interrupt: &InterruptState,
    ) -> Result<RunReport, ReconcileError> {
        let service = plan.service.clone();
        let mut report = RunReport {
            service: service.clone(),
            phase: Phase::Idle,
            source_version: observed_version,
            target_version: None,
            applied: BTreeMap::new(),
        };
        if plan.is_empty() {
            info!("No changes; {} stays {}", service, Phase::Idle);
            return Ok(report);
        }
        if interrupt.is_interrupted() {
            return Err(ReconcileError::Cancelled {
                service,
                version: None,
                completed: Vec::new(),
                not_attempted: plan.changesets.keys().copied().collect(),
            });
        }

        enter(&service, Phase::Cloning);
        let source = self.active_version(&service).await?;
        if observed_version.is_some_and(|v| v != source) {
            warn!(
                "observed state was read from version {} but version {} is active; cloning the active version",
                observed_version.map_or_else(String::new, |v| v.to_string()),
                source
            );
        }
        report.source_version = Some(source);
        let target = self.clone_version(&service, source).await?;
        report.target_version = Some(target);
        info!("Cloned version {} into {}", source, target);

        enter(&service, Phase::Applying);
        report.applied = self.apply_plan(plan, target, interrupt).await?;

        if self.options.activation == Activation::Discard {
            enter(&service, Phase::Abandoned);
            report.phase = Phase::Abandoned;
            return Ok(report);
        }

        self.validate(&service, target).await?;
        if self.options.activation == Activation::LeaveInactive {
            enter(&service, Phase::Staged);
            report.phase = Phase::Staged;
            return Ok(report);
        }

        enter(&service, Phase::Activating);
        let remote = &*self.remote;
        let svc = &service;
        retry_write(&self.options.retry, "activate", move || {
            remote.activate(svc, target)
        })
        .await
        .map_err(|source| ReconcileError::ActivationFailed {
            service: service.clone(),
            version: target,
            source,
        })?;
        enter(&service, Phase::Active);
        report.phase = Phase::Active;
        Ok(report)
    }

    async fn active_version(&self, service: &ServiceId) -> Result<VersionNumber, ReconcileError> {
        let remote = &*self.remote;
        let info = retry_read(&self.options.retry, "service details", move || {
            remote.service(service)
        })
        .await
        .map_err(|source| ReconcileError::RefreshFailed {
            service: service.clone(),
            version: None,
            kind: None,
            source,
        })?;
        Ok(info.active_version)
    }

    /// Clone `source`, waiting while another actor holds the edit lock.
    async fn clone_version(
        &self,
        service: &ServiceId,
        source: VersionNumber,
    ) -> Result<VersionNumber, ReconcileError> {
        let remote = &*self.remote;
        let retry = &self.options.retry;
        poll_while_locked(&self.options.lock, "clone", move || {
            retry_write(retry, "clone", move || remote.clone_version(service, source))
        })
        .await
        .map_err(|e| match e {
            RemoteError::LockTimeout { waited } => ReconcileError::LockTimeout {
                service: service.clone(),
                waited,
            },
            source_error => ReconcileError::CloneFailed {
                service: service.clone(),
                source_version: source,
                source: source_error,
            },
        })
    }

    async fn validate(
        &self,
        service: &ServiceId,
        version: VersionNumber,
    ) -> Result<(), ReconcileError> {
        let remote = &*self.remote;
        let validation = retry_read(&self.options.retry, "validate", move || {
            remote.validate(service, version)
        })
        .await
        .map_err(|source| ReconcileError::ActivationFailed {
            service: service.clone(),
            version,
            source,
        })?;
        if validation.ok {
            Ok(())
        } else {
            Err(ReconcileError::RemoteValidationRejected {
                service: service.clone(),
                version,
                problems: validation.problems,
            })
        }
    }

    async fn apply_plan(
        &self,
        plan: Plan,
        version: VersionNumber,
        interrupt: &InterruptState,
    ) -> Result<BTreeMap<Kind, ChangesetSummary>, ReconcileError> {
        let service = plan.service.clone();
        let order: Vec<Kind> = self
            .registry
            .kinds()
            .filter(|k| plan.changesets.contains_key(k))
            .collect();
        let parallel = self.options.max_parallel_kinds.max(1);
        let work = Arc::new(ApplyWork {
            remote: self.remote.clone(),
            registry: self.registry.clone(),
            service: service.clone(),
            variant: plan.variant,
            version,
            changesets: plan.changesets,
            retry: self.options.retry,
            permits: Semaphore::new(parallel),
            halt: AtomicBool::new(false),
            interrupt: interrupt.clone(),
        });
        let tracker = TaskTracker::new(work);

        let outcomes = if parallel == 1 {
            let mut outcomes = BTreeMap::new();
            for kind in &order {
                outcomes.insert(*kind, tracker.run(*kind).await);
            }
            outcomes
        } else {
            let mut thunks = BTreeMap::new();
            for kind in &order {
                thunks.insert(*kind, tracker.spawn(*kind).await);
            }
            Thunk::force_into_map(thunks).await
        };

        let mut applied = BTreeMap::new();
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut not_attempted = Vec::new();
        let mut cancelled = false;
        for kind in order {
            match outcomes.get(&kind) {
                Some(Ok(KindOutcome::Applied(summary))) => {
                    applied.insert(kind, *summary);
                    completed.push(kind);
                }
                Some(Ok(KindOutcome::Skipped(reason))) => {
                    debug!("{} not attempted: {}", kind, reason);
                    cancelled |= *reason == SkipReason::Interrupted;
                    not_attempted.push(kind);
                }
                Some(Err(e @ ReconcileError::DependencyCycle { .. })) => return Err(e.clone()),
                Some(Err(e)) => failed.push(KindFailure {
                    kind,
                    error: e.clone(),
                }),
                None => not_attempted.push(kind),
            }
        }

        if !failed.is_empty() {
            Err(ReconcileError::PartialApplyFailure {
                service,
                version,
                completed,
                failed,
                not_attempted,
            })
        } else if cancelled {
            Err(ReconcileError::Cancelled {
                service,
                version: Some(version),
                completed,
                not_attempted,
            })
        } else {
            Ok(applied)
        }
    }

    /// Read every kind the service variant offers from `version`, or from
    /// the active version. `prior` supplies the sticky settings.
    pub async fn observe(
        &self,
        service: &ServiceId,
        version: Option<VersionNumber>,
        prior: &DesiredState,
    ) -> Result<ObservedState, ReconcileError> {
        let remote = &*self.remote;
        let retry = &self.options.retry;
        let info = retry_read(retry, "service details", move || remote.service(service))
            .await
            .map_err(|source| ReconcileError::RefreshFailed {
                service: service.clone(),
                version,
                kind: None,
                source,
            })?;
        let version = version.unwrap_or(info.active_version);
        let mut observed = ObservedState::empty(service.clone(), info.variant);
        observed.version = Some(version);

        for handler in self.registry.iter() {
            let kind = handler.kind;
            if !handler.supports(info.variant) {
                continue;
            }
            let wire = retry_read(retry, "list", move || remote.list(service, version, kind))
                .instrument(info_span!("Refreshing kind", kind = %kind))
                .await
                .map_err(|source| ReconcileError::RefreshFailed {
                    service: service.clone(),
                    version: Some(version),
                    kind: Some(kind),
                    source,
                })?;
            let projector = StateProjector::new(handler, service, info.variant, Some(version));
            let elements = projector.project(&wire, prior.kinds.get(&kind))?;
            observed.set(kind, elements);
        }
        Ok(observed)
    }
}

fn enter(service: &ServiceId, phase: Phase) {
    info!("{}: {}", service, phase);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    /// An earlier kind failed.
    Halted,
    Interrupted,
    DependencyFailed(Kind),
}
impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Halted => write!(f, "an earlier kind failed"),
            SkipReason::Interrupted => write!(f, "interrupted"),
            SkipReason::DependencyFailed(kind) => write!(f, "{} did not complete", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KindOutcome {
    Applied(ChangesetSummary),
    Skipped(SkipReason),
}

/// Applies the changeset of one kind, once the kinds it refers to are done.
struct ApplyWork<R: RemoteApi + ?Sized + 'static> {
    remote: Arc<R>,
    registry: Arc<HandlerRegistry>,
    service: ServiceId,
    variant: ServiceVariant,
    version: VersionNumber,
    changesets: BTreeMap<Kind, Changeset>,
    retry: RetryPolicy,
    permits: Semaphore,
    /// Set by the first kind that fails.
    halt: AtomicBool,
    interrupt: InterruptState,
}

#[async_trait]
impl<R: RemoteApi + ?Sized + 'static> TaskWork for ApplyWork<R> {
    type Output = Result<KindOutcome, ReconcileError>;
    type Key = Kind;
    type CycleError = ReconcileError;

    async fn work(&self, context: TaskContext<Self>, kind: Kind) -> Self::Output {
        let (Some(handler), Some(changeset)) =
            (self.registry.get(kind), self.changesets.get(&kind))
        else {
            return Ok(KindOutcome::Applied(ChangesetSummary::default()));
        };

        for dep in handler.depends_on {
            if !self.changesets.contains_key(dep) {
                continue;
            }
            match context.require(*dep).await? {
                Ok(KindOutcome::Applied(_)) => {}
                Ok(KindOutcome::Skipped(SkipReason::Interrupted)) => {
                    return Ok(KindOutcome::Skipped(SkipReason::Interrupted))
                }
                Err(e @ ReconcileError::DependencyCycle { .. }) => return Err(e),
                _ => return Ok(KindOutcome::Skipped(SkipReason::DependencyFailed(*dep))),
            }
        }

        let Ok(_permit) = self.permits.acquire().await else {
            return Ok(KindOutcome::Skipped(SkipReason::Halted));
        };
        if self.interrupt.is_interrupted() {
            return Ok(KindOutcome::Skipped(SkipReason::Interrupted));
        }
        if self.halt.load(Ordering::SeqCst) {
            return Ok(KindOutcome::Skipped(SkipReason::Halted));
        }

        let reconciler = SetReconciler::new(handler, &self.service, self.variant);
        let result = reconciler
            .apply(&*self.remote, self.version, changeset, &self.retry)
            .instrument(info_span!("Applying kind", kind = %kind))
            .await;
        match result {
            Ok(summary) => {
                info!("Applied {}: {}", kind, summary);
                Ok(KindOutcome::Applied(summary))
            }
            Err(e) => {
                self.halt.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn cycle_error(&self, cycle: Cycle<Kind>) -> ReconcileError {
        ReconcileError::DependencyCycle {
            cycle: cycle.to_string(),
        }
    }
}
