//! Enforcement sweeps.
//!
//! A sweep visits every account, classifies it, marks whatever the
//! classification calls for and then reconciles the marked set (new marks
//! plus marks left over from earlier failed attempts) in one batch. Each
//! sweep leaves exactly one [`EnforcementRun`] in the audit log.
//!
//! Accounts are claimed for the duration of a sweep so two overlapping
//! sweeps never process the same account. Cancellation is observed only
//! between accounts; reconciliation of already-processed accounts always
//! completes.

use crate::application::error::EngineError;
use crate::application::metrics::Metrics;
use crate::application::mutator::LimitMutator;
use crate::application::ports::{Clock, QuotaStore};
use crate::application::reconciler::DeletionReconciler;
use crate::domain::account::{AccountId, Actor};
use crate::domain::resource::ResourceId;
use crate::domain::run::{AccountFailure, EnforcementRun, RunCounts, RunId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Cooperative cancellation flag for a sweep. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct SweepCancellation {
    cancelled: Arc<AtomicBool>,
}

impl SweepCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask running sweeps to stop at the next account boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Held while a sweep owns an account; releases the claim on drop.
struct AccountClaim {
    claims: Arc<DashMap<AccountId, RunId>>,
    account_id: AccountId,
}

impl Drop for AccountClaim {
    fn drop(&mut self) {
        self.claims.remove(&self.account_id);
    }
}

/// Runs enforcement sweeps over every account.
pub struct EnforcementScheduler<S>
where
    S: QuotaStore,
{
    store: Arc<S>,
    mutator: Arc<LimitMutator<S>>,
    reconciler: Arc<DeletionReconciler<S>>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    claims: Arc<DashMap<AccountId, RunId>>,
}

impl<S> EnforcementScheduler<S>
where
    S: QuotaStore,
{
    pub fn new(
        store: Arc<S>,
        mutator: Arc<LimitMutator<S>>,
        reconciler: Arc<DeletionReconciler<S>>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            mutator,
            reconciler,
            clock,
            metrics,
            claims: Arc::new(DashMap::new()),
        }
    }

    /// Run one sweep to completion.
    pub async fn run_sweep(&self, initiator: &Actor) -> Result<EnforcementRun, EngineError> {
        self.run_sweep_with(initiator, &SweepCancellation::new())
            .await
    }

    /// Run one sweep, stopping early at an account boundary if `cancel` fires.
    ///
    /// Only a failure to list accounts or to persist the run record is
    /// returned as an error; per-account failures are recorded in the run.
    #[tracing::instrument(skip_all, fields(initiator = %initiator))]
    pub async fn run_sweep_with(
        &self,
        initiator: &Actor,
        cancel: &SweepCancellation,
    ) -> Result<EnforcementRun, EngineError> {
        let run_id = RunId::new();
        let started_at = self.clock.now();
        let accounts = self.store.accounts().map_err(EngineError::Storage)?;

        let mut counts = RunCounts::default();
        let mut account_failures = Vec::new();
        let mut batch = Vec::new();
        let mut claims = Vec::new();
        let mut cancelled = false;

        for account in &accounts {
            if cancel.is_cancelled() {
                cancelled = true;
                tracing::info!(run_id = %run_id, "Sweep cancelled at account boundary");
                break;
            }

            let Some(claim) = self.claim(&account.id, run_id) else {
                counts.accounts_skipped += 1;
                tracing::debug!(account_id = %account.id, "Account claimed by another sweep");
                continue;
            };
            claims.push(claim);
            counts.accounts_examined += 1;

            match self.process_account(&account.id, initiator).await {
                Ok((marked, retried)) => {
                    counts.marked += marked.len();
                    counts.retried += retried.len();
                    batch.extend(retried);
                    batch.extend(marked);
                }
                Err(err) => {
                    self.metrics.record_account_failure();
                    tracing::warn!(account_id = %account.id, error = %err, "Account enforcement failed");
                    account_failures.push(AccountFailure {
                        account_id: account.id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let outcomes = self.reconciler.reconcile(&batch).await;
        counts.record_outcomes(&outcomes);
        drop(claims);

        let run = EnforcementRun {
            id: run_id,
            initiator: initiator.clone(),
            started_at,
            finished_at: self.clock.now(),
            counts,
            outcomes,
            account_failures,
            cancelled,
        };
        self.store
            .append_run(run.clone())
            .map_err(EngineError::Storage)?;
        self.metrics.record_sweep();

        tracing::info!(
            run_id = %run.id,
            accounts = counts.accounts_examined,
            skipped = counts.accounts_skipped,
            marked = counts.marked,
            retried = counts.retried,
            deleted = counts.deleted,
            failed = counts.failed,
            "Sweep completed"
        );
        Ok(run)
    }

    /// Enforce one account. Returns the newly marked and the previously
    /// marked resources.
    async fn process_account(
        &self,
        account_id: &AccountId,
        initiator: &Actor,
    ) -> Result<(Vec<ResourceId>, Vec<ResourceId>), EngineError> {
        let retried: Vec<ResourceId> = self
            .store
            .resources_for(account_id)?
            .into_iter()
            .filter(|r| r.is_marked())
            .map(|r| r.id)
            .collect();
        let outcome = self.mutator.enforce(account_id, initiator).await?;
        Ok((outcome.marked_ids().to_vec(), retried))
    }

    fn claim(&self, account_id: &AccountId, run_id: RunId) -> Option<AccountClaim> {
        match self.claims.entry(account_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(run_id);
                Some(AccountClaim {
                    claims: Arc::clone(&self.claims),
                    account_id: account_id.clone(),
                })
            }
        }
    }

    /// Whether a sweep currently owns `account_id`.
    pub fn is_claimed(&self, account_id: &AccountId) -> bool {
        self.claims.contains_key(account_id)
    }

    /// Run a sweep every `interval` on the current tokio runtime.
    ///
    /// The first sweep starts immediately. Ticks missed while a sweep is
    /// still running are skipped.
    pub fn start(self: Arc<Self>, interval: Duration, initiator: Actor) -> SweepHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let cancel = SweepCancellation::new();
        let task_cancel = cancel.clone();
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_sweep_with(&initiator, &task_cancel).await {
                            tracing::warn!(error = %err, "Scheduled sweep failed");
                        }
                        if task_cancel.is_cancelled() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Sweep task stopped");
        });

        SweepHandle {
            shutdown: shutdown_tx,
            cancel,
            task,
        }
    }
}

/// Error returned by [`SweepHandle::shutdown`].
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("sweep task panicked or was aborted: {0}")]
    TaskFailed(String),
}

/// Handle to a periodic sweep task started by [`EnforcementScheduler::start`].
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: oneshot::Sender<()>,
    cancel: SweepCancellation,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the task and wait for it to finish.
    ///
    /// A sweep in progress stops at its next account boundary after
    /// reconciling the accounts it already processed.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        self.cancel.cancel();
        // The task may already have exited; nothing is listening then.
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|err| ShutdownError::TaskFailed(err.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
