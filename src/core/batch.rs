//! Sequential batch execution of side-effecting work items with bounded
//! failure handling.
//!
//! Every item is attempted once. A failing item is logged, recorded in the
//! report and followed by [`BatchAction::recover`]. After
//! `max_consecutive_failures` failures in a row the environment is rebuilt
//! with [`BatchAction::reset`] and the run carries on with the next item.
//! There is no backoff and no second attempt within a run.

use crate::config::toml_config::AppConfig;
use crate::utils::error::{FailureKind, OpsError, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Instant;
use tokio::sync::watch;

/// What a successful item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Done,
    /// The target already existed; nothing was changed.
    AlreadyExists,
}

#[async_trait]
pub trait BatchAction<T: Sync>: Send {
    async fn run(&mut self, item: &T) -> Result<ItemOutcome>;

    /// Called after every failed item, e.g. to navigate back to a known page.
    async fn recover(&mut self) -> Result<()> {
        Ok(())
    }

    /// Rebuilds the execution environment after too many failures in a row.
    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_consecutive_failures: usize,
    pub max_total_failures: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            max_total_failures: None,
        }
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures().max(1),
            max_total_failures: config.max_total_failures(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    Interrupted,
    /// `max_total_failures` was reached.
    ErrorLimit,
    /// The environment could not be rebuilt.
    ResetFailed,
    /// An item failed with a non-recoverable error.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub label: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Labels of the items that ran to `ItemOutcome::Done`, in order.
    pub succeeded_labels: Vec<String>,
    pub already_existing: usize,
    pub failures: Vec<ItemFailure>,
    pub resets: usize,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    fn new() -> Self {
        Self {
            attempted: 0,
            succeeded: 0,
            succeeded_labels: Vec::new(),
            already_existing: 0,
            failures: Vec::new(),
            resets: 0,
            outcome: BatchOutcome::Completed,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.outcome == BatchOutcome::Completed && self.failures.is_empty()
    }

    /// Passes a completed run through. An interrupted run becomes
    /// [`OpsError::Interrupted`]; every other early stop becomes
    /// [`OpsError::BatchStopped`].
    pub fn into_result(self) -> Result<Self> {
        match self.outcome {
            BatchOutcome::Completed => Ok(self),
            BatchOutcome::Interrupted => Err(OpsError::Interrupted),
            outcome => Err(OpsError::BatchStopped {
                outcome: format!("{:?}", outcome),
                summary: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} done, {} already existing, {} failed, {} resets ({:?})",
            self.attempted,
            self.succeeded,
            self.already_existing,
            self.failed(),
            self.resets,
            self.outcome
        )
    }
}

/// Receiving side of the user-interrupt flag.
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    rx: watch::Receiver<bool>,
}

/// Setting side of the user-interrupt flag.
#[derive(Debug)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

pub fn interrupt_channel() -> (InterruptHandle, InterruptSignal) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle { tx }, InterruptSignal { rx })
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    /// Raises the flag on the first Ctrl-C.
    pub fn on_ctrl_c(self) {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current step");
                self.interrupt();
            }
        });
    }
}

impl InterruptSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, signal) = interrupt_channel();
        signal
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    async fn fired(&mut self) {
        if self.rx.wait_for(|set| *set).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct BatchRunner {
    name: String,
    policy: RetryPolicy,
}

impl BatchRunner {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    pub async fn run<T, A>(
        &self,
        items: &[T],
        action: &mut A,
        interrupt: &InterruptSignal,
    ) -> BatchReport
    where
        T: fmt::Display + Sync,
        A: BatchAction<T>,
    {
        let started = Instant::now();
        let mut interrupt = interrupt.clone();
        let mut report = BatchReport::new();
        let mut consecutive = 0usize;

        tracing::info!("🚀 {}: {} items", self.name, items.len());

        for item in items {
            if interrupt.is_set() {
                report.outcome = BatchOutcome::Interrupted;
                break;
            }

            report.attempted += 1;
            let label = item.to_string();
            let result = tokio::select! {
                result = action.run(item) => result,
                _ = interrupt.fired() => Err(OpsError::Interrupted),
            };

            let err = match result {
                Ok(ItemOutcome::Done) => {
                    report.succeeded += 1;
                    report.succeeded_labels.push(label.clone());
                    consecutive = 0;
                    tracing::debug!("✅ {}", label);
                    continue;
                }
                Ok(ItemOutcome::AlreadyExists) => {
                    report.already_existing += 1;
                    consecutive = 0;
                    tracing::info!("{} already exists", label);
                    continue;
                }
                Err(OpsError::Interrupted) => {
                    tracing::warn!("Interrupted while working on {}", label);
                    report.outcome = BatchOutcome::Interrupted;
                    break;
                }
                Err(err) => err,
            };

            let kind = err.failure_kind();
            match kind {
                FailureKind::Timeout => tracing::error!("⏱️ Timeout failure on {}: {}", label, err),
                FailureKind::StaleElement => {
                    tracing::error!("Stale element on {}: {}", label, err)
                }
                FailureKind::Other | FailureKind::Fatal => {
                    tracing::error!("❌ Error on {}: {}", label, err)
                }
            }
            report.failures.push(ItemFailure {
                label,
                kind,
                message: err.to_string(),
            });

            if kind.is_fatal() {
                report.outcome = BatchOutcome::Aborted;
                break;
            }

            if let Err(e) = action.recover().await {
                tracing::warn!("Recovery after failure did not complete: {}", e);
            }

            if let Some(max) = self.policy.max_total_failures {
                if report.failed() >= max {
                    tracing::error!("{}: stopping after {} failures", self.name, max);
                    report.outcome = BatchOutcome::ErrorLimit;
                    break;
                }
            }

            consecutive += 1;
            if consecutive >= self.policy.max_consecutive_failures {
                tracing::warn!(
                    "{}: {} failures in a row, resetting the session",
                    self.name,
                    consecutive
                );
                report.resets += 1;
                if let Err(e) = action.reset().await {
                    tracing::error!("{}: reset failed: {}", self.name, e);
                    report.outcome = BatchOutcome::ResetFailed;
                    break;
                }
                consecutive = 0;
            }
        }

        tracing::info!(
            "{} finished in {:?}: {}",
            self.name,
            started.elapsed(),
            report
        );
        report
    }
}
