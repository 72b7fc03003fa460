use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::domain::{
    AccessToken, GatewayStatus, InitiationReceipt, InitiationRequest, PaymentRequest,
    PaymentStatus, PollingPolicy, Provider, StatusReport, TransactionRef, ValidationError,
};
use super::gateway::{GatewayError, PaymentGateway};

const CANCEL_WARNING: &str =
    "status checks stopped; the provider may still complete the transfer, check the transaction history";

/// Why a payment ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider never acknowledged the payment start.
    Initiation { message: String },
    /// The provider reported the payment as failed.
    Declined { message: String },
}

/// Terminal result reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded {
        transaction_ref: TransactionRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        transaction_ref: Option<TransactionRef>,
        reason: FailureReason,
    },
    /// Polling ran out; the real status is unknown.
    TimedOut {
        transaction_ref: TransactionRef,
        attempts: u32,
    },
}

impl PaymentOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            Self::Succeeded { .. } => PaymentStatus::Success,
            Self::Failed { .. } => PaymentStatus::Failed,
            Self::TimedOut { .. } => PaymentStatus::Timeout,
        }
    }
}

/// Observable state of a flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentSnapshot {
    pub provider: Provider,
    pub status: PaymentStatus,
    pub transaction_ref: Option<TransactionRef>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub cancelled: bool,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub payer: Option<String>,
    pub external_id: Option<String>,
    pub outcome: Option<PaymentOutcome>,
    pub updated_at: DateTime<Utc>,
}

/// Callback invoked once per terminal outcome.
pub trait PaymentObserver: Send + Sync {
    fn on_outcome(&self, snapshot: &PaymentSnapshot);
}

/// Returned by [`PaymentFlowController::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelNotice {
    pub status: PaymentStatus,
    pub transaction_ref: Option<TransactionRef>,
    pub warning: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("payment is {status}; cannot {action}")]
    InvalidState {
        status: PaymentStatus,
        action: &'static str,
    },
    #[error("no tokio runtime is available to drive the payment")]
    NoRuntime,
}

struct FlowState {
    generation: u64,
    status: PaymentStatus,
    transaction_ref: Option<TransactionRef>,
    attempts: u32,
    cancelled: bool,
    outcome: Option<PaymentOutcome>,
    request: Option<InitiationRequest>,
}

impl FlowState {
    fn idle() -> Self {
        Self {
            generation: 0,
            status: PaymentStatus::Idle,
            transaction_ref: None,
            attempts: 0,
            cancelled: false,
            outcome: None,
            request: None,
        }
    }

    fn settle(&mut self, outcome: PaymentOutcome) {
        self.status = outcome.status();
        self.outcome = Some(outcome);
    }

    fn snapshot(&self, provider: Provider, max_attempts: u32) -> PaymentSnapshot {
        let request = self.request.as_ref();
        PaymentSnapshot {
            provider,
            status: self.status,
            transaction_ref: self.transaction_ref.clone(),
            attempts: self.attempts,
            max_attempts,
            cancelled: self.cancelled,
            amount: request.map(|request| request.amount),
            currency: request.map(|request| request.currency.clone()),
            payer: request.map(|request| request.payer.e164()),
            external_id: request.map(|request| request.external_id.clone()),
            outcome: self.outcome.clone(),
            updated_at: Utc::now(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    provider: Provider,
    max_attempts: u32,
    state: Mutex<FlowState>,
    snapshots: watch::Sender<PaymentSnapshot>,
}

impl Shared {
    fn apply<R>(&self, change: impl FnOnce(&mut FlowState) -> R) -> R {
        let mut state = lock(&self.state);
        let result = change(&mut state);
        self.snapshots
            .send_replace(state.snapshot(self.provider, self.max_attempts));
        result
    }

    /// Apply `change` only while `generation` is still the live run.
    fn update<R>(&self, generation: u64, change: impl FnOnce(&mut FlowState) -> R) -> Option<R> {
        self.apply(|state| (state.generation == generation).then(|| change(state)))
    }
}

struct Run {
    task: JoinHandle<()>,
    cancel: Arc<Notify>,
}

/// Drives one mobile-money payment from initiation to a terminal outcome.
pub struct PaymentFlowController {
    gateway: Arc<dyn PaymentGateway>,
    policy: PollingPolicy,
    shared: Arc<Shared>,
    observer: Option<Arc<dyn PaymentObserver>>,
    run: Mutex<Option<Run>>,
}

impl PaymentFlowController {
    pub fn new(gateway: Arc<dyn PaymentGateway>, policy: PollingPolicy) -> Self {
        let provider = gateway.profile().provider;
        let max_attempts = policy.max_attempts;
        let state = FlowState::idle();
        let (snapshots, _) = watch::channel(state.snapshot(provider, max_attempts));

        Self {
            gateway,
            policy,
            shared: Arc::new(Shared {
                provider,
                max_attempts,
                state: Mutex::new(state),
                snapshots,
            }),
            observer: None,
            run: Mutex::new(None),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PaymentObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn provider(&self) -> Provider {
        self.shared.provider
    }

    pub fn policy(&self) -> PollingPolicy {
        self.policy
    }

    pub fn status(&self) -> PaymentStatus {
        lock(&self.shared.state).status
    }

    pub fn snapshot(&self) -> PaymentSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaymentSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Validate the request and launch initiation in the background.
    ///
    /// Invalid input fails here, before any gateway call. On success the
    /// status is `Initiating` when this returns.
    pub fn start(&self, request: PaymentRequest) -> Result<(), PaymentError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| PaymentError::NoRuntime)?;
        let initiation = request.validate(self.gateway.profile())?;

        let mut run = lock(&self.run);
        let generation = self.shared.apply(|state| {
            if state.status != PaymentStatus::Idle {
                return Err(PaymentError::InvalidState {
                    status: state.status,
                    action: "start",
                });
            }
            state.generation += 1;
            state.status = PaymentStatus::Initiating;
            state.attempts = 0;
            state.cancelled = false;
            state.transaction_ref = None;
            state.outcome = None;
            state.request = Some(initiation.clone());
            Ok(state.generation)
        })?;

        info!(
            provider = %self.shared.provider,
            amount = %initiation.amount,
            currency = %initiation.currency,
            payer = %initiation.payer,
            external_id = %initiation.external_id,
            "payment initiation started"
        );

        let cancel = Arc::new(Notify::new());
        let driver = Driver {
            gateway: self.gateway.clone(),
            policy: self.policy,
            shared: self.shared.clone(),
            observer: self.observer.clone(),
            cancel: cancel.clone(),
            generation,
            request: initiation,
        };
        let task = runtime.spawn(driver.run());
        *run = Some(Run { task, cancel });
        Ok(())
    }

    /// Stop future status checks without forcing a terminal state.
    pub fn cancel(&self) -> Result<CancelNotice, PaymentError> {
        let run = lock(&self.run);
        let notice = self.shared.apply(|state| {
            if !state.status.is_active() {
                return Err(PaymentError::InvalidState {
                    status: state.status,
                    action: "cancel",
                });
            }
            state.cancelled = true;
            Ok(CancelNotice {
                status: state.status,
                transaction_ref: state.transaction_ref.clone(),
                warning: CANCEL_WARNING,
            })
        })?;

        if let Some(run) = run.as_ref() {
            run.cancel.notify_one();
        }
        warn!(
            provider = %self.shared.provider,
            status = %notice.status,
            transaction_ref = ?notice.transaction_ref,
            "payment polling cancelled by host"
        );
        Ok(notice)
    }

    /// Return to `Idle`, dropping any run in progress.
    pub fn reset(&self) {
        let mut run = lock(&self.run);
        if let Some(previous) = run.take() {
            previous.cancel.notify_one();
            previous.task.abort();
        }
        self.shared.apply(|state| {
            let generation = state.generation + 1;
            *state = FlowState::idle();
            state.generation = generation;
        });
        debug!(provider = %self.shared.provider, "payment flow reset");
    }

    /// Wait until the flow settles, is cancelled, or is idle.
    pub async fn wait_settled(&self) -> Option<PaymentOutcome> {
        let mut receiver = self.subscribe();
        let settled = receiver
            .wait_for(|snapshot| {
                snapshot.outcome.is_some()
                    || snapshot.cancelled
                    || snapshot.status == PaymentStatus::Idle
            })
            .await;
        match settled {
            Ok(snapshot) => snapshot.outcome.clone(),
            Err(_) => None,
        }
    }
}

impl Drop for PaymentFlowController {
    fn drop(&mut self) {
        if let Some(run) = lock(&self.run).take() {
            run.task.abort();
        }
    }
}

impl fmt::Debug for PaymentFlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentFlowController")
            .field("provider", &self.shared.provider)
            .field("policy", &self.policy)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

enum Flow {
    Continue,
    Settled,
    Stop,
}

/// Background task owning one run: token, initiation, then sequential polls.
struct Driver {
    gateway: Arc<dyn PaymentGateway>,
    policy: PollingPolicy,
    shared: Arc<Shared>,
    observer: Option<Arc<dyn PaymentObserver>>,
    cancel: Arc<Notify>,
    generation: u64,
    request: InitiationRequest,
}

impl Driver {
    async fn run(self) {
        let mut token = match self.gateway.access_token().await {
            Ok(token) => token,
            Err(err) => {
                self.fail_initiation(format!("could not obtain access token: {err}"));
                return;
            }
        };

        let transaction = match self.gateway.initiate(&token, &self.request).await {
            Ok(receipt) => match self.acknowledge(receipt) {
                Some(transaction) => transaction,
                None => return,
            },
            Err(err) => {
                self.fail_initiation(err.to_string());
                return;
            }
        };

        // Checks run on a fixed schedule from the moment the provider
        // acknowledges; each one must answer before the next slot, and the
        // last one before the deadline.
        let entered = Instant::now();
        let deadline = entered + self.policy.deadline();
        let mut slot = entered;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(slot) => {}
                _ = self.cancel.notified() => {
                    debug!(transaction_ref = %transaction, "scheduled status check dropped");
                    return;
                }
            }

            let attempt = self
                .shared
                .update(self.generation, |state| {
                    if state.cancelled || state.status != PaymentStatus::PendingConfirmation {
                        return None;
                    }
                    state.attempts += 1;
                    Some(state.attempts)
                })
                .flatten();
            let Some(attempt) = attempt else {
                return;
            };

            slot += self.policy.interval;
            let answer_by = slot.min(deadline);
            let report = match tokio::time::timeout_at(
                answer_by,
                self.check_status(&mut token, &transaction),
            )
            .await
            {
                Ok(report) => report,
                Err(_) => Err(GatewayError::Unavailable(
                    "no answer before the next scheduled check".to_string(),
                )),
            };
            let expired = Instant::now() >= deadline;
            match self.record(attempt, expired, &transaction, report) {
                Flow::Continue => {}
                Flow::Settled => {
                    self.notify_observer();
                    return;
                }
                Flow::Stop => return,
            }
        }
    }

    async fn check_status(
        &self,
        token: &mut AccessToken,
        transaction: &TransactionRef,
    ) -> Result<StatusReport, GatewayError> {
        if token.is_expired() {
            *token = self.gateway.access_token().await?;
        }
        self.gateway.fetch_status(token, transaction).await
    }

    fn fail_initiation(&self, message: String) {
        warn!(provider = %self.shared.provider, error = %message, "payment initiation failed");
        let settled = self.shared.update(self.generation, |state| {
            if state.cancelled {
                return false;
            }
            state.settle(PaymentOutcome::Failed {
                transaction_ref: None,
                reason: FailureReason::Initiation { message },
            });
            true
        });
        if settled == Some(true) {
            self.notify_observer();
        }
    }

    /// Record the provider's acknowledgement; `Some` means polling should begin.
    fn acknowledge(&self, receipt: InitiationReceipt) -> Option<TransactionRef> {
        let InitiationReceipt {
            transaction_ref,
            initial_status,
            message,
        } = receipt;

        let flow = self.shared.update(self.generation, |state| {
            state.transaction_ref = Some(transaction_ref.clone());
            if state.cancelled {
                return Flow::Stop;
            }
            state.status = PaymentStatus::PendingConfirmation;
            match initial_status {
                GatewayStatus::Pending => Flow::Continue,
                GatewayStatus::Success => {
                    state.settle(PaymentOutcome::Succeeded {
                        transaction_ref: transaction_ref.clone(),
                        message: message.clone(),
                    });
                    Flow::Settled
                }
                GatewayStatus::Failed => {
                    state.settle(PaymentOutcome::Failed {
                        transaction_ref: Some(transaction_ref.clone()),
                        reason: FailureReason::Declined {
                            message: message
                                .clone()
                                .unwrap_or_else(|| "declined at initiation".to_string()),
                        },
                    });
                    Flow::Settled
                }
            }
        });

        match flow {
            Some(Flow::Continue) => {
                info!(
                    provider = %self.shared.provider,
                    transaction_ref = %transaction_ref,
                    "payment awaiting payer confirmation"
                );
                Some(transaction_ref)
            }
            Some(Flow::Settled) => {
                self.log_settled(&transaction_ref);
                self.notify_observer();
                None
            }
            _ => None,
        }
    }

    fn record(
        &self,
        attempt: u32,
        expired: bool,
        transaction: &TransactionRef,
        report: Result<StatusReport, GatewayError>,
    ) -> Flow {
        let report = match report {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    attempt,
                    transaction_ref = %transaction,
                    error = %err,
                    "status check failed; counting attempt as pending"
                );
                StatusReport::pending()
            }
        };
        debug!(attempt, transaction_ref = %transaction, status = ?report.status, "status checked");

        let max_attempts = self.policy.max_attempts;
        let flow = self.shared.update(self.generation, |state| {
            if state.cancelled {
                return Flow::Stop;
            }
            let outcome = match report.status {
                GatewayStatus::Success => PaymentOutcome::Succeeded {
                    transaction_ref: transaction.clone(),
                    message: report.message,
                },
                GatewayStatus::Failed => PaymentOutcome::Failed {
                    transaction_ref: Some(transaction.clone()),
                    reason: FailureReason::Declined {
                        message: report
                            .message
                            .unwrap_or_else(|| "payment declined by provider".to_string()),
                    },
                },
                GatewayStatus::Pending if expired || attempt >= max_attempts => {
                    PaymentOutcome::TimedOut {
                        transaction_ref: transaction.clone(),
                        attempts: attempt,
                    }
                }
                GatewayStatus::Pending => return Flow::Continue,
            };
            state.settle(outcome);
            Flow::Settled
        });

        match flow {
            Some(Flow::Settled) => {
                self.log_settled(transaction);
                Flow::Settled
            }
            Some(Flow::Continue) => Flow::Continue,
            _ => Flow::Stop,
        }
    }

    fn log_settled(&self, transaction: &TransactionRef) {
        let snapshot = self.shared.snapshots.borrow().clone();
        info!(
            provider = %self.shared.provider,
            transaction_ref = %transaction,
            status = %snapshot.status,
            attempts = snapshot.attempts,
            "payment settled"
        );
    }

    fn notify_observer(&self) {
        if let Some(observer) = &self.observer {
            let snapshot = self.shared.snapshots.borrow().clone();
            observer.on_outcome(&snapshot);
        }
    }
}
