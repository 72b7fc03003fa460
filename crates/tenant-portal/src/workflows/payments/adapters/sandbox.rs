use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::workflows::payments::domain::{
    AccessToken, Country, GatewayProfile, GatewayStatus, InitiationReceipt, InitiationRequest,
    Provider, StatusReport, TransactionRef,
};
use crate::workflows::payments::gateway::{GatewayError, PaymentGateway};

const DEFAULT_SETTLE_AFTER: u32 = 2;
const DEFAULT_DECLINE_SUFFIX: &str = "13";

#[derive(Debug, Clone, Copy)]
struct Pending {
    polls: u32,
    settles_as: GatewayStatus,
}

#[derive(Debug, Deserialize)]
struct SandboxNotification {
    transaction_ref: TransactionRef,
    status: GatewayStatus,
    #[serde(default)]
    message: Option<String>,
}

/// In-process gateway for development and demos.
///
/// Every payment stays pending for `settle_after` polls and then succeeds,
/// unless the payer's number ends with the decline suffix.
#[derive(Debug)]
pub struct SandboxGateway {
    profile: GatewayProfile,
    settle_after: u32,
    decline_suffix: Option<String>,
    sequence: AtomicU64,
    transactions: Mutex<HashMap<TransactionRef, Pending>>,
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self {
            profile: GatewayProfile {
                provider: Provider::Sandbox,
                currencies: ["XAF", "XOF", "GHS", "UGX", "RWF", "ZMW", "EUR"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                countries: Country::ordered().to_vec(),
            },
            settle_after: DEFAULT_SETTLE_AFTER,
            decline_suffix: Some(DEFAULT_DECLINE_SUFFIX.to_string()),
            sequence: AtomicU64::new(0),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settle_after(mut self, polls: u32) -> Self {
        self.settle_after = polls.max(1);
        self
    }

    pub fn with_decline_suffix(mut self, suffix: Option<&str>) -> Self {
        self.decline_suffix = suffix.map(str::to_string);
        self
    }

    pub fn with_countries(mut self, countries: Vec<Country>) -> Self {
        self.profile.countries = countries;
        self
    }

    /// Read a `{ "transaction_ref", "status" }` callback as sent by the demo tooling.
    pub fn parse_notification(body: &Value) -> Option<(TransactionRef, StatusReport)> {
        let notification: SandboxNotification = serde_json::from_value(body.clone()).ok()?;
        Some((
            notification.transaction_ref,
            StatusReport {
                status: notification.status,
                message: notification.message,
            },
        ))
    }

    fn declines(&self, request: &InitiationRequest) -> bool {
        self.decline_suffix
            .as_deref()
            .is_some_and(|suffix| request.payer.national().ends_with(suffix))
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn profile(&self) -> &GatewayProfile {
        &self.profile
    }

    async fn access_token(&self) -> Result<AccessToken, GatewayError> {
        Ok(AccessToken::new("sandbox-token", 3600))
    }

    async fn initiate(
        &self,
        _token: &AccessToken,
        request: &InitiationRequest,
    ) -> Result<InitiationReceipt, GatewayError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let transaction_ref = TransactionRef(format!("sbx-{id:06}"));
        let settles_as = if self.declines(request) {
            GatewayStatus::Failed
        } else {
            GatewayStatus::Success
        };

        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                transaction_ref.clone(),
                Pending {
                    polls: 0,
                    settles_as,
                },
            );
        debug!(transaction_ref = %transaction_ref, settles_as = ?settles_as, "sandbox payment created");

        Ok(InitiationReceipt {
            transaction_ref,
            initial_status: GatewayStatus::Pending,
            message: Some("sandbox payment awaiting confirmation".to_string()),
        })
    }

    async fn fetch_status(
        &self,
        _token: &AccessToken,
        transaction: &TransactionRef,
    ) -> Result<StatusReport, GatewayError> {
        let mut transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(pending) = transactions.get_mut(transaction) else {
            return Err(GatewayError::Rejected {
                status: 404,
                message: format!("unknown sandbox transaction {transaction}"),
            });
        };

        pending.polls += 1;
        if pending.polls < self.settle_after {
            return Ok(StatusReport::pending());
        }
        Ok(match pending.settles_as {
            GatewayStatus::Failed => StatusReport::failed("payer declined the sandbox prompt"),
            status => StatusReport {
                status,
                message: None,
            },
        })
    }
}
