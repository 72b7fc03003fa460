use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::workflows::payments::controller::{
    PaymentFlowController, PaymentObserver, PaymentSnapshot,
};
use crate::workflows::payments::domain::{
    AccessToken, Country, GatewayProfile, GatewayStatus, InitiationReceipt, InitiationRequest,
    PaymentRequest, PaymentStatus, PollingPolicy, Provider, StatusReport, TransactionRef,
};
use crate::workflows::payments::gateway::{GatewayError, PaymentGateway};

pub(super) const PAYER: &str = "+237690000000";
pub(super) const INTERVAL: Duration = Duration::from_millis(2_500);
pub(super) const CALLBACK_TOKEN: &str = "cb-test-token";

pub(super) fn policy(max_attempts: u32) -> PollingPolicy {
    PollingPolicy {
        interval: INTERVAL,
        max_attempts,
    }
}

pub(super) fn request() -> PaymentRequest {
    PaymentRequest::new(dec!(5000), "XAF", PAYER).with_external_id("lease-deposit-7")
}

pub(super) fn receipt(reference: &str) -> InitiationReceipt {
    InitiationReceipt {
        transaction_ref: TransactionRef(reference.to_string()),
        initial_status: GatewayStatus::Pending,
        message: None,
    }
}

/// Gateway whose answers are queued up front by the test.
pub(super) struct ScriptedGateway {
    profile: GatewayProfile,
    token_ttl: u64,
    token_failure: Option<String>,
    initiation: Result<InitiationReceipt, String>,
    statuses: Mutex<VecDeque<Result<StatusReport, String>>>,
    initiate_gate: Option<Arc<tokio::sync::Notify>>,
    status_delay: Option<Duration>,
    status_hangs: bool,
    token_calls: AtomicU32,
    initiate_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl ScriptedGateway {
    pub(super) fn new(initiation: Result<InitiationReceipt, String>) -> Self {
        Self {
            profile: GatewayProfile {
                provider: Provider::MtnMomo,
                currencies: vec!["XAF".to_string()],
                countries: vec![Country::Cameroon],
            },
            token_ttl: 3600,
            token_failure: None,
            initiation,
            statuses: Mutex::new(VecDeque::new()),
            initiate_gate: None,
            status_delay: None,
            status_hangs: false,
            token_calls: AtomicU32::new(0),
            initiate_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }

    pub(super) fn accepting(reference: &str) -> Self {
        Self::new(Ok(receipt(reference)))
    }

    pub(super) fn with_statuses(
        self,
        statuses: impl IntoIterator<Item = Result<StatusReport, String>>,
    ) -> Self {
        self.statuses
            .lock()
            .expect("statuses lock")
            .extend(statuses);
        self
    }

    pub(super) fn with_token_ttl(mut self, ttl: u64) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub(super) fn with_token_failure(mut self, message: &str) -> Self {
        self.token_failure = Some(message.to_string());
        self
    }

    pub(super) fn with_initiate_gate(mut self, gate: Arc<tokio::sync::Notify>) -> Self {
        self.initiate_gate = Some(gate);
        self
    }

    pub(super) fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = Some(delay);
        self
    }

    /// Status checks never answer.
    pub(super) fn hanging(mut self) -> Self {
        self.status_hangs = true;
        self
    }

    pub(super) fn token_calls(&self) -> u32 {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub(super) fn initiate_calls(&self) -> u32 {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub(super) fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn profile(&self) -> &GatewayProfile {
        &self.profile
    }

    async fn access_token(&self) -> Result<AccessToken, GatewayError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        match &self.token_failure {
            Some(message) => Err(GatewayError::Unavailable(message.clone())),
            None => Ok(AccessToken::new("scripted-token", self.token_ttl)),
        }
    }

    async fn initiate(
        &self,
        _token: &AccessToken,
        _request: &InitiationRequest,
    ) -> Result<InitiationReceipt, GatewayError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.initiate_gate {
            gate.notified().await;
        }
        self.initiation.clone().map_err(|message| GatewayError::Rejected {
            status: 400,
            message,
        })
    }

    async fn fetch_status(
        &self,
        _token: &AccessToken,
        _transaction: &TransactionRef,
    ) -> Result<StatusReport, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.status_hangs {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.status_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.statuses.lock().expect("statuses lock").pop_front();
        match next {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(GatewayError::Unavailable(message)),
            None => Ok(StatusReport::pending()),
        }
    }
}

pub(super) fn controller(
    gateway: &Arc<ScriptedGateway>,
    max_attempts: u32,
) -> PaymentFlowController {
    let gateway: Arc<dyn PaymentGateway> = gateway.clone();
    PaymentFlowController::new(gateway, policy(max_attempts))
}

pub(super) async fn wait_for_status(controller: &PaymentFlowController, status: PaymentStatus) {
    let mut receiver = controller.subscribe();
    receiver
        .wait_for(|snapshot| snapshot.status == status)
        .await
        .expect("controller alive");
}

/// Observer recording every terminal snapshot it is handed.
#[derive(Default)]
pub(super) struct RecordingObserver {
    seen: Mutex<Vec<PaymentSnapshot>>,
}

impl RecordingObserver {
    pub(super) fn seen(&self) -> Vec<PaymentSnapshot> {
        self.seen.lock().expect("observer lock").clone()
    }
}

impl PaymentObserver for RecordingObserver {
    fn on_outcome(&self, snapshot: &PaymentSnapshot) {
        self.seen
            .lock()
            .expect("observer lock")
            .push(snapshot.clone());
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&body).expect("json body")
}
