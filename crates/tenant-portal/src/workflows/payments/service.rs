use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PaymentsConfig;

use super::adapters::{
    MtnMomoGateway, NotificationInbox, NotifiedGateway, OrangeMoneyGateway, SandboxGateway,
};
use super::controller::{
    CancelNotice, PaymentError, PaymentFlowController, PaymentObserver, PaymentSnapshot,
};
use super::domain::{PaymentRequest, PaymentStatus, PollingPolicy, Provider, TransactionRef};
use super::gateway::PaymentGateway;

/// Identifier the portal hands out for a payment flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub String);

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn next_payment_id() -> PaymentId {
    PaymentId(format!("pay-{}", uuid::Uuid::new_v4().simple()))
}

/// Read access to payment outcomes for other workflows.
pub trait PaymentLookup: Send + Sync {
    fn payment_status(&self, payment_id: &PaymentId) -> Option<PaymentStatus>;
}

/// Registry of gateways plus one controller per started payment.
pub struct PaymentService {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
    policy: PollingPolicy,
    inbox: NotificationInbox,
    observer: Option<Arc<dyn PaymentObserver>>,
    callback_token: Option<String>,
    flows: RwLock<Flows>,
}

type Flows = HashMap<PaymentId, Arc<PaymentFlowController>>;

impl PaymentService {
    pub fn new(policy: PollingPolicy) -> Self {
        Self {
            gateways: HashMap::new(),
            policy,
            inbox: NotificationInbox::new(),
            observer: None,
            callback_token: None,
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Build the service with every provider the configuration enables.
    pub fn from_config(config: &PaymentsConfig) -> Result<Self, PaymentServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let mut service = Self::new(config.polling_policy());
        if let Some(token) = &config.callback_token {
            service = service.with_callback_token(token.clone());
        }

        if let Some(momo) = &config.mtn_momo {
            service = service.register(Arc::new(MtnMomoGateway::with_client(
                http.clone(),
                momo.clone(),
            )));
        }
        if let Some(orange) = &config.orange_money {
            service = service.register(Arc::new(OrangeMoneyGateway::with_client(
                http.clone(),
                orange.clone(),
            )));
        }
        if config.sandbox {
            service = service.register(Arc::new(SandboxGateway::new()));
        }

        info!(
            providers = ?service.providers(),
            callbacks = service.callback_token.is_some(),
            "payment gateways registered"
        );
        Ok(service)
    }

    /// Register a gateway; provider callbacks recorded in the shared inbox
    /// take precedence over its status endpoint.
    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        let provider = gateway.profile().provider;
        let notified = NotifiedGateway::new(gateway, self.inbox.clone());
        self.gateways.insert(provider, Arc::new(notified));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PaymentObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Shared secret provider callbacks must present. Without one every
    /// callback is refused and flows rely on polling alone.
    pub fn with_callback_token(mut self, token: impl Into<String>) -> Self {
        self.callback_token = Some(token.into());
        self
    }

    pub fn policy(&self) -> PollingPolicy {
        self.policy
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|provider| provider.label());
        providers
    }

    pub fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }

    fn flows(&self) -> RwLockReadGuard<'_, Flows> {
        self.flows.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and launch a payment through `provider`.
    pub fn start(
        &self,
        provider: Provider,
        request: PaymentRequest,
    ) -> Result<(PaymentId, PaymentSnapshot), PaymentServiceError> {
        let gateway = self
            .gateways
            .get(&provider)
            .cloned()
            .ok_or(PaymentServiceError::ProviderUnavailable(provider))?;

        let mut controller = PaymentFlowController::new(gateway, self.policy);
        if let Some(observer) = &self.observer {
            controller = controller.with_observer(observer.clone());
        }
        controller.start(request)?;

        let payment_id = next_payment_id();
        let snapshot = controller.snapshot();
        self.flows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(payment_id.clone(), Arc::new(controller));
        info!(payment_id = %payment_id, provider = %provider, "payment registered");

        Ok((payment_id, snapshot))
    }

    pub fn controller(&self, payment_id: &PaymentId) -> Option<Arc<PaymentFlowController>> {
        self.flows().get(payment_id).cloned()
    }

    pub fn snapshot(&self, payment_id: &PaymentId) -> Result<PaymentSnapshot, PaymentServiceError> {
        self.controller(payment_id)
            .map(|controller| controller.snapshot())
            .ok_or_else(|| PaymentServiceError::NotFound(payment_id.clone()))
    }

    pub fn cancel(&self, payment_id: &PaymentId) -> Result<CancelNotice, PaymentServiceError> {
        let controller = self
            .controller(payment_id)
            .ok_or_else(|| PaymentServiceError::NotFound(payment_id.clone()))?;
        Ok(controller.cancel()?)
    }

    /// Drop a payment once the host has consumed its outcome.
    pub fn release(&self, payment_id: &PaymentId) -> Result<PaymentSnapshot, PaymentServiceError> {
        let mut flows = self.flows.write().unwrap_or_else(PoisonError::into_inner);
        let controller = flows
            .get(payment_id)
            .ok_or_else(|| PaymentServiceError::NotFound(payment_id.clone()))?;
        let snapshot = controller.snapshot();
        if snapshot.status.is_active() && !snapshot.cancelled {
            return Err(PaymentError::InvalidState {
                status: snapshot.status,
                action: "release",
            }
            .into());
        }
        flows.remove(payment_id);
        if let Some(transaction) = &snapshot.transaction_ref {
            self.inbox.remove(transaction);
        }
        debug!(payment_id = %payment_id, status = %snapshot.status, "payment released");
        Ok(snapshot)
    }

    /// Whether `transaction` belongs to a flow of `provider` still awaiting
    /// its outcome.
    fn is_live(&self, provider: Provider, transaction: &TransactionRef) -> bool {
        self.flows().values().any(|controller| {
            let snapshot = controller.snapshot();
            snapshot.provider == provider
                && snapshot.transaction_ref.as_ref() == Some(transaction)
                && snapshot.status.is_active()
                && !snapshot.cancelled
        })
    }

    /// Feed a provider callback body into the notification inbox.
    ///
    /// The callback must carry the configured token and name a transaction
    /// of a live flow for that provider.
    pub fn record_notification(
        &self,
        provider: Provider,
        token: Option<&str>,
        body: &Value,
    ) -> Result<(), PaymentServiceError> {
        if !self.gateways.contains_key(&provider) {
            return Err(PaymentServiceError::ProviderUnavailable(provider));
        }
        let authorised = match (&self.callback_token, token) {
            (Some(expected), Some(given)) => tokens_match(expected, given),
            _ => false,
        };
        if !authorised {
            warn!(provider = %provider, "provider notification refused: bad or missing token");
            return Err(PaymentServiceError::UnauthorisedNotification(provider));
        }
        let parsed = match provider {
            Provider::MtnMomo => MtnMomoGateway::parse_notification(body),
            Provider::OrangeMoney => OrangeMoneyGateway::parse_notification(body),
            Provider::Sandbox => SandboxGateway::parse_notification(body),
        };
        let Some((transaction, report)) = parsed else {
            warn!(provider = %provider, "unreadable provider notification");
            return Err(PaymentServiceError::UnreadableNotification(provider));
        };
        if !self.is_live(provider, &transaction) {
            warn!(provider = %provider, transaction_ref = %transaction, "notification for no live payment");
            return Err(PaymentServiceError::UnknownTransaction(transaction));
        }
        self.inbox.record(transaction, report);
        Ok(())
    }
}

/// Compare without stopping at the first differing byte.
fn tokens_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |diff, (left, right)| diff | (left ^ right))
            == 0
}

impl PaymentLookup for PaymentService {
    fn payment_status(&self, payment_id: &PaymentId) -> Option<PaymentStatus> {
        self.controller(payment_id).map(|controller| controller.status())
    }
}

impl fmt::Debug for PaymentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentService")
            .field("providers", &self.providers())
            .field("policy", &self.policy)
            .field("flows", &self.flows().len())
            .finish_non_exhaustive()
    }
}

/// Error raised by the payment service.
#[derive(Debug, thiserror::Error)]
pub enum PaymentServiceError {
    #[error("{0} is not configured")]
    ProviderUnavailable(Provider),
    #[error("payment {0} not found")]
    NotFound(PaymentId),
    #[error("could not read {0} notification")]
    UnreadableNotification(Provider),
    #[error("{0} notification is not authorised")]
    UnauthorisedNotification(Provider),
    #[error("no payment awaits transaction {0}")]
    UnknownTransaction(TransactionRef),
    #[error("could not build the payment HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}
