use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::workflows::payments::domain::{
    AccessToken, GatewayProfile, GatewayStatus, InitiationReceipt, InitiationRequest,
    StatusReport, TransactionRef,
};
use crate::workflows::payments::gateway::{GatewayError, PaymentGateway};

/// Provider callbacks received by the portal, keyed by transaction.
#[derive(Debug, Clone, Default)]
pub struct NotificationInbox {
    reports: Arc<Mutex<HashMap<TransactionRef, StatusReport>>>,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn reports(&self) -> MutexGuard<'_, HashMap<TransactionRef, StatusReport>> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a callback. A terminal report is never replaced by a pending one.
    pub fn record(&self, transaction: TransactionRef, report: StatusReport) {
        let mut reports = self.reports();
        let keep_existing = reports.get(&transaction).is_some_and(|existing| {
            existing.status != GatewayStatus::Pending && report.status == GatewayStatus::Pending
        });
        if !keep_existing {
            debug!(transaction_ref = %transaction, status = ?report.status, "provider notification recorded");
            reports.insert(transaction, report);
        }
    }

    pub fn get(&self, transaction: &TransactionRef) -> Option<StatusReport> {
        self.reports().get(transaction).cloned()
    }

    /// Forget a transaction once its flow is released.
    pub fn remove(&self, transaction: &TransactionRef) -> Option<StatusReport> {
        self.reports().remove(transaction)
    }

    pub fn len(&self) -> usize {
        self.reports().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answers status checks from provider callbacks when one has arrived,
/// falling back to polling the wrapped gateway.
pub struct NotifiedGateway {
    inner: Arc<dyn PaymentGateway>,
    inbox: NotificationInbox,
}

impl NotifiedGateway {
    pub fn new(inner: Arc<dyn PaymentGateway>, inbox: NotificationInbox) -> Self {
        Self { inner, inbox }
    }
}

#[async_trait]
impl PaymentGateway for NotifiedGateway {
    fn profile(&self) -> &GatewayProfile {
        self.inner.profile()
    }

    async fn access_token(&self) -> Result<AccessToken, GatewayError> {
        self.inner.access_token().await
    }

    async fn initiate(
        &self,
        token: &AccessToken,
        request: &InitiationRequest,
    ) -> Result<InitiationReceipt, GatewayError> {
        self.inner.initiate(token, request).await
    }

    async fn fetch_status(
        &self,
        token: &AccessToken,
        transaction: &TransactionRef,
    ) -> Result<StatusReport, GatewayError> {
        match self.inbox.get(transaction) {
            Some(report) if report.status != GatewayStatus::Pending => Ok(report),
            _ => self.inner.fetch_status(token, transaction).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::payments::adapters::SandboxGateway;
    use crate::workflows::payments::domain::PaymentRequest;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_reports_are_not_downgraded() {
        let inbox = NotificationInbox::new();
        let transaction = TransactionRef("tx-1".to_string());
        inbox.record(transaction.clone(), StatusReport::success());
        inbox.record(transaction.clone(), StatusReport::pending());
        assert_eq!(
            inbox.get(&transaction).map(|report| report.status),
            Some(GatewayStatus::Success)
        );
        assert_eq!(inbox.len(), 1);

        assert!(inbox.remove(&transaction).is_some());
        assert!(inbox.is_empty());
        assert!(inbox.remove(&transaction).is_none());
    }

    #[tokio::test]
    async fn notification_short_circuits_polling() {
        let inbox = NotificationInbox::new();
        let sandbox: Arc<dyn PaymentGateway> =
            Arc::new(SandboxGateway::new().with_settle_after(10));
        let gateway = NotifiedGateway::new(sandbox, inbox.clone());

        let request = PaymentRequest::new(dec!(100), "XAF", "+237690000002")
            .validate(gateway.profile())
            .expect("valid");
        let token = gateway.access_token().await.expect("token");
        let receipt = gateway.initiate(&token, &request).await.expect("initiated");

        let first = gateway
            .fetch_status(&token, &receipt.transaction_ref)
            .await
            .expect("polled");
        assert_eq!(first.status, GatewayStatus::Pending);

        inbox.record(
            receipt.transaction_ref.clone(),
            StatusReport::failed("cancelled on handset"),
        );
        let second = gateway
            .fetch_status(&token, &receipt.transaction_ref)
            .await
            .expect("notified");
        assert_eq!(second.status, GatewayStatus::Failed);
        assert_eq!(second.message.as_deref(), Some("cancelled on handset"));
    }
}
