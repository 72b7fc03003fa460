use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tenant_portal::workflows::payments::{PaymentObserver, PaymentOutcome, PaymentSnapshot};
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Writes one structured log line per settled payment.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoggingPaymentObserver;

impl PaymentObserver for LoggingPaymentObserver {
    fn on_outcome(&self, snapshot: &PaymentSnapshot) {
        let transaction_ref = snapshot
            .transaction_ref
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let external_id = snapshot.external_id.as_deref().unwrap_or_default();

        match &snapshot.outcome {
            Some(PaymentOutcome::Succeeded { .. }) => info!(
                provider = %snapshot.provider,
                %transaction_ref,
                external_id,
                attempts = snapshot.attempts,
                "payment collected"
            ),
            Some(PaymentOutcome::Failed { reason, .. }) => warn!(
                provider = %snapshot.provider,
                %transaction_ref,
                external_id,
                reason = ?reason,
                "payment failed"
            ),
            Some(PaymentOutcome::TimedOut { attempts, .. }) => warn!(
                provider = %snapshot.provider,
                %transaction_ref,
                external_id,
                attempts,
                "payment status unknown after polling budget"
            ),
            None => {}
        }
    }
}
