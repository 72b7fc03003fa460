use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::{json, Value};

use crate::workflows::payments::{PaymentId, PaymentLookup, PaymentStatus};
use crate::workflows::wizards::{SessionId, WizardSessionService};

/// Payment lookup answering from a table the test controls.
#[derive(Default)]
pub(super) struct StaticPayments {
    statuses: Mutex<HashMap<PaymentId, PaymentStatus>>,
}

impl StaticPayments {
    pub(super) fn set(&self, payment_id: &str, status: PaymentStatus) {
        self.statuses
            .lock()
            .expect("statuses lock")
            .insert(PaymentId(payment_id.to_string()), status);
    }
}

impl PaymentLookup for StaticPayments {
    fn payment_status(&self, payment_id: &PaymentId) -> Option<PaymentStatus> {
        self.statuses
            .lock()
            .expect("statuses lock")
            .get(payment_id)
            .copied()
    }
}

pub(super) fn build_service() -> (Arc<WizardSessionService>, Arc<StaticPayments>) {
    let payments = Arc::new(StaticPayments::default());
    let service = Arc::new(WizardSessionService::new(payments.clone()));
    (service, payments)
}

pub(super) fn fields(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

pub(super) fn applicant_fields() -> BTreeMap<String, Value> {
    fields(&[
        ("full_name", json!("Amina Ndiaye")),
        ("email", json!("amina@example.com")),
        ("phone", json!("+221771234567")),
        ("date_of_birth", json!("1991-04-12")),
    ])
}

/// Submit the lease builder's first three steps, leaving it on the deposit step.
pub(super) async fn lease_up_to_deposit(service: &WizardSessionService) -> SessionId {
    let view = service
        .open(crate::workflows::wizards::WizardKind::LeaseBuilder)
        .expect("opened");
    let id = view.session_id;
    let steps = [
        fields(&[("property_id", json!("prop-12")), ("unit_id", json!("B-4"))]),
        fields(&[("tenant_id", json!("ten-88"))]),
        fields(&[
            ("start_date", json!("2026-11-01")),
            ("end_date", json!("2027-10-31")),
            ("monthly_rent", json!(150000)),
            ("currency", json!("XAF")),
        ]),
    ];
    for step in steps {
        service.submit_step(&id, step).await.expect("step accepted");
    }
    id
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&body).expect("json body")
}
