use crate::infra::LoggingPaymentObserver;
use chrono::SecondsFormat;
use clap::Args;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tenant_portal::config::AppConfig;
use tenant_portal::error::AppError;
use tenant_portal::telemetry;
use tenant_portal::workflows::payments::{
    PaymentId, PaymentRequest, PaymentService, PaymentServiceError, PaymentSnapshot,
    PollingPolicy, Provider, SandboxGateway,
};
use tenant_portal::workflows::stepper::Advance;
use tenant_portal::workflows::wizards::{
    StepResult, WizardKind, WizardSessionService, WizardView, PAYMENT_FIELD,
};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Payer wallet number in international format
    #[arg(long, default_value = "+237690000000")]
    pub(crate) payer: String,
    /// Security deposit amount
    #[arg(long, default_value = "150000")]
    pub(crate) amount: Decimal,
    /// Deposit currency
    #[arg(long, default_value = "XAF")]
    pub(crate) currency: String,
    /// Status checks before the sandbox settles the deposit
    #[arg(long, default_value_t = 2)]
    pub(crate) settle_after: u32,
    /// Milliseconds between status checks
    #[arg(long, default_value_t = 250)]
    pub(crate) poll_interval_ms: u64,
    /// Make the sandbox decline the deposit
    #[arg(long)]
    pub(crate) decline: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let sandbox = SandboxGateway::new()
        .with_settle_after(args.settle_after)
        .with_decline_suffix(args.decline.then_some(""));
    let policy = PollingPolicy {
        interval: Duration::from_millis(args.poll_interval_ms),
        max_attempts: config.payments.max_attempts.max(args.settle_after + 1),
    };
    let payments = Arc::new(
        PaymentService::new(policy)
            .register(Arc::new(sandbox))
            .with_observer(Arc::new(LoggingPaymentObserver)),
    );
    let wizards = WizardSessionService::new(payments.clone());

    let opened = wizards.open(WizardKind::LeaseBuilder)?;
    let session = opened.session_id.clone();
    println!("{} demo ({session})", opened.title);
    render_step(&opened);

    for fields in lease_terms(&args) {
        let result = wizards.submit_step(&session, fields).await?;
        render_result(&result);
    }

    let request = PaymentRequest::new(args.amount, args.currency.clone(), args.payer.clone())
        .with_note("Security deposit")
        .with_external_id(session.to_string());
    let (payment_id, snapshot) = payments.start(Provider::Sandbox, request)?;
    println!(
        "\nDeposit {payment_id}: {} {} from {} via {}",
        args.amount,
        args.currency,
        args.payer,
        snapshot.provider.label()
    );

    let result = wizards
        .submit_step(&session, fields([(PAYMENT_FIELD, json!(payment_id.to_string()))]))
        .await?;
    render_result(&result);

    let settled = follow_payment(&payments, &payment_id).await?;
    if let Some(outcome) = &settled.outcome {
        println!("  outcome: {}", serde_json::to_value(outcome).unwrap_or_default());
    }

    match wizards.submit_step(&session, BTreeMap::new()).await {
        Ok(result) => render_result(&result),
        Err(err) => match err.form_error().map(ToString::to_string) {
            Some(problem) => {
                println!("\nDeposit step refused: {problem}");
                wizards.close(&session).await?;
                return Ok(());
            }
            None => return Err(err.into()),
        },
    }

    let result = wizards
        .submit_step(
            &session,
            fields([("landlord_signature", json!("Portal Demo Landlord"))]),
        )
        .await?;
    render_result(&result);

    let closed = wizards.close(&session).await?;
    render_summary(&closed);
    Ok(())
}

fn lease_terms(args: &DemoArgs) -> Vec<BTreeMap<String, Value>> {
    vec![
        fields([
            ("property_id", json!("prop-douala-014")),
            ("unit_id", json!("3B")),
        ]),
        fields([("tenant_id", json!("tenant-0042"))]),
        fields([
            ("start_date", json!("2026-11-01")),
            ("end_date", json!("2027-10-31")),
            ("monthly_rent", json!(args.amount.to_string())),
            ("currency", json!(args.currency)),
        ]),
    ]
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Print each status change until the payment settles.
async fn follow_payment(
    payments: &PaymentService,
    payment_id: &PaymentId,
) -> Result<PaymentSnapshot, AppError> {
    let controller = payments
        .controller(payment_id)
        .ok_or_else(|| PaymentServiceError::NotFound(payment_id.clone()))?;
    let mut updates = controller.subscribe();

    loop {
        let snapshot = updates.borrow_and_update().clone();
        println!(
            "  status: {} (checks {}/{})",
            snapshot.status, snapshot.attempts, snapshot.max_attempts
        );
        if snapshot.status.is_terminal() || updates.changed().await.is_err() {
            return Ok(snapshot);
        }
    }
}

fn render_step(view: &WizardView) {
    println!(
        "- step {}/{}: {} [{}]",
        view.stepper.current_index + 1,
        view.stepper.total,
        view.step.title,
        view.step.required.join(", ")
    );
}

fn render_result(result: &StepResult) {
    match result.advance {
        Advance::Moved { .. } => render_step(&result.wizard),
        Advance::Blocked => println!("  waiting on '{}'", result.wizard.step.key),
        Advance::Completed => println!("  wizard complete"),
    }
}

fn render_summary(view: &WizardView) {
    println!(
        "\nSession {} opened {} closed {}",
        view.session_id,
        view.opened_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        view.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    for (key, value) in view.form.fields() {
        println!("  - {key}: {value}");
    }
}
