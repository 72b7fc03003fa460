use crate::cli::ServeArgs;
use crate::infra::{AppState, LoggingPaymentObserver};
use crate::routes::with_portal_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tenant_portal::config::AppConfig;
use tenant_portal::error::AppError;
use tenant_portal::telemetry;
use tenant_portal::workflows::payments::PaymentService;
use tenant_portal::workflows::wizards::WizardSessionService;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let payments = Arc::new(
        PaymentService::from_config(&config.payments)?
            .with_observer(Arc::new(LoggingPaymentObserver)),
    );
    let wizards = Arc::new(WizardSessionService::new(payments.clone()));

    let app = with_portal_routes(payments.clone(), wizards)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        providers = ?payments.providers(),
        "tenant portal backend ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
