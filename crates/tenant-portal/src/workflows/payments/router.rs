use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::controller::PaymentError;
use super::domain::{PaymentRequest, Provider};
use super::service::{PaymentId, PaymentService, PaymentServiceError};

/// Body accepted by `POST /api/v1/payments`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartPaymentBody {
    pub provider: Provider,
    pub amount: Decimal,
    pub currency: String,
    pub payer: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl StartPaymentBody {
    fn into_request(self) -> (Provider, PaymentRequest) {
        let request = PaymentRequest {
            amount: self.amount,
            currency: self.currency,
            payer: self.payer,
            note: self.note,
            external_id: self.external_id,
        };
        (self.provider, request)
    }
}

/// Header carrying the callback token; providers that cannot set headers
/// put it in the `token` query parameter of the callback URL instead.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Router builder exposing payment start, status, cancel, release and
/// provider callbacks.
pub fn payment_router(service: Arc<PaymentService>) -> Router {
    Router::new()
        .route("/api/v1/payments", post(start_handler))
        .route(
            "/api/v1/payments/:payment_id",
            get(status_handler).delete(release_handler),
        )
        .route("/api/v1/payments/:payment_id/cancel", post(cancel_handler))
        .route(
            "/api/v1/payments/notifications/:provider",
            post(notification_handler),
        )
        .with_state(service)
}

pub(crate) async fn start_handler(
    State(service): State<Arc<PaymentService>>,
    axum::Json(body): axum::Json<StartPaymentBody>,
) -> Response {
    let (provider, request) = body.into_request();
    match service.start(provider, request) {
        Ok((payment_id, snapshot)) => {
            let payload = json!({
                "payment_id": payment_id,
                "payment": snapshot,
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn status_handler(
    State(service): State<Arc<PaymentService>>,
    Path(payment_id): Path<String>,
) -> Response {
    let id = PaymentId(payment_id);
    match service.snapshot(&id) {
        Ok(snapshot) => (StatusCode::OK, axum::Json(snapshot)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn cancel_handler(
    State(service): State<Arc<PaymentService>>,
    Path(payment_id): Path<String>,
) -> Response {
    let id = PaymentId(payment_id);
    match service.cancel(&id) {
        Ok(notice) => (StatusCode::OK, axum::Json(notice)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn release_handler(
    State(service): State<Arc<PaymentService>>,
    Path(payment_id): Path<String>,
) -> Response {
    let id = PaymentId(payment_id);
    match service.release(&id) {
        Ok(snapshot) => (StatusCode::OK, axum::Json(snapshot)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn notification_handler(
    State(service): State<Arc<PaymentService>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let Some(provider) = Provider::from_slug(&provider) else {
        let payload = json!({ "error": format!("unknown provider '{provider}'") });
        return (StatusCode::NOT_FOUND, axum::Json(payload)).into_response();
    };
    let token = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .or(query.token.as_deref());
    match service.record_notification(provider, token, &body) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(error) => error.into_response(),
    }
}

impl IntoResponse for PaymentServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            PaymentServiceError::Payment(PaymentError::Validation(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PaymentServiceError::Payment(PaymentError::InvalidState { .. }) => {
                StatusCode::CONFLICT
            }
            PaymentServiceError::Payment(PaymentError::NoRuntime)
            | PaymentServiceError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PaymentServiceError::NotFound(_) | PaymentServiceError::UnknownTransaction(_) => {
                StatusCode::NOT_FOUND
            }
            PaymentServiceError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PaymentServiceError::UnreadableNotification(_) => StatusCode::BAD_REQUEST,
            PaymentServiceError::UnauthorisedNotification(_) => StatusCode::UNAUTHORIZED,
        };
        let payload = json!({
            "error": self.to_string(),
        });
        (status, axum::Json(payload)).into_response()
    }
}
