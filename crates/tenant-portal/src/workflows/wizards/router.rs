use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::blueprint::WizardKind;
use super::form::FormError;
use super::session::{SessionId, WizardError, WizardSessionService};
use crate::workflows::stepper::StepperError;

#[derive(Debug, Deserialize)]
pub struct OpenWizardBody {
    pub kind: WizardKind,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitStepBody {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

/// Signed so that negative indices reach the range check instead of
/// failing deserialization.
#[derive(Debug, Deserialize)]
pub struct GotoBody {
    pub index: i64,
}

/// Router builder exposing wizard sessions to the portals.
pub fn wizard_router(service: Arc<WizardSessionService>) -> Router {
    Router::new()
        .route("/api/v1/wizards", post(open_handler))
        .route(
            "/api/v1/wizards/:session_id",
            get(view_handler).delete(close_handler),
        )
        .route("/api/v1/wizards/:session_id/next", post(next_handler))
        .route("/api/v1/wizards/:session_id/back", post(back_handler))
        .route("/api/v1/wizards/:session_id/goto", post(goto_handler))
        .with_state(service)
}

pub(crate) async fn open_handler(
    State(service): State<Arc<WizardSessionService>>,
    axum::Json(body): axum::Json<OpenWizardBody>,
) -> Response {
    match service.open(body.kind) {
        Ok(view) => (StatusCode::CREATED, axum::Json(view)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn view_handler(
    State(service): State<Arc<WizardSessionService>>,
    Path(session_id): Path<String>,
) -> Response {
    match service.get(&SessionId(session_id)).await {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn next_handler(
    State(service): State<Arc<WizardSessionService>>,
    Path(session_id): Path<String>,
    axum::Json(body): axum::Json<SubmitStepBody>,
) -> Response {
    match service.submit_step(&SessionId(session_id), body.fields).await {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn back_handler(
    State(service): State<Arc<WizardSessionService>>,
    Path(session_id): Path<String>,
) -> Response {
    match service.back(&SessionId(session_id)).await {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn goto_handler(
    State(service): State<Arc<WizardSessionService>>,
    Path(session_id): Path<String>,
    axum::Json(body): axum::Json<GotoBody>,
) -> Response {
    let id = SessionId(session_id);
    let index = match usize::try_from(body.index) {
        Ok(index) => index,
        Err(_) => {
            let total = match service.get(&id).await {
                Ok(view) => view.stepper.total,
                Err(error) => return error.into_response(),
            };
            error!(index = body.index, total, "rejected negative step index");
            let payload = json!({
                "error": format!("step index {} is outside 0..{total}", body.index),
                "index": body.index,
            });
            return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
        }
    };

    match service.jump(&id, index).await {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn close_handler(
    State(service): State<Arc<WizardSessionService>>,
    Path(session_id): Path<String>,
) -> Response {
    match service.close(&SessionId(session_id)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

impl IntoResponse for WizardError {
    fn into_response(self) -> Response {
        if let Some(form_error) = self.form_error() {
            let step = match &self {
                WizardError::Stepper(StepperError::Validator { step, .. }) => Some(step.clone()),
                _ => None,
            };
            let fields = match form_error {
                FormError::MissingFields { fields } => fields.clone(),
                _ => Vec::new(),
            };
            let payload = json!({
                "error": form_error.to_string(),
                "step": step,
                "fields": fields,
            });
            return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
        }

        let status = match &self {
            WizardError::NotFound(_) => StatusCode::NOT_FOUND,
            WizardError::Incomplete { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            WizardError::Stepper(StepperError::OutOfRange { .. }) => StatusCode::BAD_REQUEST,
            WizardError::Stepper(StepperError::Validator { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            WizardError::Stepper(StepperError::Empty) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut payload = json!({
            "error": self.to_string(),
        });
        if let WizardError::Incomplete { step, index, .. } = &self {
            payload["step"] = json!(step);
            payload["index"] = json!(index);
        }
        (status, axum::Json(payload)).into_response()
    }
}
