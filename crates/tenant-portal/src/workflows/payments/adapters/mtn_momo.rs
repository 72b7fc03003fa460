use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::MtnMomoConfig;
use crate::workflows::payments::domain::{
    AccessToken, GatewayProfile, GatewayStatus, InitiationReceipt, InitiationRequest, Provider,
    StatusReport, TransactionRef,
};
use crate::workflows::payments::gateway::{GatewayError, PaymentGateway};

const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";
const DEFAULT_TOKEN_TTL: u64 = 3600;

/// MTN MoMo Collections "request to pay" adapter.
#[derive(Debug, Clone)]
pub struct MtnMomoGateway {
    http: Client,
    config: MtnMomoConfig,
    profile: GatewayProfile,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestToPay<'a> {
    amount: String,
    currency: &'a str,
    external_id: &'a str,
    payer: Party,
    payer_message: &'a str,
    payee_note: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Party {
    party_id_type: &'static str,
    party_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestToPayStatus {
    status: String,
    #[serde(default)]
    reason: Option<Value>,
    #[serde(default)]
    financial_transaction_id: Option<String>,
}

impl MtnMomoGateway {
    pub fn new(config: MtnMomoConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, config: MtnMomoConfig) -> Self {
        let profile = GatewayProfile {
            provider: Provider::MtnMomo,
            currencies: config.currencies.clone(),
            countries: config.countries.clone(),
        };
        Self {
            http,
            config,
            profile,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Extract the reference and status from a callback body.
    ///
    /// Callbacks repeat the status payload; the reference is carried as
    /// `referenceId` by the callback URL template configured for the portal.
    pub fn parse_notification(body: &Value) -> Option<(TransactionRef, StatusReport)> {
        let reference = body.get("referenceId")?.as_str()?;
        let status = body.get("status")?.as_str()?;
        Some((
            TransactionRef(reference.to_string()),
            StatusReport {
                status: map_status(status),
                message: body.get("reason").and_then(reason_message),
            },
        ))
    }
}

pub(crate) fn map_status(raw: &str) -> GatewayStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SUCCESSFUL" => GatewayStatus::Success,
        "FAILED" | "REJECTED" | "TIMEOUT" => GatewayStatus::Failed,
        _ => GatewayStatus::Pending,
    }
}

fn reason_message(reason: &Value) -> Option<String> {
    match reason {
        Value::String(text) => Some(text.clone()),
        Value::Object(fields) => fields
            .get("message")
            .or_else(|| fields.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for MtnMomoGateway {
    fn profile(&self) -> &GatewayProfile {
        &self.profile
    }

    async fn access_token(&self) -> Result<AccessToken, GatewayError> {
        let response = self
            .http
            .post(self.url("collection/token/"))
            .basic_auth(&self.config.api_user, Some(&self.config.api_key))
            .header(SUBSCRIPTION_HEADER, &self.config.subscription_key)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::from_response(response).await);
        }

        let body: TokenResponse = response.json().await?;
        Ok(AccessToken::new(
            body.access_token,
            body.expires_in.unwrap_or(DEFAULT_TOKEN_TTL),
        ))
    }

    async fn initiate(
        &self,
        token: &AccessToken,
        request: &InitiationRequest,
    ) -> Result<InitiationReceipt, GatewayError> {
        let reference = uuid::Uuid::new_v4().to_string();
        let body = RequestToPay {
            amount: request.amount.to_string(),
            currency: &request.currency,
            external_id: &request.external_id,
            payer: Party {
                party_id_type: "MSISDN",
                party_id: request.payer.digits(),
            },
            payer_message: &request.note,
            payee_note: &request.note,
        };

        let mut builder = self
            .http
            .post(self.url("collection/v1_0/requesttopay"))
            .bearer_auth(&token.access_token)
            .header("X-Reference-Id", &reference)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(SUBSCRIPTION_HEADER, &self.config.subscription_key);
        if let Some(callback) = &self.config.callback_url {
            builder = builder.header("X-Callback-Url", callback);
        }

        let response = builder.json(&body).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::from_response(response).await);
        }
        debug!(reference = %reference, external_id = %request.external_id, "request to pay accepted");

        Ok(InitiationReceipt {
            transaction_ref: TransactionRef(reference),
            initial_status: GatewayStatus::Pending,
            message: None,
        })
    }

    async fn fetch_status(
        &self,
        token: &AccessToken,
        transaction: &TransactionRef,
    ) -> Result<StatusReport, GatewayError> {
        let response = self
            .http
            .get(self.url(&format!("collection/v1_0/requesttopay/{transaction}")))
            .bearer_auth(&token.access_token)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(SUBSCRIPTION_HEADER, &self.config.subscription_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::from_response(response).await);
        }

        let body: RequestToPayStatus = response.json().await?;
        let status = map_status(&body.status);
        let message = match status {
            GatewayStatus::Success => body
                .financial_transaction_id
                .map(|id| format!("financial transaction {id}")),
            _ => body.reason.as_ref().and_then(reason_message),
        };
        Ok(StatusReport { status, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_provider_statuses() {
        assert_eq!(map_status("SUCCESSFUL"), GatewayStatus::Success);
        assert_eq!(map_status("failed"), GatewayStatus::Failed);
        assert_eq!(map_status("REJECTED"), GatewayStatus::Failed);
        assert_eq!(map_status("PENDING"), GatewayStatus::Pending);
        assert_eq!(map_status("ONGOING"), GatewayStatus::Pending);
    }

    #[test]
    fn reads_reason_from_string_or_object() {
        assert_eq!(
            reason_message(&json!("PAYER_NOT_FOUND")),
            Some("PAYER_NOT_FOUND".to_string())
        );
        assert_eq!(
            reason_message(&json!({ "code": "NOT_ENOUGH_FUNDS", "message": "Insufficient balance" })),
            Some("Insufficient balance".to_string())
        );
        assert_eq!(reason_message(&json!(42)), None);
    }

    #[test]
    fn parses_callback_bodies() {
        let body = json!({
            "referenceId": "2b9f7b9e-0000-4000-8000-000000000001",
            "status": "FAILED",
            "reason": "APPROVAL_REJECTED",
        });
        let (reference, report) =
            MtnMomoGateway::parse_notification(&body).expect("parsable callback");
        assert_eq!(reference.0, "2b9f7b9e-0000-4000-8000-000000000001");
        assert_eq!(report.status, GatewayStatus::Failed);
        assert_eq!(report.message.as_deref(), Some("APPROVAL_REJECTED"));

        assert!(MtnMomoGateway::parse_notification(&json!({ "status": "SUCCESSFUL" })).is_none());
    }
}
