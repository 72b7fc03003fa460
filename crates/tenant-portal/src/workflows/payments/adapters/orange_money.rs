use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::OrangeMoneyConfig;
use crate::workflows::payments::domain::{
    AccessToken, GatewayProfile, GatewayStatus, InitiationReceipt, InitiationRequest, Provider,
    StatusReport, TransactionRef,
};
use crate::workflows::payments::gateway::{GatewayError, PaymentGateway};

const API_ROOT: &str = "omcoreapis/1.0.2/mp";
const DEFAULT_TOKEN_TTL: u64 = 3600;

/// Orange Money merchant payment adapter.
///
/// Initiation takes two calls: `init` reserves a pay token, `pay` pushes the
/// confirmation prompt to the subscriber. The pay token then identifies the
/// transaction for status checks and callbacks.
#[derive(Debug, Clone)]
pub struct OrangeMoneyGateway {
    http: Client,
    config: OrangeMoneyConfig,
    profile: GatewayProfile,
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitData {
    pay_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayBody<'a> {
    notif_url: &'a str,
    channel_user_msisdn: &'a str,
    amount: String,
    subscriber_msisdn: &'a str,
    pin: &'a str,
    order_id: &'a str,
    description: &'a str,
    pay_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    inittxnmessage: Option<String>,
    #[serde(default)]
    confirmtxnmessage: Option<String>,
}

impl PaymentData {
    fn message(self) -> Option<String> {
        self.confirmtxnmessage.or(self.inittxnmessage)
    }
}

impl OrangeMoneyGateway {
    pub fn new(config: OrangeMoneyConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, config: OrangeMoneyConfig) -> Self {
        let profile = GatewayProfile {
            provider: Provider::OrangeMoney,
            currencies: config.currencies.clone(),
            countries: config.countries.clone(),
        };
        let auth_token = STANDARD.encode(format!(
            "{}:{}",
            config.api_username, config.api_password
        ));
        Self {
            http,
            config,
            profile,
            auth_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder, token: &AccessToken) -> RequestBuilder {
        builder
            .bearer_auth(&token.access_token)
            .header("X-AUTH-TOKEN", &self.auth_token)
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<(Option<String>, T), GatewayError> {
        if !response.status().is_success() {
            return Err(GatewayError::from_response(response).await);
        }
        let envelope: Envelope<T> = response.json().await?;
        match envelope.data {
            Some(data) => Ok((envelope.message, data)),
            None => Err(GatewayError::Decode(
                envelope
                    .message
                    .unwrap_or_else(|| "response carried no data".to_string()),
            )),
        }
    }

    /// Extract the pay token and status from a callback body.
    pub fn parse_notification(body: &Value) -> Option<(TransactionRef, StatusReport)> {
        let pay_token = body
            .get("payToken")
            .or_else(|| body.pointer("/data/payToken"))?
            .as_str()?;
        let status = body
            .get("status")
            .or_else(|| body.pointer("/data/status"))?
            .as_str()?;
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some((
            TransactionRef(pay_token.to_string()),
            StatusReport {
                status: map_status(status),
                message,
            },
        ))
    }
}

pub(crate) fn map_status(raw: &str) -> GatewayStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SUCCESSFULL" | "SUCCESSFUL" | "SUCCESS" => GatewayStatus::Success,
        "FAILED" | "CANCELLED" | "EXPIRED" | "REJECTED" => GatewayStatus::Failed,
        _ => GatewayStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for OrangeMoneyGateway {
    fn profile(&self) -> &GatewayProfile {
        &self.profile
    }

    async fn access_token(&self) -> Result<AccessToken, GatewayError> {
        let response = self
            .http
            .post(self.url("token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
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
        let response = self
            .authorized(self.http.post(self.url(&format!("{API_ROOT}/init"))), token)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        let (_, init): (_, InitData) = Self::read(response).await?;
        debug!(external_id = %request.external_id, "orange money pay token reserved");

        let body = PayBody {
            notif_url: self.config.notif_url.as_deref().unwrap_or_default(),
            channel_user_msisdn: &self.config.channel_msisdn,
            amount: request.amount.to_string(),
            subscriber_msisdn: request.payer.national(),
            pin: &self.config.pin,
            order_id: &request.external_id,
            description: &request.note,
            pay_token: &init.pay_token,
        };
        let response = self
            .authorized(self.http.post(self.url(&format!("{API_ROOT}/pay"))), token)
            .json(&body)
            .send()
            .await?;
        let (message, payment): (_, PaymentData) = Self::read(response).await?;

        let initial_status = payment
            .status
            .as_deref()
            .map(map_status)
            .unwrap_or(GatewayStatus::Pending);

        Ok(InitiationReceipt {
            transaction_ref: TransactionRef(init.pay_token),
            initial_status,
            message: payment.message().or(message),
        })
    }

    async fn fetch_status(
        &self,
        token: &AccessToken,
        transaction: &TransactionRef,
    ) -> Result<StatusReport, GatewayError> {
        let response = self
            .authorized(
                self.http
                    .get(self.url(&format!("{API_ROOT}/paymentstatus/{transaction}"))),
                token,
            )
            .send()
            .await?;
        let (message, payment): (_, PaymentData) = Self::read(response).await?;

        let status = payment
            .status
            .as_deref()
            .map(map_status)
            .unwrap_or(GatewayStatus::Pending);
        Ok(StatusReport {
            status,
            message: payment.message().or(message),
        })
    }
}
