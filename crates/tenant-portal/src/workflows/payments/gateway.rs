use async_trait::async_trait;

use super::domain::{
    AccessToken, GatewayProfile, InitiationReceipt, InitiationRequest, StatusReport,
    TransactionRef,
};

/// Outbound mobile-money provider used by a payment flow.
///
/// Credentials travel explicitly with every call so adapters stay free of
/// process-wide session state.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn profile(&self) -> &GatewayProfile;

    async fn access_token(&self) -> Result<AccessToken, GatewayError>;

    async fn initiate(
        &self,
        token: &AccessToken,
        request: &InitiationRequest,
    ) -> Result<InitiationReceipt, GatewayError>;

    async fn fetch_status(
        &self,
        token: &AccessToken,
        transaction: &TransactionRef,
    ) -> Result<StatusReport, GatewayError>;
}

/// Failure talking to a provider.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Build a rejection from a non-success HTTP response, keeping its body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let message = match response.text().await {
            Ok(body) if !body.trim().is_empty() => body,
            _ => "no response body".to_string(),
        };
        Self::Rejected { status, message }
    }
}
