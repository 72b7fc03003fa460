use std::fmt;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Mobile-money providers the portal can collect through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OrangeMoney,
    MtnMomo,
    Sandbox,
}

impl Provider {
    pub const fn label(self) -> &'static str {
        match self {
            Self::OrangeMoney => "Orange Money",
            Self::MtnMomo => "MTN MoMo",
            Self::Sandbox => "Sandbox",
        }
    }

    /// Parse the path segment used by provider callbacks.
    pub fn from_slug(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "orange-money" | "orange" | "om" => Some(Self::OrangeMoney),
            "mtn-momo" | "momo" | "mtn" => Some(Self::MtnMomo),
            "sandbox" => Some(Self::Sandbox),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Markets where the supported wallets operate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    #[serde(rename = "CM")]
    Cameroon,
    #[serde(rename = "CI")]
    CoteDIvoire,
    #[serde(rename = "SN")]
    Senegal,
    #[serde(rename = "ML")]
    Mali,
    #[serde(rename = "GN")]
    Guinea,
    #[serde(rename = "BF")]
    BurkinaFaso,
    #[serde(rename = "NE")]
    Niger,
    #[serde(rename = "CG")]
    Congo,
    #[serde(rename = "GH")]
    Ghana,
    #[serde(rename = "UG")]
    Uganda,
    #[serde(rename = "RW")]
    Rwanda,
    #[serde(rename = "ZM")]
    Zambia,
}

impl Country {
    pub const fn ordered() -> [Self; 12] {
        [
            Self::Cameroon,
            Self::CoteDIvoire,
            Self::Senegal,
            Self::Mali,
            Self::Guinea,
            Self::BurkinaFaso,
            Self::Niger,
            Self::Congo,
            Self::Ghana,
            Self::Uganda,
            Self::Rwanda,
            Self::Zambia,
        ]
    }

    pub const fn iso(self) -> &'static str {
        match self {
            Self::Cameroon => "CM",
            Self::CoteDIvoire => "CI",
            Self::Senegal => "SN",
            Self::Mali => "ML",
            Self::Guinea => "GN",
            Self::BurkinaFaso => "BF",
            Self::Niger => "NE",
            Self::Congo => "CG",
            Self::Ghana => "GH",
            Self::Uganda => "UG",
            Self::Rwanda => "RW",
            Self::Zambia => "ZM",
        }
    }

    pub const fn calling_code(self) -> &'static str {
        match self {
            Self::Cameroon => "237",
            Self::CoteDIvoire => "225",
            Self::Senegal => "221",
            Self::Mali => "223",
            Self::Guinea => "224",
            Self::BurkinaFaso => "226",
            Self::Niger => "227",
            Self::Congo => "242",
            Self::Ghana => "233",
            Self::Uganda => "256",
            Self::Rwanda => "250",
            Self::Zambia => "260",
        }
    }

    /// Digits in a mobile number after the calling code.
    pub const fn national_len(self) -> usize {
        match self {
            Self::CoteDIvoire => 10,
            Self::Mali | Self::BurkinaFaso | Self::Niger => 8,
            _ => 9,
        }
    }

    pub fn from_iso(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ordered()
            .into_iter()
            .find(|country| country.iso().eq_ignore_ascii_case(code))
    }
}

/// A wallet phone number resolved against a provider's markets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Msisdn {
    pub country: Country,
    national: String,
}

impl Msisdn {
    /// Parse `raw` as an E.164 number from one of `allowed`.
    ///
    /// Separators are ignored. A number without a country prefix is accepted
    /// only when exactly one market is allowed and the length matches it.
    pub fn parse(raw: &str, allowed: &[Country]) -> Result<Self, PayerError> {
        let trimmed = raw.trim();
        let compact: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();

        let (international, digits) = if let Some(rest) = compact.strip_prefix('+') {
            (true, rest)
        } else if let Some(rest) = compact.strip_prefix("00") {
            (true, rest)
        } else {
            (false, compact.as_str())
        };

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(PayerError::Malformed);
        }

        if !international {
            return match allowed {
                [only] if digits.len() == only.national_len() => Ok(Self {
                    country: *only,
                    national: digits.to_string(),
                }),
                _ => Err(PayerError::Malformed),
            };
        }

        allowed
            .iter()
            .find_map(|country| {
                digits
                    .strip_prefix(country.calling_code())
                    .filter(|national| national.len() == country.national_len())
                    .map(|national| Self {
                        country: *country,
                        national: national.to_string(),
                    })
            })
            .ok_or(PayerError::OutsideMarkets)
    }

    /// `+237690000000`
    pub fn e164(&self) -> String {
        format!("+{}{}", self.country.calling_code(), self.national)
    }

    /// `237690000000`, as MSISDN party identifiers are written.
    pub fn digits(&self) -> String {
        format!("{}{}", self.country.calling_code(), self.national)
    }

    /// `690000000`
    pub fn national(&self) -> &str {
        &self.national
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.e164())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayerError {
    Malformed,
    OutsideMarkets,
}

/// Input rejected before any gateway call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("amount must be greater than zero (got {0})")]
    NonPositiveAmount(Decimal),
    #[error("amount {amount} has more decimals than {currency} allows")]
    ExcessPrecision { amount: Decimal, currency: String },
    #[error("{provider} does not accept {currency}")]
    UnsupportedCurrency { provider: Provider, currency: String },
    #[error("'{value}' is not a valid mobile number")]
    MalformedPayer { value: String },
    #[error("'{value}' is not a {provider} number in a supported country")]
    UnsupportedPayer { value: String, provider: Provider },
}

/// Decimal places a currency settles in.
pub fn minor_units(currency: &str) -> u32 {
    match currency {
        "XAF" | "XOF" | "GNF" | "UGX" | "RWF" => 0,
        _ => 2,
    }
}

/// Payment input as supplied by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub payer: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl PaymentRequest {
    pub fn new(amount: Decimal, currency: impl Into<String>, payer: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            payer: payer.into(),
            note: None,
            external_id: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Check the request against a gateway's markets and currencies.
    pub fn validate(&self, profile: &GatewayProfile) -> Result<InitiationRequest, ValidationError> {
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }

        let currency = self.currency.trim().to_ascii_uppercase();
        if !profile.accepts_currency(&currency) {
            return Err(ValidationError::UnsupportedCurrency {
                provider: profile.provider,
                currency,
            });
        }

        let amount = self.amount.normalize();
        if amount.scale() > minor_units(&currency) {
            return Err(ValidationError::ExcessPrecision {
                amount: self.amount,
                currency,
            });
        }

        let payer = Msisdn::parse(&self.payer, &profile.countries).map_err(|err| match err {
            PayerError::Malformed => ValidationError::MalformedPayer {
                value: self.payer.clone(),
            },
            PayerError::OutsideMarkets => ValidationError::UnsupportedPayer {
                value: self.payer.clone(),
                provider: profile.provider,
            },
        })?;

        let external_id = self
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let note = self
            .note
            .as_deref()
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .unwrap_or("Tenant portal payment")
            .to_string();

        Ok(InitiationRequest {
            amount,
            currency,
            payer,
            external_id,
            note,
        })
    }
}

/// A validated payment handed to a gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiationRequest {
    pub amount: Decimal,
    pub currency: String,
    pub payer: Msisdn,
    pub external_id: String,
    pub note: String,
}

/// Bearer credential acquired through client credentials.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: u64,
    issued_at: Instant,
}

const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

impl AccessToken {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            issued_at: Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() + TOKEN_EXPIRY_SKEW >= Duration::from_secs(self.expires_in)
    }
}

/// Provider-assigned identifier of an initiated payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionRef(pub String);

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider status collapsed to the three states the flow reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiationReceipt {
    pub transaction_ref: TransactionRef,
    pub initial_status: GatewayStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: GatewayStatus,
    pub message: Option<String>,
}

impl StatusReport {
    pub fn pending() -> Self {
        Self {
            status: GatewayStatus::Pending,
            message: None,
        }
    }

    pub fn success() -> Self {
        Self {
            status: GatewayStatus::Success,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: GatewayStatus::Failed,
            message: Some(message.into()),
        }
    }
}

/// Lifecycle of one payment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Idle,
    Initiating,
    PendingConfirmation,
    Success,
    Failed,
    Timeout,
}

impl PaymentStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }

    pub const fn is_active(self) -> bool {
        matches!(self, Self::Initiating | Self::PendingConfirmation)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initiating => "Initiating",
            Self::PendingConfirmation => "Pending Confirmation",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Poll cadence and budget; `interval * max_attempts` bounds confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollingPolicy {
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2_500),
            max_attempts: 24,
        }
    }
}

/// What a gateway accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayProfile {
    pub provider: Provider,
    pub currencies: Vec<String>,
    pub countries: Vec<Country>,
}

impl GatewayProfile {
    pub fn accepts_currency(&self, currency: &str) -> bool {
        self.currencies
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(currency))
    }
}
