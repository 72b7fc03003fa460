//! Mobile-money collection for deposits and screening fees.
//!
//! A [`PaymentFlowController`] drives one payment through token acquisition,
//! initiation and bounded status polling against an injected
//! [`PaymentGateway`]. [`PaymentService`] keeps the controllers started by
//! the HTTP layer and routes them to the configured providers.

pub mod adapters;
pub mod controller;
pub mod domain;
pub mod gateway;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use adapters::{
    MtnMomoGateway, NotificationInbox, NotifiedGateway, OrangeMoneyGateway, SandboxGateway,
};
pub use controller::{
    CancelNotice, FailureReason, PaymentError, PaymentFlowController, PaymentObserver,
    PaymentOutcome, PaymentSnapshot,
};
pub use domain::{
    AccessToken, Country, GatewayProfile, GatewayStatus, InitiationReceipt, InitiationRequest,
    Msisdn, PaymentRequest, PaymentStatus, PollingPolicy, Provider, StatusReport,
    TransactionRef, ValidationError,
};
pub use gateway::{GatewayError, PaymentGateway};
pub use router::{payment_router, StartPaymentBody, CALLBACK_TOKEN_HEADER};
pub use service::{PaymentId, PaymentLookup, PaymentService, PaymentServiceError};
