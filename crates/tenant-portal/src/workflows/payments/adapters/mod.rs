//! Concrete [`PaymentGateway`](super::gateway::PaymentGateway) implementations.

mod mtn_momo;
mod notifications;
mod orange_money;
mod sandbox;

pub use mtn_momo::MtnMomoGateway;
pub use notifications::{NotificationInbox, NotifiedGateway};
pub use orange_money::OrangeMoneyGateway;
pub use sandbox::SandboxGateway;
