//! Rental application, lease builder and screening request wizards.
//!
//! Each wizard is a [`StepperEngine`](crate::workflows::stepper::StepperEngine)
//! built from a blueprint of step templates. Step validators read the
//! session's accumulated form; payment steps consult the payment service.

pub mod blueprint;
pub mod form;
pub mod router;
pub mod session;

#[cfg(test)]
mod tests;

pub use blueprint::{StepGate, StepTemplate, WizardBlueprint, WizardKind, PAYMENT_FIELD};
pub use form::{FormError, FormState, PaymentSettled, RequiredFields};
pub use router::wizard_router;
pub use session::{SessionId, StepResult, WizardError, WizardSessionService, WizardView};
