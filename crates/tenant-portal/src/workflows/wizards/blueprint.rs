use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::form::{FormState, PaymentSettled, RequiredFields};
use crate::workflows::payments::PaymentLookup;
use crate::workflows::stepper::{Step, StepperEngine, StepperError};

/// Multi-step forms offered by the portals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardKind {
    RentalApplication,
    LeaseBuilder,
    ScreeningRequest,
}

impl WizardKind {
    pub const fn ordered() -> [Self; 3] {
        [
            Self::RentalApplication,
            Self::LeaseBuilder,
            Self::ScreeningRequest,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::RentalApplication => "Rental Application",
            Self::LeaseBuilder => "Lease Builder",
            Self::ScreeningRequest => "Screening Request",
        }
    }
}

/// How a step decides whether the wizard may leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepGate {
    /// Every required field is filled.
    Fields,
    /// The payment referenced by `payment_id` succeeded.
    PaymentSettled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepTemplate {
    pub key: &'static str,
    pub title: &'static str,
    pub required: Vec<&'static str>,
    pub gate: StepGate,
}

pub const PAYMENT_FIELD: &str = "payment_id";

#[derive(Debug)]
pub struct WizardBlueprint {
    kind: WizardKind,
    steps: Vec<StepTemplate>,
}

impl WizardBlueprint {
    pub fn standard(kind: WizardKind) -> Self {
        let steps = match kind {
            WizardKind::RentalApplication => rental_application_steps(),
            WizardKind::LeaseBuilder => lease_builder_steps(),
            WizardKind::ScreeningRequest => screening_request_steps(),
        };
        Self { kind, steps }
    }

    pub fn kind(&self) -> WizardKind {
        self.kind
    }

    pub fn templates(&self) -> &[StepTemplate] {
        &self.steps
    }

    /// Build a fresh engine whose validators read the wizard's form state.
    pub fn build(
        &self,
        payments: Arc<dyn PaymentLookup>,
    ) -> Result<StepperEngine<StepTemplate, FormState>, StepperError> {
        let steps = self
            .steps
            .iter()
            .map(|template| {
                let step = Step::new(template.key, template.clone());
                match template.gate {
                    StepGate::PaymentSettled => {
                        step.with_validator(PaymentSettled::new(PAYMENT_FIELD, payments.clone()))
                    }
                    StepGate::Fields if template.required.is_empty() => step,
                    StepGate::Fields => {
                        step.with_validator(RequiredFields::new(template.required.iter().copied()))
                    }
                }
            })
            .collect();
        StepperEngine::new(steps)
    }
}

fn fields(key: &'static str, title: &'static str, required: &[&'static str]) -> StepTemplate {
    StepTemplate {
        key,
        title,
        required: required.to_vec(),
        gate: StepGate::Fields,
    }
}

fn payment(key: &'static str, title: &'static str) -> StepTemplate {
    StepTemplate {
        key,
        title,
        required: vec![PAYMENT_FIELD],
        gate: StepGate::PaymentSettled,
    }
}

fn rental_application_steps() -> Vec<StepTemplate> {
    vec![
        fields(
            "applicant",
            "Applicant Details",
            &["full_name", "email", "phone", "date_of_birth"],
        ),
        fields("household", "Household", &["adults", "move_in_date"]),
        fields("income", "Income", &["employer", "monthly_income"]),
        fields(
            "references",
            "Rental References",
            &["previous_landlord", "previous_landlord_phone"],
        ),
        fields("review", "Review and Sign", &["applicant_signature"]),
    ]
}

fn lease_builder_steps() -> Vec<StepTemplate> {
    vec![
        fields("property", "Property and Unit", &["property_id", "unit_id"]),
        fields("tenant", "Tenant", &["tenant_id"]),
        fields(
            "terms",
            "Lease Terms",
            &["start_date", "end_date", "monthly_rent", "currency"],
        ),
        payment("deposit", "Security Deposit"),
        fields("review", "Review and Sign", &["landlord_signature"]),
    ]
}

fn screening_request_steps() -> Vec<StepTemplate> {
    vec![
        fields(
            "applicant",
            "Applicant",
            &["applicant_name", "applicant_email"],
        ),
        fields("consent", "Screening Consent", &["consent_given"]),
        payment("payment", "Screening Fee"),
    ]
}
