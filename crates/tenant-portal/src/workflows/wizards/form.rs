use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflows::payments::{PaymentId, PaymentLookup, PaymentStatus};
use crate::workflows::stepper::{StepValidator, ValidatorError};

/// Field values collected across a wizard's steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormState(BTreeMap<String, Value>);

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply submitted values; an explicit `null` clears a field.
    pub fn merge(&mut self, fields: BTreeMap<String, Value>) {
        for (key, value) in fields {
            if value.is_null() {
                self.0.remove(&key);
            } else {
                self.0.insert(key, value);
            }
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn is_filled(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|value| !is_blank(value))
    }

    /// Required keys that are absent or blank, in the order given.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| !self.is_filled(key))
            .map(|key| key.to_string())
            .collect()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(entries) => entries.is_empty(),
        Value::Bool(true) | Value::Number(_) => false,
    }
}

/// Reasons a wizard step refuses to advance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<String> },
    #[error("payment {payment_id} is unknown")]
    UnknownPayment { payment_id: String },
    #[error("payment {payment_id} ended as {status}")]
    PaymentNotSettled {
        payment_id: String,
        status: PaymentStatus,
    },
}

/// Passes once every listed field holds a non-blank value.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    fields: Vec<&'static str>,
}

impl RequiredFields {
    pub fn new(fields: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }
}

#[async_trait]
impl StepValidator<FormState> for RequiredFields {
    async fn validate(&self, form: &FormState) -> Result<bool, ValidatorError> {
        let fields = form.missing(&self.fields);
        if fields.is_empty() {
            Ok(true)
        } else {
            Err(Box::new(FormError::MissingFields { fields }))
        }
    }
}

/// Passes once the payment named by `field` has succeeded.
///
/// A payment still in flight blocks without an error so the host can keep
/// showing its progress.
pub struct PaymentSettled {
    field: &'static str,
    payments: Arc<dyn PaymentLookup>,
}

impl PaymentSettled {
    pub fn new(field: &'static str, payments: Arc<dyn PaymentLookup>) -> Self {
        Self { field, payments }
    }
}

#[async_trait]
impl StepValidator<FormState> for PaymentSettled {
    async fn validate(&self, form: &FormState) -> Result<bool, ValidatorError> {
        let Some(payment_id) = form.text(self.field) else {
            return Err(Box::new(FormError::MissingFields {
                fields: vec![self.field.to_string()],
            }));
        };

        let status = self
            .payments
            .payment_status(&PaymentId(payment_id.to_string()));
        match status {
            Some(PaymentStatus::Success) => Ok(true),
            Some(status @ (PaymentStatus::Failed | PaymentStatus::Timeout)) => {
                Err(Box::new(FormError::PaymentNotSettled {
                    payment_id: payment_id.to_string(),
                    status,
                }))
            }
            Some(_) => Ok(false),
            None => Err(Box::new(FormError::UnknownPayment {
                payment_id: payment_id.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_values_count_as_missing() {
        let mut form = FormState::new();
        form.merge(BTreeMap::from([
            ("full_name".to_string(), json!("  ")),
            ("adults".to_string(), json!(0)),
            ("consent_given".to_string(), json!(false)),
            ("pets".to_string(), json!([])),
        ]));

        assert_eq!(
            form.missing(&["full_name", "adults", "consent_given", "pets", "email"]),
            vec!["full_name", "consent_given", "pets", "email"]
        );
    }

    #[test]
    fn null_clears_previous_values() {
        let mut form = FormState::new();
        form.set("employer", "Acme Realty");
        form.merge(BTreeMap::from([("employer".to_string(), Value::Null)]));
        assert!(!form.is_filled("employer"));
        assert!(form.fields().is_empty());
    }

    #[tokio::test]
    async fn required_fields_names_every_gap() {
        let validator = RequiredFields::new(["email", "phone"]);
        let mut form = FormState::new();
        form.set("phone", "+237690000000");

        let err = validator.validate(&form).await.expect_err("email missing");
        let form_error = err.downcast_ref::<FormError>().expect("form error");
        assert_eq!(
            form_error,
            &FormError::MissingFields {
                fields: vec!["email".to_string()],
            }
        );

        form.set("email", "tenant@example.com");
        assert!(validator.validate(&form).await.expect("valid"));
    }
}
