use std::fmt;

use async_trait::async_trait;

/// Error raised by a validator; handed back to the host untouched.
pub type ValidatorError = Box<dyn std::error::Error + Send + Sync>;

/// Gate evaluated before the engine leaves a step in the forward direction.
///
/// Returning `Ok(false)` keeps the wizard on the current step. Returning an
/// error does the same and carries the reason the host should render.
#[async_trait]
pub trait StepValidator<C: Sync>: Send + Sync {
    async fn validate(&self, context: &C) -> Result<bool, ValidatorError>;
}

/// Adapter turning a plain closure into a [`StepValidator`].
pub struct FnValidator<F>(F);

impl<F> FnValidator<F> {
    pub fn new(check: F) -> Self {
        Self(check)
    }
}

#[async_trait]
impl<C, F> StepValidator<C> for FnValidator<F>
where
    C: Sync,
    F: Fn(&C) -> Result<bool, ValidatorError> + Send + Sync,
{
    async fn validate(&self, context: &C) -> Result<bool, ValidatorError> {
        (self.0)(context)
    }
}

/// One registered unit of a multi-step flow.
pub struct Step<T, C: Sync = ()> {
    key: String,
    content: T,
    validator: Option<Box<dyn StepValidator<C>>>,
}

impl<T, C: Sync> Step<T, C> {
    pub fn new(key: impl Into<String>, content: T) -> Self {
        Self {
            key: key.into(),
            content,
            validator: None,
        }
    }

    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: StepValidator<C> + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Register a synchronous predicate as the step's gate.
    pub fn with_check<F>(self, check: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
        C: 'static,
    {
        self.with_validator(FnValidator::new(move |context: &C| {
            Ok::<bool, ValidatorError>(check(context))
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn content(&self) -> &T {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut T {
        &mut self.content
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub(crate) async fn passes(&self, context: &C) -> Result<bool, ValidatorError> {
        match &self.validator {
            Some(validator) => validator.validate(context).await,
            None => Ok(true),
        }
    }
}

impl<T: fmt::Debug, C: Sync> fmt::Debug for Step<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("content", &self.content)
            .field("has_validator", &self.has_validator())
            .finish()
    }
}
