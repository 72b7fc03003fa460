use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::step::{Step, ValidatorError};

/// Last navigation direction, kept for transition styling only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// Result of a forward navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Advance {
    Moved { from: usize, to: usize },
    /// The current step's validator answered `false`.
    Blocked,
    /// The last step validated; submission belongs to the host.
    Completed,
}

#[derive(Debug, thiserror::Error)]
pub enum StepperError {
    #[error("a stepper needs at least one step")]
    Empty,
    #[error("step index {index} is outside 0..{len}")]
    OutOfRange { index: usize, len: usize },
    #[error("step '{step}' rejected: {source}")]
    Validator {
        step: String,
        #[source]
        source: ValidatorError,
    },
}

/// Host-facing description of the engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepperSnapshot {
    pub current_index: usize,
    pub current_key: String,
    pub direction: Direction,
    pub total: usize,
    pub is_first: bool,
    pub is_last: bool,
    pub keys: Vec<String>,
}

/// Sequencer over an ordered, fixed list of steps.
///
/// `current_index` always addresses an existing step. Navigation takes
/// `&mut self`, so a validation in flight excludes every other move.
#[derive(Debug)]
pub struct StepperEngine<T, C: Sync = ()> {
    steps: Vec<Step<T, C>>,
    current: usize,
    direction: Direction,
}

impl<T, C: Sync> StepperEngine<T, C> {
    pub fn new(steps: Vec<Step<T, C>>) -> Result<Self, StepperError> {
        if steps.is_empty() {
            return Err(StepperError::Empty);
        }

        Ok(Self {
            steps,
            current: 0,
            direction: Direction::Forward,
        })
    }

    /// Validate the current step and move forward when it passes.
    pub async fn go_next(&mut self, context: &C) -> Result<Advance, StepperError> {
        let step = &self.steps[self.current];
        let passed = step
            .passes(context)
            .await
            .map_err(|source| StepperError::Validator {
                step: step.key().to_string(),
                source,
            })?;

        if !passed {
            debug!(step = step.key(), "step validation blocked navigation");
            return Ok(Advance::Blocked);
        }

        if self.is_last() {
            return Ok(Advance::Completed);
        }

        let from = self.current;
        self.current += 1;
        self.direction = Direction::Forward;
        debug!(from, to = self.current, "stepper advanced");
        Ok(Advance::Moved {
            from,
            to: self.current,
        })
    }

    /// Run every step's validator against `context`, in order, and return
    /// the index of the first step that does not pass.
    ///
    /// `go_to` bypasses validators, so a host finishing a flow uses this to
    /// confirm the steps it skipped.
    pub async fn first_unmet(&self, context: &C) -> Result<Option<usize>, StepperError> {
        for (index, step) in self.steps.iter().enumerate() {
            let passed = step
                .passes(context)
                .await
                .map_err(|source| StepperError::Validator {
                    step: step.key().to_string(),
                    source,
                })?;
            if !passed {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Step back without validation. Returns `false` on the first step.
    pub fn go_back(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }

        self.current -= 1;
        self.direction = Direction::Backward;
        true
    }

    /// Jump directly to `index`, bypassing validators.
    pub fn go_to(&mut self, index: usize) -> Result<(), StepperError> {
        let len = self.steps.len();
        if index >= len {
            error!(index, len, "stepper jump outside registered steps");
            return Err(StepperError::OutOfRange { index, len });
        }

        if index > self.current {
            self.direction = Direction::Forward;
        } else if index < self.current {
            self.direction = Direction::Backward;
        }
        self.current = index;
        Ok(())
    }

    /// Position of a step by key, for deep links expressed as names.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.key() == key)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn current(&self) -> &Step<T, C> {
        &self.steps[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Step<T, C> {
        &mut self.steps[self.current]
    }

    pub fn steps(&self) -> &[Step<T, C>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_first(&self) -> bool {
        self.current == 0
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 == self.steps.len()
    }

    pub fn snapshot(&self) -> StepperSnapshot {
        StepperSnapshot {
            current_index: self.current,
            current_key: self.current().key().to_string(),
            direction: self.direction,
            total: self.steps.len(),
            is_first: self.is_first(),
            is_last: self.is_last(),
            keys: self.steps.iter().map(|step| step.key().to_string()).collect(),
        }
    }
}
