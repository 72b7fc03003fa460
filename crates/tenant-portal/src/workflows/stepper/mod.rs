//! Ordered multi-step sequencing with validation-gated forward moves.
//!
//! Steps are registered explicitly as `{ key, content, validator }` records;
//! the engine owns the current position and the last navigation direction.

mod engine;
mod step;

pub use engine::{Advance, Direction, StepperEngine, StepperError, StepperSnapshot};
pub use step::{FnValidator, Step, StepValidator, ValidatorError};
