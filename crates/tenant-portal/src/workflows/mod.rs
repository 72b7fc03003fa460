pub mod payments;
pub mod stepper;
pub mod wizards;
