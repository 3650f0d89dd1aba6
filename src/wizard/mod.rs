//! The cancellation wizard — step machine, local guards, HTTP client, and
//! the engine tying them together.

pub mod client;
pub mod engine;
pub mod state;
pub mod validation;

pub use client::FlowClient;
pub use engine::{WizardEngine, WizardError};
pub use state::{Answers, Event, ExitDisposition, Outcome, Step, WizardState};
