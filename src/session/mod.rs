//! Session bootstrap and the billing-domain models it hands the wizard.

pub mod bootstrap;
pub mod model;

pub use bootstrap::{SessionBootstrap, SessionContext};
