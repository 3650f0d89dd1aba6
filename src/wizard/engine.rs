//! Wizard engine — binds the step machine to the HTTP endpoints.
//!
//! The engine owns the CSRF token, gates terminal calls behind a single
//! in-flight flag, and never moves the machine until the server call
//! succeeds: a failed fetch leaves the wizard exactly where it was.

use tracing::warn;
use uuid::Uuid;

use super::client::FlowClient;
use super::state::{Event, Outcome, Step, TransitionError, WizardState};
use crate::error::ClientError;
use crate::session::model::DownsellVariant;

/// Errors surfaced to the UI layer (rendered as the generic alert).
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("security token not loaded yet")]
    CsrfNotReady,

    #[error("another request is in flight")]
    Busy,

    #[error("the offer cannot be accepted from this screen")]
    OfferUnavailable,

    #[error(transparent)]
    Guard(#[from] TransitionError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// A mounted wizard instance for one cancellation attempt.
pub struct WizardEngine {
    state: WizardState,
    client: FlowClient,
    cancellation_id: Uuid,
    csrf_token: Option<String>,
    in_flight: bool,
}

impl WizardEngine {
    /// Mount the wizard, fetching the CSRF token up front. A failed fetch
    /// is tolerated here — terminal actions re-check before firing.
    pub async fn mount(
        client: FlowClient,
        cancellation_id: Uuid,
        variant: DownsellVariant,
    ) -> Self {
        let csrf_token = match client.fetch_csrf_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "CSRF token fetch failed at mount");
                None
            }
        };
        Self {
            state: WizardState::new(variant),
            client,
            cancellation_id,
            csrf_token,
            in_flight: false,
        }
    }

    pub fn step(&self) -> Step {
        self.state.step()
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    /// Mutable access for recording answers as the user fills screens in.
    pub fn state_mut(&mut self) -> &mut WizardState {
        &mut self.state
    }

    pub fn has_csrf_token(&self) -> bool {
        self.csrf_token.is_some()
    }

    /// Re-fetch the CSRF token (after a failed mount).
    pub async fn refresh_csrf(&mut self) -> Result<(), WizardError> {
        let token = self.client.fetch_csrf_token().await?;
        self.csrf_token = Some(token);
        Ok(())
    }

    /// Local navigation passes straight through to the machine.
    pub fn apply(&mut self, event: Event) -> Result<Outcome, TransitionError> {
        self.state.apply(event)
    }

    /// Accept the downsell offer from any still-looking screen.
    pub async fn accept_offer(&mut self) -> Result<Outcome, WizardError> {
        if !self.state.can_accept_offer() {
            return Err(WizardError::OfferUnavailable);
        }
        if self.in_flight {
            return Err(WizardError::Busy);
        }
        let token = self.token()?;

        self.in_flight = true;
        let result = self.client.accept_downsell(self.cancellation_id, &token).await;
        self.in_flight = false;
        result?;

        Ok(self.state.apply(Event::OfferAccepted)?)
    }

    /// Run the terminal submit for the current screen.
    pub async fn complete(&mut self) -> Result<Outcome, WizardError> {
        // Guard and payload first: a blocked screen never reaches the network.
        let payload = self.state.submit_payload()?;
        if self.in_flight {
            return Err(WizardError::Busy);
        }
        let token = self.token()?;

        self.in_flight = true;
        let result = self
            .client
            .submit(
                self.cancellation_id,
                &token,
                &payload.reason_key,
                &payload.reason_text,
            )
            .await;
        self.in_flight = false;
        result?;

        Ok(self.state.apply(Event::Submitted)?)
    }

    fn token(&self) -> Result<String, WizardError> {
        self.csrf_token.clone().ok_or(WizardError::CsrfNotReady)
    }
}
