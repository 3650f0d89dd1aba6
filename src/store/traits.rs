//! Backend-agnostic `Database` trait — the row-store collaborator.
//!
//! Every lookup and mutation is scoped by the caller's user id; a row the
//! caller does not own is indistinguishable from a missing row.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::session::model::{CancellationAttempt, Subscription, SubscriptionStatus, DownsellVariant};

#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Subscriptions ───────────────────────────────────────────────

    /// Insert a subscription row (billing-system stand-in, used for seeding).
    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), DatabaseError>;

    /// Get a subscription by id, scoped to the caller.
    async fn get_subscription(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<Option<Subscription>, DatabaseError>;

    /// The caller's most recent subscription that is `active` or
    /// `pending_cancellation`.
    async fn latest_open_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, DatabaseError>;

    /// Flip a subscription's status.
    async fn update_subscription_status(
        &self,
        user_id: &str,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), DatabaseError>;

    // ── Cancellation attempts ───────────────────────────────────────

    /// Insert an attempt, converging on the existing row when one already
    /// exists for the same (user, subscription) pair. Returns the winning
    /// row, which may differ from `attempt` if another bootstrap raced this
    /// one.
    async fn create_attempt(
        &self,
        attempt: &CancellationAttempt,
    ) -> Result<CancellationAttempt, DatabaseError>;

    /// Get an attempt by id, scoped to the caller.
    async fn get_attempt(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<Option<CancellationAttempt>, DatabaseError>;

    /// The most recent attempt for a subscription, if any.
    async fn latest_attempt_for_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Option<CancellationAttempt>, DatabaseError>;

    /// Overwrite the persisted variant (explicit override path only).
    async fn update_attempt_variant(
        &self,
        user_id: &str,
        id: Uuid,
        variant: DownsellVariant,
    ) -> Result<(), DatabaseError>;

    /// Record a terminal outcome on an attempt.
    async fn record_outcome(
        &self,
        user_id: &str,
        id: Uuid,
        accepted_downsell: bool,
        reason_key: &str,
        reason_text: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Development reset: delete all of a user's attempts. Returns the
    /// number of rows removed.
    async fn delete_attempts_for_user(&self, user_id: &str) -> Result<usize, DatabaseError>;
}
