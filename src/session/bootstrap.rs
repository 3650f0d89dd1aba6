//! Session bootstrap — find-or-create the active cancellation attempt.
//!
//! Runs once per page load: resolves the caller's open subscription,
//! assigns the experiment variant exactly once, and hands the wizard its
//! attempt id and pricing. Attempt creation is an upsert, so two
//! simultaneous first visits converge on a single row.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{Error, SessionError};
use crate::session::model::{
    CancellationAttempt, DownsellVariant, PlanPricing, Subscription, SubscriptionStatus,
};
use crate::store::Database;

/// Everything the wizard needs from the server before it mounts.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub subscription: Subscription,
    pub variant: DownsellVariant,
    pub cancellation_id: Uuid,
    pub pricing: PlanPricing,
}

/// Find-or-create entry points for the cancellation flow.
pub struct SessionBootstrap {
    db: Arc<dyn Database>,
}

impl SessionBootstrap {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Resolve the caller's session: open subscription, attempt, variant.
    ///
    /// The variant is drawn once when the attempt is first created and then
    /// reused forever; `override_variant` is the deliberate escape hatch
    /// that overwrites the persisted arm (testing only).
    pub async fn ensure_session(
        &self,
        user_id: &str,
        override_variant: Option<DownsellVariant>,
    ) -> Result<SessionContext, Error> {
        let mut subscription = self
            .db
            .latest_open_subscription(user_id)
            .await?
            .ok_or_else(|| SessionError::NoSubscription {
                user_id: user_id.to_string(),
            })?;

        let attempt = match self
            .db
            .latest_attempt_for_subscription(user_id, subscription.id)
            .await?
        {
            Some(existing) => existing,
            None => {
                let attempt = self
                    .create_first_attempt(user_id, subscription.id)
                    .await?;
                subscription.status = SubscriptionStatus::PendingCancellation;
                attempt
            }
        };

        let mut variant = attempt.downsell_variant;
        if let Some(forced) = override_variant {
            if forced != variant {
                self.db
                    .update_attempt_variant(user_id, attempt.id, forced)
                    .await?;
                info!(attempt = %attempt.id, variant = %forced, "Variant override persisted");
            }
            variant = forced;
        }

        Ok(SessionContext {
            pricing: PlanPricing::from_monthly_cents(subscription.monthly_price_cents),
            cancellation_id: attempt.id,
            variant,
            subscription,
        })
    }

    /// Find-or-create an attempt for an explicit subscription id — backs
    /// `POST /cancel/start`.
    pub async fn start_attempt(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<CancellationAttempt, Error> {
        let subscription = self
            .db
            .get_subscription(user_id, subscription_id)
            .await?
            .ok_or(SessionError::SubscriptionNotFound {
                id: subscription_id,
            })?;

        if let Some(existing) = self
            .db
            .latest_attempt_for_subscription(user_id, subscription.id)
            .await?
        {
            return Ok(existing);
        }

        self.create_first_attempt(user_id, subscription.id).await
    }

    /// Development reset: wipe the user's attempts so the experiment can
    /// re-randomize on the next visit.
    pub async fn reset(&self, user_id: &str) -> Result<usize, Error> {
        let deleted = self.db.delete_attempts_for_user(user_id).await?;
        if deleted > 0 {
            info!(user = user_id, deleted, "Cancellation attempts reset");
        }
        Ok(deleted)
    }

    async fn create_first_attempt(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<CancellationAttempt, Error> {
        let fresh = CancellationAttempt::new(user_id, subscription_id, DownsellVariant::assign());
        let attempt = self.db.create_attempt(&fresh).await?;
        self.db
            .update_subscription_status(
                user_id,
                subscription_id,
                SubscriptionStatus::PendingCancellation,
            )
            .await?;
        info!(
            attempt = %attempt.id,
            subscription = %subscription_id,
            variant = %attempt.downsell_variant,
            "Cancellation attempt created"
        );
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    const USER: &str = "u1";

    async fn setup() -> (SessionBootstrap, Arc<dyn Database>, Subscription) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sub = Subscription::new(USER, 2500);
        db.insert_subscription(&sub).await.unwrap();
        (SessionBootstrap::new(Arc::clone(&db)), db, sub)
    }

    #[tokio::test]
    async fn first_visit_creates_attempt_and_parks_subscription() {
        let (bootstrap, db, sub) = setup().await;

        let ctx = bootstrap.ensure_session(USER, None).await.unwrap();
        assert_eq!(ctx.subscription.id, sub.id);
        assert_eq!(
            ctx.subscription.status,
            SubscriptionStatus::PendingCancellation
        );

        let stored = db.get_subscription(USER, sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::PendingCancellation);
    }

    #[tokio::test]
    async fn revisit_reuses_attempt_and_variant() {
        let (bootstrap, db, sub) = setup().await;

        let first = bootstrap.ensure_session(USER, None).await.unwrap();
        let second = bootstrap.ensure_session(USER, None).await.unwrap();
        assert_eq!(first.cancellation_id, second.cancellation_id);
        assert_eq!(first.variant, second.variant);

        let attempts = db
            .latest_attempt_for_subscription(USER, sub.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempts.id, first.cancellation_id);
    }

    #[tokio::test]
    async fn override_is_persisted_for_later_visits() {
        let (bootstrap, _db, _sub) = setup().await;

        let forced = bootstrap
            .ensure_session(USER, Some(DownsellVariant::B))
            .await
            .unwrap();
        assert_eq!(forced.variant, DownsellVariant::B);

        let later = bootstrap.ensure_session(USER, None).await.unwrap();
        assert_eq!(later.variant, DownsellVariant::B);
    }

    #[tokio::test]
    async fn no_subscription_fails() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let bootstrap = SessionBootstrap::new(db);

        let err = bootstrap.ensure_session(USER, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::NoSubscription { .. })
        ));
    }

    #[tokio::test]
    async fn start_attempt_reuses_existing_row() {
        let (bootstrap, _db, sub) = setup().await;

        let first = bootstrap.start_attempt(USER, sub.id).await.unwrap();
        let second = bootstrap.start_attempt(USER, sub.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.downsell_variant, second.downsell_variant);
    }

    #[tokio::test]
    async fn start_attempt_rejects_foreign_subscription() {
        let (bootstrap, db, _sub) = setup().await;
        let foreign = Subscription::new("someone-else", 2900);
        db.insert_subscription(&foreign).await.unwrap();

        let err = bootstrap.start_attempt(USER, foreign.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::SubscriptionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reset_allows_re_randomization() {
        let (bootstrap, _db, _sub) = setup().await;

        let first = bootstrap.ensure_session(USER, None).await.unwrap();
        assert_eq!(bootstrap.reset(USER).await.unwrap(), 1);

        let second = bootstrap.ensure_session(USER, None).await.unwrap();
        assert_ne!(first.cancellation_id, second.cancellation_id);
    }
}
