//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases; timestamps are written as
//! RFC 3339 and parsed leniently on the way back out.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::session::model::{
    CancellationAttempt, DownsellVariant, Subscription, SubscriptionStatus,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, context: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("bad uuid in {context}: {e}")))
}

/// Map a libsql Row to a Subscription.
///
/// Column order: 0:id, 1:user_id, 2:monthly_price_cents, 3:status,
/// 4:created_at, 5:updated_at
fn row_to_subscription(row: &libsql::Row) -> Result<Subscription, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("read subscription id: {e}")))?;
    let user_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("read subscription user: {e}")))?;
    let monthly_price_cents: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("read subscription price: {e}")))?;
    let status_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("read subscription status: {e}")))?;
    let created_str: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("read subscription created_at: {e}")))?;
    let updated_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("read subscription updated_at: {e}")))?;

    Ok(Subscription {
        id: parse_uuid(&id_str, "subscriptions.id")?,
        user_id,
        monthly_price_cents,
        status: status_str
            .parse::<SubscriptionStatus>()
            .map_err(DatabaseError::Serialization)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a CancellationAttempt.
///
/// Column order: 0:id, 1:user_id, 2:subscription_id, 3:downsell_variant,
/// 4:accepted_downsell, 5:reason_key, 6:reason_text, 7:created_at,
/// 8:updated_at
fn row_to_attempt(row: &libsql::Row) -> Result<CancellationAttempt, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("read attempt id: {e}")))?;
    let user_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("read attempt user: {e}")))?;
    let sub_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("read attempt subscription: {e}")))?;
    let variant_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("read attempt variant: {e}")))?;
    let accepted: Option<i64> = row.get(4).ok();
    let reason_key: Option<String> = row.get(5).ok();
    let reason_text: Option<String> = row.get(6).ok();
    let created_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("read attempt created_at: {e}")))?;
    let updated_str: String = row
        .get(8)
        .map_err(|e| DatabaseError::Query(format!("read attempt updated_at: {e}")))?;

    Ok(CancellationAttempt {
        id: parse_uuid(&id_str, "cancellations.id")?,
        user_id,
        subscription_id: parse_uuid(&sub_str, "cancellations.subscription_id")?,
        downsell_variant: variant_str
            .parse::<DownsellVariant>()
            .map_err(DatabaseError::Serialization)?,
        accepted_downsell: accepted.map(|v| v != 0),
        reason_key,
        reason_text,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const SUB_COLUMNS: &str = "id, user_id, monthly_price_cents, status, created_at, updated_at";
const ATTEMPT_COLUMNS: &str = "id, user_id, subscription_id, downsell_variant, accepted_downsell, \
                               reason_key, reason_text, created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO subscriptions (id, user_id, monthly_price_cents, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sub.id.to_string(),
                    sub.user_id.clone(),
                    sub.monthly_price_cents,
                    sub.status.as_str(),
                    sub.created_at.to_rfc3339(),
                    sub.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert subscription: {e}")))?;
        debug!(subscription = %sub.id, user = %sub.user_id, "Subscription inserted");
        Ok(())
    }

    async fn get_subscription(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SUB_COLUMNS} FROM subscriptions WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get subscription: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read subscription row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_subscription(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest_open_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SUB_COLUMNS} FROM subscriptions
                     WHERE user_id = ?1 AND status IN ('active', 'pending_cancellation')
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest subscription: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read subscription row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_subscription(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_subscription_status(
        &self,
        user_id: &str,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE subscriptions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                params![
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    user_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update subscription status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "subscription".to_string(),
                id: id.to_string(),
            });
        }
        debug!(subscription = %id, status = %status, "Subscription status updated");
        Ok(())
    }

    async fn create_attempt(
        &self,
        attempt: &CancellationAttempt,
    ) -> Result<CancellationAttempt, DatabaseError> {
        // Upsert: a concurrent bootstrap may have inserted first. The unique
        // index on (user_id, subscription_id) makes the conflict explicit and
        // the re-select below returns whichever row won.
        self.conn()
            .execute(
                "INSERT INTO cancellations (id, user_id, subscription_id, downsell_variant, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, subscription_id) DO NOTHING",
                params![
                    attempt.id.to_string(),
                    attempt.user_id.clone(),
                    attempt.subscription_id.to_string(),
                    attempt.downsell_variant.as_str(),
                    attempt.created_at.to_rfc3339(),
                    attempt.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert attempt: {e}")))?;

        let winner = self
            .latest_attempt_for_subscription(&attempt.user_id, attempt.subscription_id)
            .await?
            .ok_or_else(|| {
                DatabaseError::Query("attempt upsert returned no row".to_string())
            })?;
        debug!(attempt = %winner.id, user = %winner.user_id, "Attempt ensured");
        Ok(winner)
    }

    async fn get_attempt(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<Option<CancellationAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ATTEMPT_COLUMNS} FROM cancellations WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get attempt: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read attempt row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_attempt(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest_attempt_for_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Option<CancellationAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM cancellations
                     WHERE user_id = ?1 AND subscription_id = ?2
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![user_id, subscription_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest attempt: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read attempt row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_attempt(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_attempt_variant(
        &self,
        user_id: &str,
        id: Uuid,
        variant: DownsellVariant,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE cancellations SET downsell_variant = ?1, updated_at = ?2
                 WHERE id = ?3 AND user_id = ?4",
                params![
                    variant.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    user_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update attempt variant: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "cancellation".to_string(),
                id: id.to_string(),
            });
        }
        debug!(attempt = %id, variant = %variant, "Attempt variant overridden");
        Ok(())
    }

    async fn record_outcome(
        &self,
        user_id: &str,
        id: Uuid,
        accepted_downsell: bool,
        reason_key: &str,
        reason_text: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE cancellations
                 SET accepted_downsell = ?1, reason_key = ?2, reason_text = ?3, updated_at = ?4
                 WHERE id = ?5 AND user_id = ?6",
                params![
                    accepted_downsell as i64,
                    reason_key,
                    reason_text,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    user_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record outcome: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "cancellation".to_string(),
                id: id.to_string(),
            });
        }
        debug!(attempt = %id, accepted_downsell, reason_key, "Attempt outcome recorded");
        Ok(())
    }

    async fn delete_attempts_for_user(&self, user_id: &str) -> Result<usize, DatabaseError> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM cancellations WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete attempts: {e}")))?;
        debug!(user = %user_id, deleted, "Attempts deleted");
        Ok(deleted as usize)
    }
}
