//! Billing-domain models — subscriptions, cancellation attempts, pricing.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing status of a subscription.
///
/// The wizard only ever moves a subscription between these two states:
/// confirming a cancellation parks it at `PendingCancellation`, accepting
/// the downsell offer returns it to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PendingCancellation,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PendingCancellation => "pending_cancellation",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "pending_cancellation" => Ok(Self::PendingCancellation),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// The A/B experiment arm, fixed at first attempt creation.
///
/// `A` goes straight to the usage survey; `B` sees the upfront discount
/// offer first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownsellVariant {
    A,
    B,
}

impl DownsellVariant {
    /// Draw a variant with an unbiased coin flip from OS randomness.
    pub fn assign() -> Self {
        if OsRng.next_u32() & 1 == 0 {
            Self::A
        } else {
            Self::B
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl std::fmt::Display for DownsellVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownsellVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => Err(format!("unknown downsell variant: {other}")),
        }
    }
}

/// A user's paid plan. Created by the external billing system; the wizard
/// only reads it and flips its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    /// Monthly price in cents (2500 or 2900 on the current plans).
    pub monthly_price_cents: i64,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(user_id: impl Into<String>, monthly_price_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            monthly_price_cents,
            status: SubscriptionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One row per (user, subscription) pair tracking an in-progress or
/// completed cancellation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationAttempt {
    pub id: Uuid,
    pub user_id: String,
    pub subscription_id: Uuid,
    /// Assigned once at creation; overwritten only by an explicit override.
    pub downsell_variant: DownsellVariant,
    /// None until a terminal action fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_downsell: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CancellationAttempt {
    pub fn new(
        user_id: impl Into<String>,
        subscription_id: Uuid,
        variant: DownsellVariant,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            subscription_id,
            downsell_variant: variant,
            accepted_downsell: None,
            reason_key: None,
            reason_text: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One price point (monthly/annual) in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub monthly: Decimal,
    pub annual: Decimal,
}

/// Price points handed to the wizard: the control plan and the variant-B
/// offer plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPricing {
    pub control: PricePoint,
    pub offer: PricePoint,
}

impl PlanPricing {
    /// Derive pricing from the subscription's monthly price.
    ///
    /// The $25 plan is offered at $15, every other plan at $19.
    pub fn from_monthly_cents(cents: i64) -> Self {
        let control_monthly = Decimal::new(cents, 2);
        let offer_monthly = if control_monthly == dec!(25) {
            dec!(15)
        } else {
            dec!(19)
        };
        Self {
            control: PricePoint {
                monthly: control_monthly,
                annual: dec!(29),
            },
            offer: PricePoint {
                monthly: offer_monthly,
                annual: offer_monthly,
            },
        }
    }

    /// Price quoted on the downsell surfaces: half the control monthly.
    pub fn downsell_monthly(&self) -> Decimal {
        (self.control.monthly / dec!(2)).round_dp(2)
    }
}
