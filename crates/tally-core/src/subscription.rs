//! Subscription state mirrored from the external billing provider.
//!
//! `SubscriptionRecord` is written exclusively by the webhook reconciliation
//! processor. Status transitions are validated against a small state machine
//! so out-of-order webhook delivery degrades to ignored no-ops instead of
//! corrupting state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PrincipalId;

/// Internal mirror of an external billing-provider subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// The billing entity this subscription belongs to.
    pub principal_id: PrincipalId,

    /// Provider plan code, also used as the pricing/quota tier key.
    pub plan_code: String,

    /// Current lifecycle status.
    pub status: SubscriptionStatus,

    /// Provider-side subscription id.
    pub external_subscription_id: String,

    /// End of the current billing period.
    pub current_period_end: DateTime<Utc>,

    /// When this mirror was last written.
    pub updated_at: DateTime<Utc>,
}

/// Subscription lifecycle status.
///
/// Allowed transitions: `trialing -> active`, `active <-> past_due`,
/// anything non-terminal `-> canceled`. `canceled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In trial, not yet paying.
    Trialing,

    /// Paying and current.
    Active,

    /// A payment failed; in the grace window.
    PastDue,

    /// Terminated. Terminal state.
    Canceled,
}

impl SubscriptionStatus {
    /// Whether moving from `self` to `to` is a recognized transition.
    ///
    /// Same-state "transitions" are allowed so replayed or out-of-order
    /// events apply idempotently from the current state.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        if self == to {
            return true;
        }
        match (self, to) {
            (Self::Trialing, Self::Active | Self::Canceled)
            | (Self::Active, Self::PastDue | Self::Canceled)
            | (Self::PastDue, Self::Active | Self::Canceled) => true,
            _ => false,
        }
    }

    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}
