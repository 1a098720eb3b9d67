//! Credit pools and per-principal allocations.
//!
//! A pool is the shared credit balance of a billing entity (usually an
//! organization). Allocations carve per-principal budgets out of a pool.
//! `available_milli` and `remaining_milli` are always derived, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AllocationId, PoolId, PrincipalId};

/// A shared credit balance owned by one billing entity.
///
/// Pools are never deleted, only zeroed. `total_milli` grows on purchases
/// and paid invoices and shrinks only via explicit refund at the pool level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditPool {
    /// The pool identity.
    pub pool_id: PoolId,

    /// Total credits in the pool, in milli-credits.
    pub total_milli: i64,

    /// Credits carved out into allocations, in milli-credits.
    pub allocated_milli: i64,

    /// Credits consumed across all allocations, in milli-credits.
    pub used_milli: i64,

    /// When the pool was created.
    pub created_at: DateTime<Utc>,

    /// When the pool was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CreditPool {
    /// Create a new empty pool.
    #[must_use]
    pub fn new(pool_id: PoolId) -> Self {
        let now = Utc::now();
        Self {
            pool_id,
            total_milli: 0,
            allocated_milli: 0,
            used_milli: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credits not yet carved into any allocation, in milli-credits.
    ///
    /// Derived value. `allocated_milli <= total_milli` is enforced at
    /// allocation time, so this never goes negative through the ledger API.
    #[must_use]
    pub const fn available_milli(&self) -> i64 {
        self.total_milli - self.allocated_milli
    }

    /// Whether `amount` more milli-credits can be carved into an allocation.
    #[must_use]
    pub const fn can_allocate(&self, amount_milli: i64) -> bool {
        amount_milli <= self.available_milli()
    }
}

/// A per-principal budget carved from a pool.
///
/// At most one allocation per `(pool_id, principal_id)` is active at a time.
/// Reallocation deactivates the old row rather than mutating it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Time-ordered allocation id.
    pub allocation_id: AllocationId,

    /// The pool this budget is carved from.
    pub pool_id: PoolId,

    /// The principal this budget belongs to.
    pub principal_id: PrincipalId,

    /// Budget size in milli-credits.
    pub allocated_milli: i64,

    /// Consumed milli-credits. Never exceeds `allocated_milli`.
    pub used_milli: i64,

    /// Whether this is the active row for the `(pool, principal)` pair.
    pub active: bool,

    /// Actor that created this allocation (audit trail).
    pub allocated_by: String,

    /// Optional expiry. Expired allocations reject deductions.
    pub expires_at: Option<DateTime<Utc>>,

    /// When the allocation was created.
    pub created_at: DateTime<Utc>,

    /// When the allocation was deactivated, if it has been replaced.
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Allocation {
    /// Create a new active allocation.
    #[must_use]
    pub fn new(
        pool_id: PoolId,
        principal_id: PrincipalId,
        allocated_milli: i64,
        allocated_by: impl Into<String>,
    ) -> Self {
        Self {
            allocation_id: AllocationId::generate(),
            pool_id,
            principal_id,
            allocated_milli,
            used_milli: 0,
            active: true,
            allocated_by: allocated_by.into(),
            expires_at: None,
            created_at: Utc::now(),
            deactivated_at: None,
        }
    }

    /// Set an expiry on the allocation.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Unused budget in milli-credits. Derived value.
    #[must_use]
    pub const fn remaining_milli(&self) -> i64 {
        self.allocated_milli - self.used_milli
    }

    /// Whether a deduction of `amount_milli` fits the remaining budget.
    #[must_use]
    pub const fn can_deduct(&self, amount_milli: i64) -> bool {
        self.remaining_milli() >= amount_milli
    }

    /// Whether the allocation has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Format milli-credits as a decimal credit string for display boundaries.
///
/// Internal arithmetic stays in integer milli-credits; this conversion is
/// only for response headers and human-facing output.
#[must_use]
pub fn format_credits(amount_milli: i64) -> String {
    let sign = if amount_milli < 0 { "-" } else { "" };
    let abs = amount_milli.unsigned_abs();
    format!("{sign}{}.{:03}", abs / 1000, abs % 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_empty() {
        let pool = CreditPool::new(PoolId::generate());
        assert_eq!(pool.total_milli, 0);
        assert_eq!(pool.allocated_milli, 0);
        assert_eq!(pool.used_milli, 0);
        assert_eq!(pool.available_milli(), 0);
    }

    #[test]
    fn available_is_total_minus_allocated() {
        let mut pool = CreditPool::new(PoolId::generate());
        pool.total_milli = 10_000;
        pool.allocated_milli = 4_000;
        assert_eq!(pool.available_milli(), 6_000);
        assert!(pool.can_allocate(6_000));
        assert!(!pool.can_allocate(6_001));
    }

    #[test]
    fn allocation_remaining_and_deduct_check() {
        let mut alloc = Allocation::new(
            PoolId::generate(),
            PrincipalId::generate(),
            10_000,
            "admin@tally",
        );
        assert_eq!(alloc.remaining_milli(), 10_000);

        alloc.used_milli = 9_950;
        assert_eq!(alloc.remaining_milli(), 50);
        assert!(alloc.can_deduct(50));
        assert!(!alloc.can_deduct(51));
    }

    #[test]
    fn allocation_expiry() {
        let now = Utc::now();
        let alloc = Allocation::new(PoolId::generate(), PrincipalId::generate(), 100, "admin")
            .with_expiry(now - chrono::Duration::seconds(1));
        assert!(alloc.is_expired(now));

        let fresh = Allocation::new(PoolId::generate(), PrincipalId::generate(), 100, "admin");
        assert!(!fresh.is_expired(now));
    }

    #[test]
    fn format_credits_display() {
        assert_eq!(format_credits(0), "0.000");
        assert_eq!(format_credits(50), "0.050");
        assert_eq!(format_credits(9_950), "9.950");
        assert_eq!(format_credits(1_000_000), "1000.000");
        assert_eq!(format_credits(-1_500), "-1.500");
    }
}
