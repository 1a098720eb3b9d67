//! `RocksDB` storage layer for the tally credit ledger.
//!
//! This crate owns all durable state and every atomic compound operation
//! the ledger contract requires: conditional deduction, pool credit,
//! allocation replacement, refund, quota check-and-increment, and
//! webhook-event application. Each compound operation serializes on a
//! striped key lock and commits through a single `WriteBatch`, so there is
//! one lock scope and no read-then-write gap.
//!
//! # Column families
//!
//! See [`schema`] for the full layout: pools, active and historical
//! allocations, attribution records with allocation and correlation
//! indexes, the pool-level ledger, subscription mirrors, memberships,
//! processed webhook events, and quota counters.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod locks;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{
    Allocation, AllocationId, AttributionDraft, AttributionId, CreditPool, OrgMembership,
    PoolId, PoolLedgerEntry, PrincipalId, QuotaDecision, QuotaLimits, QuotaWindow,
    SubscriptionRecord, SubscriptionStatus, UsageAttributionRecord,
};

/// Result of a successful (or deduplicated) deduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductOutcome {
    /// The attribution record written for (or previously written by) this
    /// correlation id.
    pub attribution_id: AttributionId,

    /// Remaining allocation budget after the deduction, in milli-credits.
    pub remaining_milli: i64,

    /// True when the correlation id had already been committed and the
    /// stored outcome was returned instead of deducting again.
    pub deduplicated: bool,
}

/// Result of a refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    /// The refund attribution record.
    pub attribution_id: AttributionId,

    /// Milli-credits actually returned. Less than requested when the
    /// refund was clamped to avoid negative `used_milli`.
    pub refunded_milli: i64,

    /// True when the requested amount was clamped (anomaly, logged).
    pub clamped: bool,
}

/// How a webhook event mutates the subscription mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMutation {
    /// Insert or update the full record (subscription created/updated).
    Upsert {
        /// Provider plan code.
        plan_code: String,
        /// Target status carried by the event.
        status: SubscriptionStatus,
        /// Provider-side subscription id.
        external_subscription_id: String,
        /// End of the current billing period.
        current_period_end: DateTime<Utc>,
    },

    /// Terminal cancellation. Credits are not touched.
    MarkCanceled,

    /// Payment failed; enter the grace window. Granted credits are not
    /// clawed back.
    MarkPastDue,
}

/// Outcome of applying a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event's effect was committed and the event marked processed.
    Applied,

    /// The event id was already processed; nothing was reapplied.
    Duplicate,

    /// The event named an unrecognized transition (or an unknown record)
    /// and was ignored; it is still marked processed.
    Ignored,
}

/// A processed webhook event (dedup row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Provider event id.
    pub event_id: String,

    /// When we first applied it.
    pub received_at: DateTime<Utc>,

    /// Short label of the applied effect, for audit.
    pub result_hash: Option<String>,
}

/// The storage trait defining all ledger operations.
///
/// Implementations must make every compound operation atomic with respect
/// to concurrent callers on the same key, and keep cross-key operations
/// concurrent (no global lock).
pub trait Store: Send + Sync {
    // =========================================================================
    // Pools
    // =========================================================================

    /// Get a pool by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_pool(&self, pool_id: &PoolId) -> Result<Option<CreditPool>>;

    /// Increase a pool's total credits, creating the pool if absent.
    ///
    /// Returns the new total. Never touches `allocated_milli`. Appends a
    /// pool ledger entry naming `reason` and `actor`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidAmount` for negative amounts.
    fn credit_pool(
        &self,
        pool_id: &PoolId,
        amount_milli: i64,
        reason: &str,
        actor: &str,
    ) -> Result<i64>;

    /// List a pool's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_pool_ledger(
        &self,
        pool_id: &PoolId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PoolLedgerEntry>>;

    // =========================================================================
    // Ledger operations
    // =========================================================================

    /// Advisory check that the active allocation can cover `amount_milli`.
    ///
    /// Not a reservation: a subsequent `deduct` may still fail, and `deduct`
    /// re-checks atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_sufficient(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
    ) -> Result<bool>;

    /// Atomically deduct from the active allocation and append attribution.
    ///
    /// One atomic unit: increment `allocation.used_milli` only if
    /// `allocated - used >= amount`, increment `pool.used_milli`, and write
    /// the attribution record with its indexes. If the condition fails,
    /// nothing is written. A previously committed `correlation_id` returns
    /// the stored outcome with `deduplicated = true`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if pool or active allocation is missing.
    /// - `StoreError::AllocationExpired` past `expires_at`.
    /// - `StoreError::InsufficientCredits` when the budget cannot cover it.
    fn deduct(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        draft: AttributionDraft,
    ) -> Result<DeductOutcome>;

    /// Symmetric decrement of `used_milli` at allocation and pool level.
    ///
    /// Clamps instead of driving `used_milli` negative; a clamped refund is
    /// flagged in the outcome and the attribution metadata and logged as an
    /// anomaly.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if pool or active allocation is missing.
    fn refund(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        draft: AttributionDraft,
    ) -> Result<RefundOutcome>;

    /// Replace the principal's allocation in this pool.
    ///
    /// Deactivates the prior active row (preserved in history), inserts a
    /// fresh allocation of `amount_milli`, and increments
    /// `pool.allocated_milli` by the full amount (not the delta).
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the pool does not exist.
    /// - `StoreError::PoolExhausted` if `amount > available`.
    fn allocate(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        allocated_by: &str,
    ) -> Result<AllocationId>;

    /// Record an overdraft: a deduction that lost a late race after the
    /// metered action already happened. No counters move; the attribution
    /// is flagged for the reconciliation workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_overdraft(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        draft: AttributionDraft,
    ) -> Result<AttributionId>;

    /// Get the active allocation for a `(pool, principal)` pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_active_allocation(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
    ) -> Result<Option<Allocation>>;

    // =========================================================================
    // Attribution records
    // =========================================================================

    /// Get an attribution record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_attribution(
        &self,
        attribution_id: AttributionId,
    ) -> Result<Option<UsageAttributionRecord>>;

    /// Look up an attribution by its caller correlation id. Resolves the
    /// "unknown outcome" case after a timed-out deduct.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_attribution_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<UsageAttributionRecord>>;

    /// List attribution records for an allocation, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_attributions(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageAttributionRecord>>;

    // =========================================================================
    // Quotas
    // =========================================================================

    /// Atomically increment the daily and monthly counters and compare
    /// against `limits`. The increment is recorded even when the decision
    /// is an over-limit rejection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn quota_check_and_increment(
        &self,
        principal_id: &PrincipalId,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision>;

    /// Zero the counter for the *current* window only (support/ops
    /// workflow).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn quota_force_reset(
        &self,
        principal_id: &PrincipalId,
        window: QuotaWindow,
        now: DateTime<Utc>,
    ) -> Result<()>;

    // =========================================================================
    // Subscriptions and memberships
    // =========================================================================

    /// Get the subscription mirror for a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, principal_id: &PrincipalId) -> Result<Option<SubscriptionRecord>>;

    /// List all subscription mirrors (reconciliation report input).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>>;

    /// Get a principal's organization memberships.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_memberships(&self, principal_id: &PrincipalId) -> Result<Vec<OrgMembership>>;

    /// Insert or update one membership row for the principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_membership(&self, membership: &OrgMembership) -> Result<()>;

    // =========================================================================
    // Webhook events
    // =========================================================================

    /// Whether a webhook event id has already been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Apply a subscription mutation and mark the event processed, in one
    /// atomic unit under the event-id lock. Unrecognized transitions are
    /// ignored (logged) but still marked processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; the event stays
    /// unmarked so the provider's retry can re-attempt.
    fn apply_subscription_event(
        &self,
        event_id: &str,
        principal_id: &PrincipalId,
        mutation: SubscriptionMutation,
    ) -> Result<EventOutcome>;

    /// Credit a pool for a paid invoice and mark the event processed, in
    /// one atomic unit. Replays are detected by event id: the pool grows by
    /// exactly one invoice regardless of delivery count.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; the event stays
    /// unmarked so the provider's retry can re-attempt.
    fn apply_invoice_paid(
        &self,
        event_id: &str,
        pool_id: &PoolId,
        amount_milli: i64,
        reason: &str,
    ) -> Result<EventOutcome>;

    /// Delete processed-event rows older than `older_than` (providers do
    /// not retry indefinitely). Returns the number evicted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn sweep_processed_events(&self, older_than: DateTime<Utc>) -> Result<usize>;
}
