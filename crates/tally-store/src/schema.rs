//! Column family layout for the tally ledger database.

/// Column family names.
pub mod cf {
    /// Credit pools, keyed by `pool_id`.
    pub const POOLS: &str = "pools";

    /// Active allocations, keyed by `pool_id || principal_id`.
    /// At most one row per pair; replaced rows move to history.
    pub const ALLOCATIONS: &str = "allocations";

    /// Deactivated allocations, keyed by
    /// `pool_id || principal_id || allocation_id` (audit history).
    pub const ALLOCATIONS_HISTORY: &str = "allocations_history";

    /// Attribution records, keyed by `attribution_id` (ULID).
    pub const ATTRIBUTIONS: &str = "attributions";

    /// Index: attributions per allocation, keyed by
    /// `pool_id || principal_id || attribution_id`. Value is empty.
    pub const ATTRIBUTIONS_BY_ALLOC: &str = "attributions_by_alloc";

    /// Index: correlation id -> attribution id (16 bytes). First writer
    /// wins; this is the deduct-retry dedup primitive.
    pub const ATTRIBUTIONS_BY_CORRELATION: &str = "attributions_by_correlation";

    /// Pool-level balance mutations, keyed by `pool_id || entry_id`.
    pub const POOL_LEDGER: &str = "pool_ledger";

    /// Subscription mirrors, keyed by `principal_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Organization memberships, keyed by `principal_id`. Value is the
    /// full membership list for that principal.
    pub const MEMBERSHIPS: &str = "memberships";

    /// Processed webhook events, keyed by `event_id`. Presence = applied.
    pub const PROCESSED_EVENTS: &str = "processed_events";

    /// Quota counters, keyed by `principal_id || window_key`.
    /// Value is an i64 little-endian count.
    pub const QUOTA_COUNTERS: &str = "quota_counters";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::POOLS,
        cf::ALLOCATIONS,
        cf::ALLOCATIONS_HISTORY,
        cf::ATTRIBUTIONS,
        cf::ATTRIBUTIONS_BY_ALLOC,
        cf::ATTRIBUTIONS_BY_CORRELATION,
        cf::POOL_LEDGER,
        cf::SUBSCRIPTIONS,
        cf::MEMBERSHIPS,
        cf::PROCESSED_EVENTS,
        cf::QUOTA_COUNTERS,
    ]
}
