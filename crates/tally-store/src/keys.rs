//! Key encoding for the tally ledger column families.
//!
//! UUID/ULID ids encode as their 16 raw bytes; composite keys concatenate.
//! ULID suffixes keep per-prefix iteration in time order.

use tally_core::{AttributionId, PoolId, PrincipalId};

/// Pool key: `pool_id` (16 bytes).
#[must_use]
pub fn pool_key(pool_id: &PoolId) -> Vec<u8> {
    pool_id.as_bytes().to_vec()
}

/// Active allocation key: `pool_id || principal_id` (32 bytes).
#[must_use]
pub fn allocation_key(pool_id: &PoolId, principal_id: &PrincipalId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(pool_id.as_bytes());
    key.extend_from_slice(principal_id.as_bytes());
    key
}

/// Allocation history key: `pool_id || principal_id || allocation_id`.
#[must_use]
pub fn allocation_history_key(
    pool_id: &PoolId,
    principal_id: &PrincipalId,
    allocation_id: tally_core::AllocationId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    key.extend_from_slice(pool_id.as_bytes());
    key.extend_from_slice(principal_id.as_bytes());
    key.extend_from_slice(&allocation_id.to_bytes());
    key
}

/// Attribution key: `attribution_id` (16 bytes).
#[must_use]
pub fn attribution_key(attribution_id: AttributionId) -> Vec<u8> {
    attribution_id.to_bytes().to_vec()
}

/// Attribution index key: `pool_id || principal_id || attribution_id`.
#[must_use]
pub fn attribution_index_key(
    pool_id: &PoolId,
    principal_id: &PrincipalId,
    attribution_id: AttributionId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    key.extend_from_slice(pool_id.as_bytes());
    key.extend_from_slice(principal_id.as_bytes());
    key.extend_from_slice(&attribution_id.to_bytes());
    key
}

/// Prefix for iterating one allocation's attributions.
#[must_use]
pub fn attribution_index_prefix(pool_id: &PoolId, principal_id: &PrincipalId) -> Vec<u8> {
    allocation_key(pool_id, principal_id)
}

/// Extract the attribution id from an attribution index key.
///
/// # Panics
///
/// Panics if the key is not at least 48 bytes.
#[must_use]
pub fn extract_attribution_id_from_index_key(key: &[u8]) -> AttributionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[32..48]);
    AttributionId::from_bytes(bytes).expect("valid ULID bytes")
}

/// Correlation index key: raw correlation id bytes.
#[must_use]
pub fn correlation_key(correlation_id: &str) -> Vec<u8> {
    correlation_id.as_bytes().to_vec()
}

/// Pool ledger key: `pool_id || entry_id`.
#[must_use]
pub fn pool_ledger_key(pool_id: &PoolId, entry_id: AttributionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(pool_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Prefix for iterating one pool's ledger entries.
#[must_use]
pub fn pool_ledger_prefix(pool_id: &PoolId) -> Vec<u8> {
    pool_id.as_bytes().to_vec()
}

/// Subscription key: `principal_id` (16 bytes).
#[must_use]
pub fn subscription_key(principal_id: &PrincipalId) -> Vec<u8> {
    principal_id.as_bytes().to_vec()
}

/// Membership key: `principal_id` (16 bytes).
#[must_use]
pub fn membership_key(principal_id: &PrincipalId) -> Vec<u8> {
    principal_id.as_bytes().to_vec()
}

/// Processed event key: raw event id bytes.
#[must_use]
pub fn processed_event_key(event_id: &str) -> Vec<u8> {
    event_id.as_bytes().to_vec()
}

/// Quota counter key: `principal_id || window_key`.
#[must_use]
pub fn quota_counter_key(principal_id: &PrincipalId, window_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + window_key.len());
    key.extend_from_slice(principal_id.as_bytes());
    key.extend_from_slice(window_key.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_key_format() {
        let pool = PoolId::generate();
        let principal = PrincipalId::generate();
        let key = allocation_key(&pool, &principal);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], pool.as_bytes());
        assert_eq!(&key[16..], principal.as_bytes());
    }

    #[test]
    fn attribution_index_roundtrip() {
        let pool = PoolId::generate();
        let principal = PrincipalId::generate();
        let id = AttributionId::generate();
        let key = attribution_index_key(&pool, &principal, id);

        assert_eq!(key.len(), 48);
        assert!(key.starts_with(&attribution_index_prefix(&pool, &principal)));
        assert_eq!(extract_attribution_id_from_index_key(&key), id);
    }

    #[test]
    fn quota_counter_key_embeds_window() {
        let principal = PrincipalId::generate();
        let key = quota_counter_key(&principal, "2026-08-06");
        assert_eq!(key.len(), 16 + 10);
        assert!(key.ends_with(b"2026-08-06"));
    }
}
