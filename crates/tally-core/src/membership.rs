//! Organization membership used for billing-principal resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PoolId, PrincipalId};

/// A principal's membership in an organization pool.
///
/// Written by the administrative membership endpoint; read by the billing
/// orchestrator when resolving which pool a request draws from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMembership {
    /// The member principal.
    pub principal_id: PrincipalId,

    /// The organization's credit pool.
    pub pool_id: PoolId,

    /// Whether this is the member's default organization. When a principal
    /// belongs to several organizations the default-marked one wins.
    pub is_default: bool,

    /// When the principal joined. Tie-breaker when no default is marked:
    /// earliest join wins, so resolution stays deterministic.
    pub joined_at: DateTime<Utc>,
}

/// Resolve the billing pool for a principal.
///
/// Order: the default-marked membership (earliest joined if several are
/// marked), else the earliest-joined membership, else the principal's own
/// individual pool. Deterministic for any membership set.
#[must_use]
pub fn resolve_billing_pool(principal: PrincipalId, memberships: &[OrgMembership]) -> PoolId {
    let mut candidates: Vec<&OrgMembership> = memberships.iter().collect();
    candidates.sort_by_key(|m| (std::cmp::Reverse(m.is_default), m.joined_at));

    candidates
        .first()
        .map_or_else(|| PoolId::for_principal(principal), |m| m.pool_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn membership(pool: PoolId, is_default: bool, day: u32) -> OrgMembership {
        OrgMembership {
            principal_id: PrincipalId::generate(),
            pool_id: pool,
            is_default,
            joined_at: Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn no_memberships_falls_back_to_individual_pool() {
        let principal = PrincipalId::generate();
        assert_eq!(
            resolve_billing_pool(principal, &[]),
            PoolId::for_principal(principal)
        );
    }

    #[test]
    fn default_marked_wins_over_earlier_join() {
        let principal = PrincipalId::generate();
        let early = PoolId::generate();
        let marked = PoolId::generate();
        let memberships = vec![
            membership(early, false, 1),
            membership(marked, true, 20),
        ];
        assert_eq!(resolve_billing_pool(principal, &memberships), marked);
    }

    #[test]
    fn earliest_join_breaks_ties() {
        let principal = PrincipalId::generate();
        let first = PoolId::generate();
        let second = PoolId::generate();
        let memberships = vec![
            membership(second, false, 10),
            membership(first, false, 2),
        ];
        assert_eq!(resolve_billing_pool(principal, &memberships), first);
    }

    #[test]
    fn resolution_is_order_independent() {
        let principal = PrincipalId::generate();
        let a = membership(PoolId::generate(), false, 3);
        let b = membership(PoolId::generate(), true, 7);

        let forward = resolve_billing_pool(principal, &[a.clone(), b.clone()]);
        let reversed = resolve_billing_pool(principal, &[b, a]);
        assert_eq!(forward, reversed);
    }
}
