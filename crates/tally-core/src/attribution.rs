//! Usage attribution records and pool-level ledger entries.
//!
//! Attribution records are the append-only audit trail of what consumed how
//! many credits. They are immutable once written; the sum of usage charges
//! minus refunds for an allocation must always equal that allocation's
//! `used_milli`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AttributionId, PoolId, PrincipalId};

/// An immutable record attributing a credit movement to a principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageAttributionRecord {
    /// Time-ordered record id.
    pub attribution_id: AttributionId,

    /// The principal whose allocation was affected.
    pub principal_id: PrincipalId,

    /// The pool the allocation draws from.
    pub pool_id: PoolId,

    /// What kind of movement this records.
    pub kind: AttributionKind,

    /// Resource category consumed (e.g. `llm_output_tokens`).
    pub resource_type: String,

    /// Concrete resource name (e.g. a model identifier).
    pub resource_name: String,

    /// Credits charged in milli-credits. Always non-negative; `kind`
    /// carries the direction.
    pub credits_charged_milli: i64,

    /// Caller-supplied idempotency key for the business operation.
    /// Distinct from webhook event ids.
    pub correlation_id: String,

    /// Additional context (`request_id`, routing mode, anomaly flags, ...).
    pub metadata: serde_json::Value,

    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl UsageAttributionRecord {
    /// Build an attribution from a draft plus ledger identity.
    #[must_use]
    pub fn from_draft(
        draft: AttributionDraft,
        pool_id: PoolId,
        principal_id: PrincipalId,
        kind: AttributionKind,
        credits_charged_milli: i64,
    ) -> Self {
        Self {
            attribution_id: AttributionId::generate(),
            principal_id,
            pool_id,
            kind,
            resource_type: draft.resource_type,
            resource_name: draft.resource_name,
            credits_charged_milli,
            correlation_id: draft.correlation_id,
            metadata: draft.metadata,
            created_at: Utc::now(),
        }
    }

    /// Signed contribution of this record to an allocation's `used_milli`.
    #[must_use]
    pub const fn signed_milli(&self) -> i64 {
        match self.kind {
            AttributionKind::Usage => self.credits_charged_milli,
            AttributionKind::Refund => -self.credits_charged_milli,
            // Overdrafts never committed a deduction; they are anomalies
            // awaiting reconciliation, not part of the usage sum.
            AttributionKind::Overdraft => 0,
        }
    }
}

/// What a [`UsageAttributionRecord`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionKind {
    /// A committed usage deduction.
    Usage,

    /// A committed refund of prior usage.
    Refund,

    /// A deduction that could not be committed after the metered action
    /// already happened. Flagged for the reconciliation workflow.
    Overdraft,
}

/// Caller-supplied portion of an attribution, before the ledger fills in
/// identity, kind, and the charged amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionDraft {
    /// Resource category consumed.
    pub resource_type: String,

    /// Concrete resource name.
    pub resource_name: String,

    /// Caller idempotency key for this business operation.
    pub correlation_id: String,

    /// Additional context.
    pub metadata: serde_json::Value,
}

impl AttributionDraft {
    /// Create a draft with empty metadata.
    #[must_use]
    pub fn new(
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            correlation_id: correlation_id.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata to the draft.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only record of a pool-level balance mutation (credit or refund).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolLedgerEntry {
    /// Time-ordered entry id.
    pub entry_id: AttributionId,

    /// The pool affected.
    pub pool_id: PoolId,

    /// Signed change to `total_milli`, in milli-credits.
    pub delta_milli: i64,

    /// Why the balance changed (invoice id, purchase reference, ...).
    pub reason: String,

    /// Actor responsible (webhook processor, admin identity).
    pub actor: String,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl PoolLedgerEntry {
    /// Create a new pool ledger entry.
    #[must_use]
    pub fn new(
        pool_id: PoolId,
        delta_milli: i64,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: AttributionId::generate(),
            pool_id,
            delta_milli,
            reason: reason.into(),
            actor: actor.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> AttributionDraft {
        AttributionDraft::new("llm_output_tokens", "sonnet-large", "corr-1")
            .with_metadata(serde_json::json!({"request_id": "req-9"}))
    }

    #[test]
    fn usage_record_contributes_positive() {
        let rec = UsageAttributionRecord::from_draft(
            draft(),
            PoolId::generate(),
            PrincipalId::generate(),
            AttributionKind::Usage,
            50,
        );
        assert_eq!(rec.signed_milli(), 50);
        assert_eq!(rec.correlation_id, "corr-1");
    }

    #[test]
    fn refund_record_contributes_negative() {
        let rec = UsageAttributionRecord::from_draft(
            draft(),
            PoolId::generate(),
            PrincipalId::generate(),
            AttributionKind::Refund,
            30,
        );
        assert_eq!(rec.signed_milli(), -30);
    }

    #[test]
    fn overdraft_record_contributes_nothing() {
        let rec = UsageAttributionRecord::from_draft(
            draft(),
            PoolId::generate(),
            PrincipalId::generate(),
            AttributionKind::Overdraft,
            999,
        );
        assert_eq!(rec.signed_milli(), 0);
    }

    #[test]
    fn kind_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&AttributionKind::Overdraft).unwrap(),
            "\"overdraft\""
        );
    }
}
