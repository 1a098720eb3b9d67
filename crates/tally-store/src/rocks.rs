//! `RocksDB` storage implementation.
//!
//! Compound operations take the relevant stripe locks (principal-scoped
//! first, then pool, with webhook events ahead of pool), do their reads,
//! and commit every mutation through a single `WriteBatch`. The quota
//! counters keep an in-memory write-through map in front of the durable
//! column family so the hot path stays a hash lookup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use tally_core::{
    Allocation, AllocationId, AttributionDraft, AttributionId, AttributionKind, CreditPool,
    OrgMembership, PoolId, PoolLedgerEntry, PrincipalId, QuotaDecision, QuotaLimits, QuotaStatus,
    QuotaWindow, SubscriptionRecord, SubscriptionStatus, UsageAttributionRecord,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::KeyLocks;
use crate::schema::{all_column_families, cf};
use crate::{DeductOutcome, EventOutcome, ProcessedEvent, RefundOutcome, Store, SubscriptionMutation};

// Quota cache entries accumulate one key per principal per window; reseed
// from the durable rows rather than growing without bound.
const QUOTA_CACHE_MAX_ENTRIES: usize = 100_000;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    principal_locks: KeyLocks,
    pool_locks: KeyLocks,
    event_locks: KeyLocks,
    quota_locks: KeyLocks,
    quota_cache: Mutex<HashMap<Vec<u8>, i64>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            principal_locks: KeyLocks::new(),
            pool_locks: KeyLocks::new(),
            event_locks: KeyLocks::new(),
            quota_locks: KeyLocks::new(),
            quota_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_cf_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Stage the attribution record plus both indexes into `batch`.
    fn stage_attribution(&self, batch: &mut WriteBatch, record: &UsageAttributionRecord) -> Result<()> {
        let cf_attr = self.cf(cf::ATTRIBUTIONS)?;
        let cf_index = self.cf(cf::ATTRIBUTIONS_BY_ALLOC)?;
        let cf_corr = self.cf(cf::ATTRIBUTIONS_BY_CORRELATION)?;

        batch.put_cf(
            &cf_attr,
            keys::attribution_key(record.attribution_id),
            Self::serialize(record)?,
        );
        batch.put_cf(
            &cf_index,
            keys::attribution_index_key(&record.pool_id, &record.principal_id, record.attribution_id),
            [],
        );
        batch.put_cf(
            &cf_corr,
            keys::correlation_key(&record.correlation_id),
            record.attribution_id.to_bytes(),
        );
        Ok(())
    }

    /// Read a quota counter, preferring the in-memory front.
    fn counter_load(&self, key: &[u8]) -> Result<i64> {
        if let Ok(cache) = self.quota_cache.lock() {
            if let Some(count) = cache.get(key) {
                return Ok(*count);
            }
        }

        let cf = self.cf(cf::QUOTA_COUNTERS)?;
        let value = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(value
            .and_then(|bytes| bytes.try_into().ok().map(i64::from_le_bytes))
            .unwrap_or(0))
    }

    fn counter_cache_put(&self, key: Vec<u8>, count: i64) {
        if let Ok(mut cache) = self.quota_cache.lock() {
            if cache.len() >= QUOTA_CACHE_MAX_ENTRIES {
                cache.clear();
            }
            cache.insert(key, count);
        }
    }

    fn stage_processed_event(
        &self,
        batch: &mut WriteBatch,
        event_id: &str,
        label: &str,
    ) -> Result<()> {
        let cf_events = self.cf(cf::PROCESSED_EVENTS)?;
        let row = ProcessedEvent {
            event_id: event_id.to_string(),
            received_at: Utc::now(),
            result_hash: Some(label.to_string()),
        };
        batch.put_cf(&cf_events, keys::processed_event_key(event_id), Self::serialize(&row)?);
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Pools
    // =========================================================================

    fn get_pool(&self, pool_id: &PoolId) -> Result<Option<CreditPool>> {
        self.get_cf_value(cf::POOLS, &keys::pool_key(pool_id))
    }

    fn credit_pool(
        &self,
        pool_id: &PoolId,
        amount_milli: i64,
        reason: &str,
        actor: &str,
    ) -> Result<i64> {
        if amount_milli < 0 {
            return Err(StoreError::InvalidAmount(amount_milli));
        }

        let pool_key = keys::pool_key(pool_id);
        let _pool_guard = self.pool_locks.lock(&pool_key);

        let mut pool = self
            .get_pool(pool_id)?
            .unwrap_or_else(|| CreditPool::new(*pool_id));
        pool.total_milli += amount_milli;
        pool.updated_at = Utc::now();

        let entry = PoolLedgerEntry::new(*pool_id, amount_milli, reason, actor);

        let cf_pools = self.cf(cf::POOLS)?;
        let cf_ledger = self.cf(cf::POOL_LEDGER)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_pools, &pool_key, Self::serialize(&pool)?);
        batch.put_cf(
            &cf_ledger,
            keys::pool_ledger_key(pool_id, entry.entry_id),
            Self::serialize(&entry)?,
        );
        self.write(batch)?;

        Ok(pool.total_milli)
    }

    fn list_pool_ledger(
        &self,
        pool_id: &PoolId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PoolLedgerEntry>> {
        let cf_ledger = self.cf(cf::POOL_LEDGER)?;
        let prefix = keys::pool_ledger_prefix(pool_id);

        let iter = self.db.iterator_cf(
            &cf_ledger,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(Self::deserialize::<PoolLedgerEntry>(&value)?);
        }

        // ULID suffixes iterate oldest first; newest first for callers.
        entries.reverse();
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    // =========================================================================
    // Ledger operations
    // =========================================================================

    fn has_sufficient(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
    ) -> Result<bool> {
        Ok(self
            .get_active_allocation(pool_id, principal_id)?
            .is_some_and(|alloc| {
                !alloc.is_expired(Utc::now()) && alloc.can_deduct(amount_milli)
            }))
    }

    fn deduct(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        draft: AttributionDraft,
    ) -> Result<DeductOutcome> {
        if amount_milli < 0 {
            return Err(StoreError::InvalidAmount(amount_milli));
        }

        let alloc_key = keys::allocation_key(pool_id, principal_id);
        let _alloc_guard = self.principal_locks.lock(&alloc_key);

        // A retry carrying the same correlation id returns the recorded
        // outcome instead of deducting twice.
        if let Some(prior) = self.get_attribution_by_correlation(&draft.correlation_id)? {
            let remaining = self
                .get_active_allocation(pool_id, principal_id)?
                .map_or(0, |alloc| alloc.remaining_milli());
            return Ok(DeductOutcome {
                attribution_id: prior.attribution_id,
                remaining_milli: remaining,
                deduplicated: true,
            });
        }

        let now = Utc::now();
        let mut alloc = self
            .get_active_allocation(pool_id, principal_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "allocation",
                id: format!("{pool_id}/{principal_id}"),
            })?;

        if alloc.is_expired(now) {
            return Err(StoreError::AllocationExpired {
                pool_id: pool_id.to_string(),
                principal_id: principal_id.to_string(),
            });
        }

        if !alloc.can_deduct(amount_milli) {
            return Err(StoreError::InsufficientCredits {
                remaining_milli: alloc.remaining_milli(),
                required_milli: amount_milli,
            });
        }

        alloc.used_milli += amount_milli;

        let record = UsageAttributionRecord::from_draft(
            draft,
            *pool_id,
            *principal_id,
            AttributionKind::Usage,
            amount_milli,
        );

        let pool_key = keys::pool_key(pool_id);
        let _pool_guard = self.pool_locks.lock(&pool_key);
        let mut pool = self.get_pool(pool_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "pool",
            id: pool_id.to_string(),
        })?;
        pool.used_milli += amount_milli;
        pool.updated_at = now;

        let cf_allocs = self.cf(cf::ALLOCATIONS)?;
        let cf_pools = self.cf(cf::POOLS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_allocs, &alloc_key, Self::serialize(&alloc)?);
        batch.put_cf(&cf_pools, &pool_key, Self::serialize(&pool)?);
        self.stage_attribution(&mut batch, &record)?;
        self.write(batch)?;

        Ok(DeductOutcome {
            attribution_id: record.attribution_id,
            remaining_milli: alloc.remaining_milli(),
            deduplicated: false,
        })
    }

    fn refund(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        mut draft: AttributionDraft,
    ) -> Result<RefundOutcome> {
        if amount_milli < 0 {
            return Err(StoreError::InvalidAmount(amount_milli));
        }

        let alloc_key = keys::allocation_key(pool_id, principal_id);
        let _alloc_guard = self.principal_locks.lock(&alloc_key);

        let now = Utc::now();
        let mut alloc = self
            .get_active_allocation(pool_id, principal_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "allocation",
                id: format!("{pool_id}/{principal_id}"),
            })?;

        let applied_milli = amount_milli.min(alloc.used_milli);
        let clamped = applied_milli < amount_milli;
        if clamped {
            tracing::warn!(
                pool_id = %pool_id,
                principal_id = %principal_id,
                requested_milli = amount_milli,
                applied_milli,
                "Refund clamped to avoid negative usage"
            );
            draft.metadata = serde_json::json!({
                "anomaly": "refund_clamped",
                "requested_milli": amount_milli,
                "applied_milli": applied_milli,
                "context": draft.metadata,
            });
        }

        alloc.used_milli -= applied_milli;

        let record = UsageAttributionRecord::from_draft(
            draft,
            *pool_id,
            *principal_id,
            AttributionKind::Refund,
            applied_milli,
        );

        let pool_key = keys::pool_key(pool_id);
        let _pool_guard = self.pool_locks.lock(&pool_key);
        let mut pool = self.get_pool(pool_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "pool",
            id: pool_id.to_string(),
        })?;
        pool.used_milli = (pool.used_milli - applied_milli).max(0);
        pool.updated_at = now;

        let cf_allocs = self.cf(cf::ALLOCATIONS)?;
        let cf_pools = self.cf(cf::POOLS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_allocs, &alloc_key, Self::serialize(&alloc)?);
        batch.put_cf(&cf_pools, &pool_key, Self::serialize(&pool)?);
        self.stage_attribution(&mut batch, &record)?;
        self.write(batch)?;

        Ok(RefundOutcome {
            attribution_id: record.attribution_id,
            refunded_milli: applied_milli,
            clamped,
        })
    }

    fn allocate(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        allocated_by: &str,
    ) -> Result<AllocationId> {
        if amount_milli < 0 {
            return Err(StoreError::InvalidAmount(amount_milli));
        }

        let alloc_key = keys::allocation_key(pool_id, principal_id);
        let _alloc_guard = self.principal_locks.lock(&alloc_key);

        let pool_key = keys::pool_key(pool_id);
        let _pool_guard = self.pool_locks.lock(&pool_key);

        let now = Utc::now();
        let mut pool = self.get_pool(pool_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "pool",
            id: pool_id.to_string(),
        })?;

        if !pool.can_allocate(amount_milli) {
            return Err(StoreError::PoolExhausted {
                available_milli: pool.available_milli(),
                requested_milli: amount_milli,
            });
        }

        let cf_allocs = self.cf(cf::ALLOCATIONS)?;
        let cf_history = self.cf(cf::ALLOCATIONS_HISTORY)?;
        let cf_pools = self.cf(cf::POOLS)?;
        let mut batch = WriteBatch::default();

        // Reallocation deactivates the prior row into history rather than
        // mutating it in place; the audit trail keeps every budget ever set.
        if let Some(mut old) = self.get_active_allocation(pool_id, principal_id)? {
            old.active = false;
            old.deactivated_at = Some(now);
            batch.put_cf(
                &cf_history,
                keys::allocation_history_key(pool_id, principal_id, old.allocation_id),
                Self::serialize(&old)?,
            );
        }

        let alloc = Allocation::new(*pool_id, *principal_id, amount_milli, allocated_by);
        // Replacement semantics: the pool's allocated counter grows by the
        // full new amount, not the delta.
        pool.allocated_milli += amount_milli;
        pool.updated_at = now;

        batch.put_cf(&cf_allocs, &alloc_key, Self::serialize(&alloc)?);
        batch.put_cf(&cf_pools, &pool_key, Self::serialize(&pool)?);
        self.write(batch)?;

        tracing::info!(
            pool_id = %pool_id,
            principal_id = %principal_id,
            amount_milli,
            allocated_by,
            allocation_id = %alloc.allocation_id,
            "Allocation replaced"
        );

        Ok(alloc.allocation_id)
    }

    fn record_overdraft(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        amount_milli: i64,
        draft: AttributionDraft,
    ) -> Result<AttributionId> {
        let alloc_key = keys::allocation_key(pool_id, principal_id);
        let _alloc_guard = self.principal_locks.lock(&alloc_key);

        let record = UsageAttributionRecord::from_draft(
            draft,
            *pool_id,
            *principal_id,
            AttributionKind::Overdraft,
            amount_milli,
        );

        tracing::warn!(
            pool_id = %pool_id,
            principal_id = %principal_id,
            amount_milli,
            correlation_id = %record.correlation_id,
            attribution_id = %record.attribution_id,
            "Overdraft recorded for reconciliation"
        );

        let mut batch = WriteBatch::default();
        self.stage_attribution(&mut batch, &record)?;
        self.write(batch)?;

        Ok(record.attribution_id)
    }

    fn get_active_allocation(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
    ) -> Result<Option<Allocation>> {
        self.get_cf_value(cf::ALLOCATIONS, &keys::allocation_key(pool_id, principal_id))
    }

    // =========================================================================
    // Attribution records
    // =========================================================================

    fn get_attribution(
        &self,
        attribution_id: AttributionId,
    ) -> Result<Option<UsageAttributionRecord>> {
        self.get_cf_value(cf::ATTRIBUTIONS, &keys::attribution_key(attribution_id))
    }

    fn get_attribution_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<UsageAttributionRecord>> {
        let cf_corr = self.cf(cf::ATTRIBUTIONS_BY_CORRELATION)?;
        let id_bytes = self
            .db
            .get_cf(&cf_corr, keys::correlation_key(correlation_id))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let Some(id_bytes) = id_bytes else {
            return Ok(None);
        };
        let bytes: [u8; 16] = id_bytes
            .try_into()
            .map_err(|_| StoreError::Serialization("malformed correlation index".into()))?;
        let attribution_id = AttributionId::from_bytes(bytes)
            .map_err(|_| StoreError::Serialization("malformed correlation index".into()))?;

        self.get_attribution(attribution_id)
    }

    fn list_attributions(
        &self,
        pool_id: &PoolId,
        principal_id: &PrincipalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageAttributionRecord>> {
        let cf_index = self.cf(cf::ATTRIBUTIONS_BY_ALLOC)?;
        let prefix = keys::attribution_index_prefix(pool_id, principal_id);

        let iter = self.db.iterator_cf(
            &cf_index,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(keys::extract_attribution_id_from_index_key(&key));
        }

        // ULIDs iterate oldest first; newest first for callers.
        ids.reverse();

        let mut records = Vec::new();
        for id in ids.into_iter().skip(offset).take(limit) {
            if let Some(record) = self.get_attribution(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // =========================================================================
    // Quotas
    // =========================================================================

    fn quota_check_and_increment(
        &self,
        principal_id: &PrincipalId,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision> {
        let _guard = self.quota_locks.lock(principal_id.as_bytes());

        let daily_key = keys::quota_counter_key(principal_id, &QuotaWindow::Daily.key(now));
        let monthly_key = keys::quota_counter_key(principal_id, &QuotaWindow::Monthly.key(now));

        let daily_count = self.counter_load(&daily_key)? + 1;
        let monthly_count = self.counter_load(&monthly_key)? + 1;

        let cf_counters = self.cf(cf::QUOTA_COUNTERS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_counters, &daily_key, daily_count.to_le_bytes());
        batch.put_cf(&cf_counters, &monthly_key, monthly_count.to_le_bytes());
        self.write(batch)?;

        self.counter_cache_put(daily_key, daily_count);
        self.counter_cache_put(monthly_key, monthly_count);

        Ok(QuotaDecision {
            daily: QuotaStatus {
                window: QuotaWindow::Daily,
                limit: limits.daily,
                count: daily_count,
                resets_at: QuotaWindow::Daily.resets_at(now),
            },
            monthly: QuotaStatus {
                window: QuotaWindow::Monthly,
                limit: limits.monthly,
                count: monthly_count,
                resets_at: QuotaWindow::Monthly.resets_at(now),
            },
        })
    }

    fn quota_force_reset(
        &self,
        principal_id: &PrincipalId,
        window: QuotaWindow,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.quota_locks.lock(principal_id.as_bytes());

        let key = keys::quota_counter_key(principal_id, &window.key(now));
        let cf_counters = self.cf(cf::QUOTA_COUNTERS)?;
        self.db
            .put_cf(&cf_counters, &key, 0i64.to_le_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.counter_cache_put(key, 0);

        Ok(())
    }

    // =========================================================================
    // Subscriptions and memberships
    // =========================================================================

    fn get_subscription(&self, principal_id: &PrincipalId) -> Result<Option<SubscriptionRecord>> {
        self.get_cf_value(cf::SUBSCRIPTIONS, &keys::subscription_key(principal_id))
    }

    fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf_subs, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            records.push(Self::deserialize::<SubscriptionRecord>(&value)?);
        }
        Ok(records)
    }

    fn get_memberships(&self, principal_id: &PrincipalId) -> Result<Vec<OrgMembership>> {
        Ok(self
            .get_cf_value::<Vec<OrgMembership>>(cf::MEMBERSHIPS, &keys::membership_key(principal_id))?
            .unwrap_or_default())
    }

    fn put_membership(&self, membership: &OrgMembership) -> Result<()> {
        let key = keys::membership_key(&membership.principal_id);
        let _guard = self.principal_locks.lock(&key);

        let mut memberships = self.get_memberships(&membership.principal_id)?;
        if let Some(existing) = memberships
            .iter_mut()
            .find(|m| m.pool_id == membership.pool_id)
        {
            *existing = membership.clone();
        } else {
            memberships.push(membership.clone());
        }

        let cf_members = self.cf(cf::MEMBERSHIPS)?;
        self.db
            .put_cf(&cf_members, &key, Self::serialize(&memberships)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Webhook events
    // =========================================================================

    fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        let cf_events = self.cf(cf::PROCESSED_EVENTS)?;
        let exists = self
            .db
            .get_cf(&cf_events, keys::processed_event_key(event_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    fn apply_subscription_event(
        &self,
        event_id: &str,
        principal_id: &PrincipalId,
        mutation: SubscriptionMutation,
    ) -> Result<EventOutcome> {
        let _event_guard = self.event_locks.lock(event_id.as_bytes());

        if self.is_event_processed(event_id)? {
            return Ok(EventOutcome::Duplicate);
        }

        let now = Utc::now();
        let existing = self.get_subscription(principal_id)?;

        let (outcome, updated, label) = match mutation {
            SubscriptionMutation::Upsert {
                plan_code,
                status,
                external_subscription_id,
                current_period_end,
            } => match existing {
                Some(current) if !current.status.can_transition(status) => {
                    tracing::warn!(
                        event_id,
                        principal_id = %principal_id,
                        from = %current.status,
                        to = %status,
                        "Ignoring unrecognized subscription transition"
                    );
                    (EventOutcome::Ignored, None, "ignored_transition")
                }
                _ => {
                    let record = SubscriptionRecord {
                        principal_id: *principal_id,
                        plan_code,
                        status,
                        external_subscription_id,
                        current_period_end,
                        updated_at: now,
                    };
                    (EventOutcome::Applied, Some(record), "upserted")
                }
            },
            SubscriptionMutation::MarkCanceled => match existing {
                None => {
                    tracing::warn!(
                        event_id,
                        principal_id = %principal_id,
                        "Cancel event for unknown subscription; ignoring"
                    );
                    (EventOutcome::Ignored, None, "ignored_unknown")
                }
                Some(mut current) => {
                    current.status = SubscriptionStatus::Canceled;
                    current.updated_at = now;
                    (EventOutcome::Applied, Some(current), "canceled")
                }
            },
            SubscriptionMutation::MarkPastDue => match existing {
                None => {
                    tracing::warn!(
                        event_id,
                        principal_id = %principal_id,
                        "Payment-failed event for unknown subscription; ignoring"
                    );
                    (EventOutcome::Ignored, None, "ignored_unknown")
                }
                Some(mut current) => {
                    if current.status.can_transition(SubscriptionStatus::PastDue) {
                        current.status = SubscriptionStatus::PastDue;
                        current.updated_at = now;
                        (EventOutcome::Applied, Some(current), "past_due")
                    } else {
                        tracing::warn!(
                            event_id,
                            principal_id = %principal_id,
                            from = %current.status,
                            "Ignoring past_due transition from current state"
                        );
                        (EventOutcome::Ignored, None, "ignored_transition")
                    }
                }
            },
        };

        let mut batch = WriteBatch::default();
        if let Some(record) = updated {
            let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
            batch.put_cf(
                &cf_subs,
                keys::subscription_key(principal_id),
                Self::serialize(&record)?,
            );
        }
        self.stage_processed_event(&mut batch, event_id, label)?;
        self.write(batch)?;

        Ok(outcome)
    }

    fn apply_invoice_paid(
        &self,
        event_id: &str,
        pool_id: &PoolId,
        amount_milli: i64,
        reason: &str,
    ) -> Result<EventOutcome> {
        if amount_milli < 0 {
            return Err(StoreError::InvalidAmount(amount_milli));
        }

        let _event_guard = self.event_locks.lock(event_id.as_bytes());

        if self.is_event_processed(event_id)? {
            return Ok(EventOutcome::Duplicate);
        }

        let pool_key = keys::pool_key(pool_id);
        let _pool_guard = self.pool_locks.lock(&pool_key);

        // First paid invoice creates the pool.
        let mut pool = self
            .get_pool(pool_id)?
            .unwrap_or_else(|| CreditPool::new(*pool_id));
        pool.total_milli += amount_milli;
        pool.updated_at = Utc::now();

        let entry = PoolLedgerEntry::new(*pool_id, amount_milli, reason, "webhook-processor");

        let cf_pools = self.cf(cf::POOLS)?;
        let cf_ledger = self.cf(cf::POOL_LEDGER)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_pools, &pool_key, Self::serialize(&pool)?);
        batch.put_cf(
            &cf_ledger,
            keys::pool_ledger_key(pool_id, entry.entry_id),
            Self::serialize(&entry)?,
        );
        self.stage_processed_event(&mut batch, event_id, "credited")?;
        self.write(batch)?;

        tracing::info!(
            event_id,
            pool_id = %pool_id,
            amount_milli,
            new_total_milli = pool.total_milli,
            "Pool credited from paid invoice"
        );

        Ok(EventOutcome::Applied)
    }

    fn sweep_processed_events(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let cf_events = self.cf(cf::PROCESSED_EVENTS)?;

        let mut expired = Vec::new();
        for item in self.db.iterator_cf(&cf_events, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let row: ProcessedEvent = Self::deserialize(&value)?;
            if row.received_at < older_than {
                expired.push(key.to_vec());
            }
        }

        let mut batch = WriteBatch::default();
        for key in &expired {
            batch.delete_cf(&cf_events, key);
        }
        self.write(batch)?;

        Ok(expired.len())
    }
}
