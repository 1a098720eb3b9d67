//! Core types and logic for the tally credit ledger.
//!
//! This crate provides the domain model shared across the tally platform:
//!
//! - **Identifiers**: `PrincipalId`, `PoolId`, `AllocationId`, `AttributionId`
//! - **Ledger**: `CreditPool`, `Allocation`
//! - **Audit**: `UsageAttributionRecord`, `PoolLedgerEntry`
//! - **Subscriptions**: `SubscriptionRecord`, `SubscriptionStatus`
//! - **Pricing**: `PricingConfig`, `RoutingMode`
//! - **Quotas**: `QuotaWindow`, `QuotaLimits`, `QuotaDecision`
//!
//! # Credit unit
//!
//! **All amounts are `i64` milli-credits: 1 credit = 1000 milli-credits.**
//!
//! Integer minor units keep ledger invariants exactly checkable; conversion
//! to display currency happens outside this crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod attribution;
pub mod ids;
pub mod membership;
pub mod pool;
pub mod pricing;
pub mod quota;
pub mod subscription;

pub use attribution::{AttributionDraft, AttributionKind, PoolLedgerEntry, UsageAttributionRecord};
pub use ids::{AllocationId, AttributionId, IdError, PoolId, PrincipalId};
pub use membership::{resolve_billing_pool, OrgMembership};
pub use pool::{format_credits, Allocation, CreditPool};
pub use pricing::{PricingConfig, PricingError, ResourceRate, RoutingMode};
pub use quota::{QuotaDecision, QuotaLimits, QuotaStatus, QuotaWindow};
pub use subscription::{SubscriptionRecord, SubscriptionStatus};
