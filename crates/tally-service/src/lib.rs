//! Tally HTTP API service.
//!
//! This crate provides the HTTP API for the tally credit ledger:
//!
//! - Metered-action gateway (authorize / commit)
//! - Pool, allocation, and attribution reads
//! - Administrative operations (allocate, refund, credit, quota reset)
//! - Billing-provider webhooks with idempotent reconciliation
//!
//! # Authentication
//!
//! Two API-key classes: the gateway key for metering callers and the admin
//! key for operator actions. Webhooks authenticate via payload signature.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers must be async for routing

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod provider;
pub mod routes;
pub mod state;
pub mod webhook;

pub use config::{QuotaConfig, ServiceConfig};
pub use error::ApiError;
pub use provider::{ProviderClient, ProviderError, ProviderSubscription};
pub use routes::create_router;
pub use state::AppState;
