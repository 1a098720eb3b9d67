//! Tally Client SDK.
//!
//! This crate provides a client library for services that meter usage
//! through the tally credit ledger.
//!
//! # Example
//!
//! ```no_run
//! use tally_client::{TallyClient, AuthorizeRequest, CommitRequest, RoutingMode};
//!
//! # async fn example() -> Result<(), tally_client::ClientError> {
//! let client = TallyClient::new("http://tally.billing.svc:8080", "gateway-api-key");
//!
//! // Before the action: quota + credit pre-check.
//! let authorized = client.authorize(AuthorizeRequest {
//!     principal_id: "user-uuid".to_string(),
//!     resource_type: "llm_output_tokens".to_string(),
//!     quantity: 10_000,
//!     routing_mode: RoutingMode::Standard,
//! }).await?;
//!
//! // ... perform the inference call ...
//!
//! // After the action: commit the actual consumption.
//! let committed = client.commit(CommitRequest {
//!     principal_id: "user-uuid".to_string(),
//!     resource_type: "llm_output_tokens".to_string(),
//!     resource_name: "sonnet-large".to_string(),
//!     quantity: 8_412,
//!     routing_mode: RoutingMode::Standard,
//!     correlation_id: "req-129381".to_string(),
//!     metadata: serde_json::Value::Null,
//! }).await?;
//!
//! println!("remaining: {} milli-credits", committed.remaining_milli);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, TallyClient};
pub use error::ClientError;
pub use types::*;
