//! Client error types.

/// Errors returned by the tally client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The ledger rejected the request for quota reasons (HTTP 429).
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        /// Server-provided reason.
        message: String,
        /// Unix timestamp of the window rollover, when provided.
        resets_at_unix: Option<i64>,
    },

    /// The ledger rejected the request for credit reasons (HTTP 402).
    #[error("insufficient credits: {message}")]
    InsufficientCredits {
        /// Server-provided reason.
        message: String,
        /// Remaining milli-credits, when provided.
        remaining_milli: Option<i64>,
    },

    /// Any other API error response.
    #[error("API error: {status} {code} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}
