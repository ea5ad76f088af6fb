//! Error taxonomy for the order engine.
//!
//! Checkout failures are returned to the POS caller for user-visible
//! messaging. Auto-advance failures are only ever logged: the background
//! loop retries on the next tick and never surfaces them to a cashier.

use thiserror::Error;

/// Failure talking to the admin dashboard order API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// Credentials or base URL missing.
    #[error("Terminal not configured: {0}")]
    NotConfigured(String),

    /// Transport-level failure (connect, timeout, TLS).
    #[error("{0}")]
    Network(String),

    /// Non-2xx response.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// The body could not be parsed or lacked required fields.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Failure of a payment submission, surfaced to the POS caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CheckoutError {
    /// Caller input was malformed. No network call was made.
    #[error("{0}")]
    Validation(String),

    /// The order was not persisted, or the backend returned no id.
    #[error("Order was not created: {0}")]
    Creation(String),

    /// Payment capture failed after the order was created. A compensating
    /// cancellation has already been attempted for `order_id`.
    #[error("Payment could not be completed: {message}")]
    Capture { order_id: String, message: String },
}

impl CheckoutError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Failures inside the autonomous auto-advance loop. Logged, never returned
/// to a human.
#[derive(Debug, Error)]
pub enum AutoAdvanceError {
    /// No signed-in operator holds the status-update permission.
    #[error("Operator may not update order status")]
    Unauthorized,

    /// Queue snapshot unavailable; this tick's pass is skipped.
    #[error("Order queue fetch failed: {0}")]
    Fetch(#[source] ApiError),

    /// A status-transition request failed; its lock is released for retry.
    #[error("Failed to advance order {order_id} to {target}: {source}")]
    Transition {
        order_id: String,
        target: String,
        #[source]
        source: ApiError,
    },
}

/// Engine configuration could not be resolved.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}
