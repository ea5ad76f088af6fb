//! The Small POS - order lifecycle and auto-advance engine.
//!
//! Headless core shared by the cashier terminal and kitchen display:
//! canonical order statuses, order-number issuing, the create/capture/
//! compensate checkout protocol, and the timer-driven loop that moves
//! prepared orders along (`in_prep -> staged -> completed`) without a
//! human pressing a button. All order state lives in the admin dashboard;
//! the engine only keeps short-lived in-flight markers in memory.

pub mod api;
pub mod auth;
pub mod auto_advance;
pub mod cart;
pub mod config;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod order;
pub mod payments;
pub mod poller;
pub mod status;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use api::{HttpOrderApi, OrderApi, StatusTransition};
pub use auth::{Actor, AuthState};
pub use auto_advance::{AutoAdvanceScheduler, PassOutcome, PassReport};
pub use cart::{Cart, Discount, DiscountKind};
pub use config::EngineConfig;
pub use engine::OrderEngine;
pub use error::{ApiError, AutoAdvanceError, CheckoutError, ConfigError};
pub use identifier::{OrderIdentifier, OrderIdentifierIssuer};
pub use logging::init_logging;
pub use order::{Order, QueueSnapshot};
pub use payments::{OrderInfo, PaymentMethod, PaymentTransactionCoordinator, TenderDetails};
pub use poller::QueuePoller;
pub use status::{canonicalize, CanonicalStatus};

// ---------------------------------------------------------------------------
// JSON field helpers
// ---------------------------------------------------------------------------

/// First non-blank string under any of `keys`, trimmed.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First number under any of `keys`; numeric strings are accepted.
pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Number(n)) => return n.as_f64(),
            Some(serde_json::Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    if n.is_finite() {
                        return Some(n);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Lenient boolean: JSON bools, `0`/`1`, and the usual string spellings.
pub(crate) fn value_bool(v: &serde_json::Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        let value = match v.get(*key) {
            Some(value) => value,
            None => continue,
        };

        if let Some(flag) = value.as_bool() {
            return Some(flag);
        }
        if let Some(flag) = value.as_i64() {
            return Some(flag == 1);
        }
        if let Some(flag) = value.as_str() {
            let normalized = flag.trim().to_ascii_lowercase();
            if matches!(normalized.as_str(), "true" | "1" | "yes" | "on") {
                return Some(true);
            }
            if matches!(normalized.as_str(), "false" | "0" | "no" | "off") {
                return Some(false);
            }
        }
    }
    None
}
