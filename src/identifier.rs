//! Order number issuance.
//!
//! The admin dashboard owns the authoritative order number sequence. When
//! it cannot be reached (or answers without a number) the issuer falls back
//! to a locally generated `<PREFIX>-<6 digits>` token so the cashier is
//! never blocked.
//!
//! Local tokens are NOT globally unique. The only guarantee is that a
//! token differs from the previous local token issued by the same
//! [`OrderIdentifierIssuer`], best effort within a bounded number of
//! re-rolls. The backend remains the source of truth for numbering.

use rand::Rng;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::api::OrderApi;
use crate::value_str;

/// Re-roll bound for the local collision check.
const MAX_LOCAL_ATTEMPTS: usize = 3;

const DEFAULT_PREFIX: &str = "W";

/// Display identifiers for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIdentifier {
    pub number: String,
    pub reference: String,
    /// `true` when the number came from the backend sequence.
    pub from_backend: bool,
}

/// Normalize an order number into its short reference: strip a leading
/// `#` and keep the first two dash-separated segments.
pub fn normalize_reference(number: &str) -> String {
    let trimmed = number.trim().trim_start_matches('#').trim();
    trimmed
        .split('-')
        .take(2)
        .collect::<Vec<_>>()
        .join("-")
}

/// Fallback prefix: first letter of the channel, uppercased.
fn prefix_for_channel(channel: &str) -> String {
    channel
        .trim()
        .chars()
        .find(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string())
}

fn random_digits() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

/// Issues order identifiers for one terminal session.
pub struct OrderIdentifierIssuer {
    api: Arc<dyn OrderApi>,
    channel: String,
    prefix: String,
    last_generated: Mutex<Option<String>>,
}

impl OrderIdentifierIssuer {
    pub fn new(api: Arc<dyn OrderApi>, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        let prefix = prefix_for_channel(&channel);
        Self {
            api,
            channel,
            prefix,
            last_generated: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Issue an identifier. Never fails: backend errors degrade to a local
    /// token.
    pub async fn issue(&self) -> OrderIdentifier {
        match self.api.issue_order_number(&self.channel).await {
            Ok(response) => {
                if let Some(identifier) = identifier_from_response(&response) {
                    debug!(order_number = %identifier.number, "Issued backend order number");
                    return identifier;
                }
                info!("Order number endpoint returned no number, using local fallback");
            }
            Err(e) => {
                warn!(error = %e, "Order number request failed, using local fallback");
            }
        }
        self.issue_local()
    }

    /// Generate a local fallback identifier.
    pub fn issue_local(&self) -> OrderIdentifier {
        let number = self.next_local_token(random_digits);
        OrderIdentifier {
            reference: normalize_reference(&number),
            number,
            from_backend: false,
        }
    }

    fn next_local_token(&self, mut roll: impl FnMut() -> String) -> String {
        let mut last = self
            .last_generated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut candidate = format!("{}-{}", self.prefix, roll());
        for _ in 1..MAX_LOCAL_ATTEMPTS {
            if last.as_deref() != Some(candidate.as_str()) {
                break;
            }
            candidate = format!("{}-{}", self.prefix, roll());
        }
        if last.as_deref() == Some(candidate.as_str()) {
            warn!(token = %candidate, "Local order number repeated after re-roll bound");
        }
        *last = Some(candidate.clone());
        candidate
    }
}

/// Extract `{number, reference}` from the backend response, unwrapping a
/// `{data: ...}` envelope. `None` when no non-empty number is present.
fn identifier_from_response(response: &Value) -> Option<OrderIdentifier> {
    let body = response.get("data").unwrap_or(response);
    let number = value_str(body, &["orderNumber", "order_number", "number"])?;
    let reference = value_str(body, &["orderReference", "order_reference", "reference"])
        .unwrap_or_else(|| normalize_reference(&number));
    Some(OrderIdentifier {
        number,
        reference,
        from_backend: true,
    })
}
