//! Checkout: turn the working cart into a persisted order plus a captured
//! payment.
//!
//! The protocol is ordered and compensating: the order is created first,
//! then the payment is captured against the created id. If capture fails
//! the created order is cancelled (best effort) so the kitchen never sees
//! an unpaid walk-in ticket. The cart is only cleared after both steps
//! succeed, so a failed checkout can be retried without re-entering items.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::api::{reject_unsuccessful, OrderApi};
use crate::cart::{Cart, DiscountKind};
use crate::error::CheckoutError;
use crate::identifier::{OrderIdentifier, OrderIdentifierIssuer};
use crate::value_str;

/// Reason sent with the compensating cancellation.
pub const CAPTURE_FAILED_CANCEL_REASON: &str = "Payment could not be completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    DigitalWallet,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::DigitalWallet => "digital_wallet",
            Self::Other => "other",
        }
    }
}

/// Cash-drawer figures supplied by the cashier. Both default from the
/// order total when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TenderDetails {
    pub tendered_amount: Option<f64>,
    pub change: Option<f64>,
}

impl TenderDetails {
    pub fn tendered(amount: f64) -> Self {
        Self {
            tendered_amount: Some(amount),
            change: None,
        }
    }
}

/// The created order, returned on a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderInfo {
    pub id: String,
    pub order_number: String,
}

pub struct PaymentTransactionCoordinator {
    api: Arc<dyn OrderApi>,
    issuer: Arc<OrderIdentifierIssuer>,
    current: Mutex<Option<OrderIdentifier>>,
}

impl PaymentTransactionCoordinator {
    pub fn new(api: Arc<dyn OrderApi>, issuer: Arc<OrderIdentifierIssuer>) -> Self {
        Self {
            api,
            issuer,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<OrderIdentifier>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cached(&self) -> Option<OrderIdentifier> {
        self.current().clone()
    }

    fn set_cached(&self, identifier: Option<OrderIdentifier>) {
        *self.current() = identifier;
    }

    /// Claim an identifier for one submission. Taking it out of the cache
    /// keeps two concurrent submissions from sharing a number.
    async fn claim_identifier(&self) -> OrderIdentifier {
        let cached = self.current().take();
        match cached {
            Some(identifier) => identifier,
            None => self.issuer.issue().await,
        }
    }

    /// Put back an identifier whose order was never created, unless a newer
    /// one is already waiting.
    fn restore_identifier(&self, identifier: OrderIdentifier) {
        self.current().get_or_insert(identifier);
    }

    /// Issue a fresh identifier for the next transaction and cache it.
    pub async fn issue_identifier(&self) -> OrderIdentifier {
        let identifier = self.issuer.issue().await;
        self.set_cached(Some(identifier.clone()));
        identifier
    }

    /// The identifier the next submission will use, issuing one if none is
    /// cached.
    pub async fn current_identifier(&self) -> OrderIdentifier {
        match self.cached() {
            Some(identifier) => identifier,
            None => self.issue_identifier().await,
        }
    }

    /// Submit the cart: create the order, capture payment, compensate on
    /// capture failure. Clears the cart only on full success.
    pub async fn submit(
        &self,
        cart: &mut Cart,
        method: PaymentMethod,
        tender: TenderDetails,
    ) -> Result<OrderInfo, CheckoutError> {
        if cart.is_empty() {
            return Err(CheckoutError::Validation("No items in order.".into()));
        }

        let totals = cart.totals();
        let tendered_amount = tender.tendered_amount.unwrap_or(totals.total);
        if !tendered_amount.is_finite() || tendered_amount < 0.0 {
            return Err(CheckoutError::Validation(
                "Tendered amount must be a non-negative number".into(),
            ));
        }
        let change = tender
            .change
            .filter(|c| c.is_finite() && *c >= 0.0)
            .unwrap_or_else(|| (tendered_amount - totals.total).max(0.0));

        let identifier = self.claim_identifier().await;
        let discount = cart.discount();
        let fixed_discount = match discount.kind {
            DiscountKind::Fixed => discount.value,
            DiscountKind::Percentage => 0.0,
        };
        let items: Vec<Value> = cart
            .lines()
            .iter()
            .map(|l| json!({ "menuItemId": l.menu_item_id, "quantity": l.quantity }))
            .collect();
        let payload = json!({
            "items": items,
            "discount": fixed_discount,
            "discountType": discount.kind.as_str(),
            "totals": {
                "subtotal": totals.subtotal,
                "discount": totals.discount_amount,
                "total": totals.total,
            },
            "type": self.issuer.channel(),
            "channel": self.issuer.channel(),
            "orderNumber": identifier.number,
            "orderReference": identifier.reference,
            "payment": {
                "method": method.as_str(),
                "tenderedAmount": tendered_amount,
                "change": change,
            },
        });

        let created = match self
            .api
            .create_order(payload)
            .await
            .and_then(|response| reject_unsuccessful(&response).map(|_| response))
        {
            Ok(created) => created,
            Err(e) => {
                warn!(error = %e, "Order creation failed");
                self.restore_identifier(identifier);
                return Err(CheckoutError::Creation(e.to_string()));
            }
        };

        // Without an id the backend may still hold an order under this
        // number, so it is not restored.
        let info = extract_order_info(&created, &identifier.number).ok_or_else(|| {
            warn!("Order creation response carried no order id");
            CheckoutError::Creation("response did not include an order id".into())
        })?;

        let capture = json!({
            "amount": totals.total,
            "method": method.as_str(),
            "tenderedAmount": tendered_amount,
            "change": change,
        });
        let captured = self
            .api
            .capture_payment(&info.id, capture)
            .await
            .and_then(|response| reject_unsuccessful(&response));

        if let Err(capture_error) = captured {
            warn!(order_id = %info.id, error = %capture_error, "Payment capture failed, cancelling order");
            self.compensate(&info.id).await;
            // The number now belongs to a cancelled order and stays out of
            // the cache.
            return Err(CheckoutError::Capture {
                order_id: info.id,
                message: capture_error.to_string(),
            });
        }

        info!(
            order_id = %info.id,
            order_number = %info.order_number,
            total = totals.total,
            method = method.as_str(),
            "Walk-in order paid"
        );
        cart.clear();
        self.issue_identifier().await;
        Ok(info)
    }

    /// Best-effort compensating cancellation. Failures are logged only.
    async fn compensate(&self, order_id: &str) {
        match self
            .api
            .cancel_order(order_id, CAPTURE_FAILED_CANCEL_REASON)
            .await
        {
            Ok(_) => info!(order_id, "Cancelled order after failed payment capture"),
            Err(e) => error!(
                order_id,
                error = %e,
                "Compensating cancellation failed; order may need manual cancellation"
            ),
        }
    }
}

/// Pull `{id, orderNumber}` out of a creation response. The id is
/// required; the number falls back to the one sent with the request.
fn extract_order_info(response: &Value, requested_number: &str) -> Option<OrderInfo> {
    let body = response.get("data").unwrap_or(response);
    let id = value_str(body, &["id", "orderId", "orderID", "order_id"])?;
    let order_number = value_str(body, &["orderNumber", "order_number", "number", "orderNo"])
        .unwrap_or_else(|| requested_number.to_string());
    Some(OrderInfo { id, order_number })
}
