//! Order queue snapshot model.
//!
//! The queue endpoint is read leniently: field names vary between the
//! admin dashboard versions (camelCase, snake_case, nested `autoAdvance`
//! object), so each order is pulled out of the raw JSON with the same
//! multi-key lookups the sync layer uses. The raw value is kept alongside
//! for UI consumers that render fields the engine does not care about.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::identifier::normalize_reference;
use crate::status::{resolve_order_status, CanonicalStatus};
use crate::{value_bool, value_f64, value_str};

/// Epoch values below this are taken as seconds, above as milliseconds.
const EPOCH_SECONDS_CUTOFF: f64 = 100_000_000_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub menu_item_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrderTotals {
    pub subtotal: f64,
    pub discount_amount: f64,
    pub total: f64,
}

/// One order as seen in a queue snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub order_number: Option<String>,
    pub order_reference: Option<String>,
    /// Recomputed from the raw status fields on every parse.
    pub canonical_status: Option<CanonicalStatus>,
    /// Raw target as sent by the backend, not yet canonicalized.
    pub auto_advance_target: Option<String>,
    /// `None` when the field is missing or unparsable.
    pub auto_advance_at: Option<DateTime<Utc>>,
    pub auto_advance_paused: bool,
    pub auto_advance_pause_reason: Option<String>,
    pub items: Vec<OrderItem>,
    pub totals: Option<OrderTotals>,
    pub tendered_amount: Option<f64>,
    pub change: Option<f64>,
    pub raw: Value,
}

impl Order {
    /// Parse one order from the queue payload. Orders without an id are
    /// rejected since they cannot be transitioned.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let id = value_str(raw, &["id", "orderId", "order_id"])?;
        let nested = raw.get("autoAdvance").unwrap_or(&Value::Null);

        let order_number = value_str(raw, &["orderNumber", "order_number", "number", "orderNo"]);
        let order_reference = value_str(raw, &["orderReference", "order_reference"])
            .or_else(|| order_number.as_deref().map(normalize_reference))
            .filter(|r| !r.is_empty());

        let auto_advance_target = value_str(raw, &["autoAdvanceTarget", "auto_advance_target"])
            .or_else(|| value_str(nested, &["targetStatus", "target"]));

        let auto_advance_at = ["autoAdvanceAt", "auto_advance_at"]
            .iter()
            .filter_map(|key| raw.get(*key))
            .chain(nested.get("autoAdvanceAt"))
            .find(|v| !v.is_null())
            .and_then(parse_timestamp);

        let auto_advance_paused = value_bool(raw, &["autoAdvancePaused", "auto_advance_paused"])
            .or_else(|| value_bool(nested, &["paused"]))
            .unwrap_or(false);
        let auto_advance_pause_reason =
            value_str(raw, &["autoAdvancePauseReason", "auto_advance_pause_reason"])
                .or_else(|| value_str(nested, &["pauseReason"]));

        let items = raw
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_item).collect())
            .unwrap_or_default();

        let totals = raw.get("totals").map(|t| OrderTotals {
            subtotal: value_f64(t, &["subtotal"]).unwrap_or(0.0),
            discount_amount: value_f64(t, &["discountAmount", "discount"]).unwrap_or(0.0),
            total: value_f64(t, &["total"]).unwrap_or(0.0),
        });

        let payment = raw.get("payment").unwrap_or(&Value::Null);
        let tendered_amount = value_f64(raw, &["tenderedAmount", "tendered_amount"])
            .or_else(|| value_f64(payment, &["tenderedAmount"]));
        let change = value_f64(raw, &["change"]).or_else(|| value_f64(payment, &["change"]));

        Some(Self {
            id,
            order_number,
            order_reference,
            canonical_status: resolve_order_status(raw),
            auto_advance_target,
            auto_advance_at,
            auto_advance_paused,
            auto_advance_pause_reason,
            items,
            totals,
            tendered_amount,
            change,
            raw: raw.clone(),
        })
    }

    /// Display label for logs: order number when known, else the id.
    pub fn label(&self) -> &str {
        self.order_number.as_deref().unwrap_or(&self.id)
    }
}

fn parse_item(raw: &Value) -> Option<OrderItem> {
    let menu_item_id = value_str(raw, &["menuItemId", "menu_item_id", "id"])?;
    let quantity = value_f64(raw, &["quantity"]).unwrap_or(0.0).max(0.0) as u32;
    Some(OrderItem {
        menu_item_id,
        quantity,
    })
}

/// Parse an auto-advance deadline: RFC 3339 / ISO-8601 strings (naive
/// values are UTC), epoch numbers, or numeric strings.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(n) = s.parse::<f64>() {
                return epoch_to_datetime(n);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

fn epoch_to_datetime(n: f64) -> Option<DateTime<Utc>> {
    if !n.is_finite() {
        return None;
    }
    let millis = if n.abs() < EPOCH_SECONDS_CUTOFF {
        n * 1000.0
    } else {
        n
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Immutable view of the live order queue at one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub orders: Vec<Order>,
    pub fetched_at: DateTime<Utc>,
}

impl QueueSnapshot {
    /// Build a snapshot from the queue endpoint payload.
    ///
    /// Accepts a bare array, `{orders: [...]}`, or either wrapped in a
    /// `{success, data}` envelope. A payload in none of those shapes (or
    /// an explicit `success: false`) is an error: the scheduler must never
    /// evaluate a partial queue.
    pub fn from_payload(payload: &Value, fetched_at: DateTime<Utc>) -> Result<Self, ApiError> {
        if payload.get("success").and_then(Value::as_bool) == Some(false) {
            let message = value_str(payload, &["error", "message"])
                .unwrap_or_else(|| "queue request reported failure".to_string());
            return Err(ApiError::InvalidResponse(message));
        }
        let body = payload.get("data").unwrap_or(payload);
        let raw_orders = body
            .as_array()
            .or_else(|| body.get("orders").and_then(Value::as_array))
            .ok_or_else(|| ApiError::InvalidResponse("queue payload has no orders".into()))?;

        let mut orders = Vec::with_capacity(raw_orders.len());
        for raw in raw_orders {
            match Order::from_value(raw) {
                Some(order) => orders.push(order),
                None => debug!("Dropping queue entry without an order id"),
            }
        }
        Ok(Self { orders, fetched_at })
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
