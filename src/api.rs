//! Admin dashboard order API client.
//!
//! [`OrderApi`] is the seam between the engine and the backend order
//! store. [`HttpOrderApi`] is the production implementation: authenticated
//! JSON over HTTPS against the admin dashboard, with the same URL
//! normalisation, credential headers and friendly error mapping the rest
//! of the POS uses.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use urlencoding::encode;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::error::ApiError;

const QUEUE_PATH: &str = "/api/orders/queue";
const ORDERS_PATH: &str = "/api/orders";
const ORDER_NUMBER_PATH: &str = "/api/orders/number";

/// A status-transition request issued by the auto-advance scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    /// Canonical target status.
    pub target: String,
    /// Client nonce minted when the transition lock was acquired. Sent as
    /// `Idempotency-Key` so a backend that honours it can drop duplicates.
    pub nonce: Uuid,
}

/// Backend order store operations consumed by the engine.
///
/// Responses are returned as raw JSON; callers pick the fields they need
/// and tolerate `{success, data}` envelopes.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// `GET /orders/queue`
    async fn fetch_queue(&self) -> Result<Value, ApiError>;

    /// `POST /orders`
    async fn create_order(&self, payload: Value) -> Result<Value, ApiError>;

    /// `POST /orders/{id}/payment`
    async fn capture_payment(&self, order_id: &str, payload: Value) -> Result<Value, ApiError>;

    /// `POST /orders/{id}/cancel`
    async fn cancel_order(&self, order_id: &str, reason: &str) -> Result<Value, ApiError>;

    /// `PATCH /orders/{id}/status`
    async fn update_status(
        &self,
        order_id: &str,
        transition: &StatusTransition,
    ) -> Result<Value, ApiError>;

    /// `PATCH /orders/{id}/auto-flow`
    async fn update_auto_flow(&self, order_id: &str, payload: Value) -> Result<Value, ApiError>;

    /// `POST /orders/number`
    async fn issue_order_number(&self, channel: &str) -> Result<Value, ApiError>;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the admin dashboard URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn order_path(order_id: &str, action: &str) -> String {
    format!("{ORDERS_PATH}/{}/{action}", encode(order_id))
}

/// Treat an explicit `success: false` body as a failure even on HTTP 2xx.
pub(crate) fn reject_unsuccessful(response: &Value) -> Result<(), ApiError> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = crate::value_str(response, &["error", "message"])
            .unwrap_or_else(|| "request reported failure".to_string());
        return Err(ApiError::InvalidResponse(message));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Connection strings
// ---------------------------------------------------------------------------

/// Decode a terminal connection string: raw JSON or base64url-encoded JSON
/// carrying `key`, `url` and `tid`/`terminalId`.
fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

/// Fields carried by a terminal connection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub api_key: Option<String>,
    pub admin_url: Option<String>,
    pub terminal_id: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Option<Self> {
        let payload = decode_connection_string_payload(raw)?;
        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| payload.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let parsed = Self {
            api_key: field(&["key"]),
            admin_url: field(&["url"]).map(|u| normalize_admin_url(&u)),
            terminal_id: field(&["tid", "terminalId"]),
        };
        if parsed == Self::default() {
            return None;
        }
        Some(parsed)
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    let message = if err.is_connect() {
        format!("Cannot reach admin dashboard at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid admin dashboard URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    ApiError::Network(message)
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Admin dashboard endpoint not found".to_string(),
        409 => "Order state conflict".to_string(),
        s if s >= 500 => "Admin dashboard server error".to_string(),
        _ => "Unexpected response from admin dashboard".to_string(),
    }
}

/// Build the error for a non-2xx response, preserving the server's own
/// message and validation details when it sent any.
fn error_from_response(status: StatusCode, body_text: &str) -> ApiError {
    let body_text = body_text.trim();
    let code = status.as_u16();
    let message = if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        let message = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| status_error(status));
        match json.get("details").or_else(|| json.get("errors")) {
            Some(details) => format!("{message} (HTTP {code}): {details}"),
            None => format!("{message} (HTTP {code})"),
        }
    } else if !body_text.is_empty() {
        format!("{} (HTTP {code}): {body_text}", status_error(status))
    } else {
        format!("{} (HTTP {code})", status_error(status))
    };
    ApiError::Status {
        status: code,
        message,
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// reqwest-backed [`OrderApi`].
pub struct HttpOrderApi {
    client: Client,
    base_url: String,
    api_key: Zeroizing<String>,
    terminal_id: Option<String>,
}

impl HttpOrderApi {
    pub fn new(config: &EngineConfig) -> Result<Self, ApiError> {
        let base_url = normalize_admin_url(&config.admin_url);
        if base_url.is_empty() {
            return Err(ApiError::NotConfigured("missing admin URL".into()));
        }
        if config.api_key.trim().is_empty() {
            return Err(ApiError::NotConfigured("missing API key".into()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            api_key: Zeroizing::new(config.api_key.trim().to_string()),
            terminal_id: config.terminal_id.clone(),
        })
    }

    /// Perform an authenticated request. `path` includes the leading slash.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        idempotency_key: Option<&Uuid>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{path}", self.base_url);
        debug!(method = %method, path, "admin API request");

        let mut req = self
            .client
            .request(method, &full_url)
            .header("X-POS-API-Key", self.api_key.as_str())
            .header("Content-Type", "application/json");
        if let Some(tid) = &self.terminal_id {
            req = req.header("x-terminal-id", tid);
        }
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key.to_string());
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(error_from_response(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| {
            ApiError::InvalidResponse(format!("Invalid JSON from admin dashboard: {e}"))
        })
    }
}

#[async_trait]
impl OrderApi for HttpOrderApi {
    async fn fetch_queue(&self) -> Result<Value, ApiError> {
        self.send(Method::GET, QUEUE_PATH, None, None).await
    }

    async fn create_order(&self, payload: Value) -> Result<Value, ApiError> {
        self.send(Method::POST, ORDERS_PATH, Some(payload), None).await
    }

    async fn capture_payment(&self, order_id: &str, payload: Value) -> Result<Value, ApiError> {
        let path = order_path(order_id, "payment");
        self.send(Method::POST, &path, Some(payload), None).await
    }

    async fn cancel_order(&self, order_id: &str, reason: &str) -> Result<Value, ApiError> {
        let path = order_path(order_id, "cancel");
        self.send(Method::POST, &path, Some(json!({ "reason": reason })), None)
            .await
    }

    async fn update_status(
        &self,
        order_id: &str,
        transition: &StatusTransition,
    ) -> Result<Value, ApiError> {
        let path = order_path(order_id, "status");
        let body = json!({
            "status": transition.target,
            "transitionNonce": transition.nonce.to_string(),
        });
        self.send(Method::PATCH, &path, Some(body), Some(&transition.nonce))
            .await
    }

    async fn update_auto_flow(&self, order_id: &str, payload: Value) -> Result<Value, ApiError> {
        let path = order_path(order_id, "auto-flow");
        self.send(Method::PATCH, &path, Some(payload), None).await
    }

    async fn issue_order_number(&self, channel: &str) -> Result<Value, ApiError> {
        self.send(
            Method::POST,
            ORDER_NUMBER_PATH,
            Some(json!({ "channel": channel })),
            None,
        )
        .await
    }
}
