//! Scripted in-memory [`OrderApi`] for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::api::{OrderApi, StatusTransition};
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub name: &'static str,
    pub order_id: Option<String>,
    pub body: Value,
}

type Scripted = Mutex<Option<Result<Value, ApiError>>>;

#[derive(Default)]
pub struct MockOrderApi {
    calls: Mutex<Vec<ApiCall>>,
    queue: Scripted,
    create: Scripted,
    capture: Scripted,
    cancel: Scripted,
    status: Scripted,
    auto_flow: Scripted,
    number: Scripted,
    number_seq: AtomicU64,
    status_gate: Mutex<Option<Arc<Semaphore>>>,
    yield_in_create: AtomicBool,
}

impl MockOrderApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, name: &'static str, order_id: Option<&str>, body: Value) {
        self.calls.lock().unwrap().push(ApiCall {
            name,
            order_id: order_id.map(str::to_string),
            body,
        });
    }

    fn scripted(slot: &Scripted) -> Option<Result<Value, ApiError>> {
        slot.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.name == name).count()
    }

    pub fn last_call(&self, name: &str) -> Option<ApiCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn last_number_channel(&self) -> Option<String> {
        self.last_call("issue_order_number")
            .and_then(|c| c.body["channel"].as_str().map(str::to_string))
    }

    pub fn set_queue(&self, orders: Value) {
        *self.queue.lock().unwrap() = Some(Ok(json!({ "success": true, "data": { "orders": orders } })));
    }

    pub fn set_queue_response(&self, response: Result<Value, ApiError>) {
        *self.queue.lock().unwrap() = Some(response);
    }

    pub fn set_create_response(&self, response: Result<Value, ApiError>) {
        *self.create.lock().unwrap() = Some(response);
    }

    pub fn set_capture_response(&self, response: Result<Value, ApiError>) {
        *self.capture.lock().unwrap() = Some(response);
    }

    pub fn set_cancel_response(&self, response: Result<Value, ApiError>) {
        *self.cancel.lock().unwrap() = Some(response);
    }

    pub fn set_status_response(&self, response: Result<Value, ApiError>) {
        *self.status.lock().unwrap() = Some(response);
    }

    pub fn set_auto_flow_response(&self, response: Result<Value, ApiError>) {
        *self.auto_flow.lock().unwrap() = Some(response);
    }

    pub fn set_number_response(&self, response: Result<Value, ApiError>) {
        *self.number.lock().unwrap() = Some(response);
    }

    /// Yield to the scheduler inside every `create_order`, so concurrent
    /// submissions interleave.
    pub fn yield_in_create(&self) {
        self.yield_in_create.store(true, Ordering::SeqCst);
    }

    /// Hold every status update in flight until the returned semaphore
    /// receives permits.
    pub fn gate_status_updates(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.status_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl OrderApi for MockOrderApi {
    async fn fetch_queue(&self) -> Result<Value, ApiError> {
        self.record("fetch_queue", None, Value::Null);
        Self::scripted(&self.queue).unwrap_or_else(|| Ok(json!({ "orders": [] })))
    }

    async fn create_order(&self, payload: Value) -> Result<Value, ApiError> {
        self.record("create_order", None, payload.clone());
        if self.yield_in_create.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Self::scripted(&self.create).unwrap_or_else(|| {
            Ok(json!({
                "success": true,
                "data": { "id": "ord-1", "orderNumber": payload["orderNumber"].clone() },
            }))
        })
    }

    async fn capture_payment(&self, order_id: &str, payload: Value) -> Result<Value, ApiError> {
        self.record("capture_payment", Some(order_id), payload);
        Self::scripted(&self.capture).unwrap_or_else(|| Ok(json!({ "success": true })))
    }

    async fn cancel_order(&self, order_id: &str, reason: &str) -> Result<Value, ApiError> {
        self.record("cancel_order", Some(order_id), json!({ "reason": reason }));
        Self::scripted(&self.cancel).unwrap_or_else(|| Ok(json!({ "success": true })))
    }

    async fn update_status(
        &self,
        order_id: &str,
        transition: &StatusTransition,
    ) -> Result<Value, ApiError> {
        self.record(
            "update_status",
            Some(order_id),
            json!({ "status": transition.target, "nonce": transition.nonce.to_string() }),
        );
        let gate = self.status_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Self::scripted(&self.status).unwrap_or_else(|| Ok(json!({ "success": true })))
    }

    async fn update_auto_flow(&self, order_id: &str, payload: Value) -> Result<Value, ApiError> {
        self.record("update_auto_flow", Some(order_id), payload);
        Self::scripted(&self.auto_flow).unwrap_or_else(|| Ok(json!({ "success": true })))
    }

    async fn issue_order_number(&self, channel: &str) -> Result<Value, ApiError> {
        self.record("issue_order_number", None, json!({ "channel": channel }));
        Self::scripted(&self.number).unwrap_or_else(|| {
            let seq = self.number_seq.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "data": { "orderNumber": format!("W-240101-{seq:06}") } }))
        })
    }
}
