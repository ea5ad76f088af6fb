//! `OrderEngine`: the single handle a POS host holds.
//!
//! Owns the API client, the identifier issuer, the checkout coordinator
//! and the auto-advance poller, all sharing one [`OrderApi`].

use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::api::{HttpOrderApi, OrderApi};
use crate::auth::{AuthState, UPDATE_ORDER_STATUS};
use crate::auto_advance::{AutoAdvanceScheduler, PassOutcome};
use crate::cart::Cart;
use crate::config::EngineConfig;
use crate::error::{ApiError, AutoAdvanceError, CheckoutError};
use crate::identifier::{OrderIdentifier, OrderIdentifierIssuer};
use crate::order::QueueSnapshot;
use crate::payments::{OrderInfo, PaymentMethod, PaymentTransactionCoordinator, TenderDetails};
use crate::poller::{QueuePoller, SnapshotReceiver};

pub struct OrderEngine {
    api: Arc<dyn OrderApi>,
    auth: Arc<AuthState>,
    payments: PaymentTransactionCoordinator,
    scheduler: Arc<AutoAdvanceScheduler>,
    poller: QueuePoller,
}

impl OrderEngine {
    pub fn new(config: &EngineConfig, api: Arc<dyn OrderApi>) -> Self {
        let auth = Arc::new(AuthState::new());
        let issuer = Arc::new(OrderIdentifierIssuer::new(api.clone(), config.channel.clone()));
        let scheduler = Arc::new(AutoAdvanceScheduler::new(api.clone(), config.lock_timeout));
        let poller = QueuePoller::new(
            api.clone(),
            scheduler.clone(),
            auth.clone(),
            config.poll_interval,
        );
        Self {
            payments: PaymentTransactionCoordinator::new(api.clone(), issuer),
            api,
            auth,
            scheduler,
            poller,
        }
    }

    /// Build against the admin dashboard over HTTP.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ApiError> {
        let api = Arc::new(HttpOrderApi::new(config)?);
        Ok(Self::new(config, api))
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    // -----------------------------------------------------------------------
    // Checkout
    // -----------------------------------------------------------------------

    /// Issue a fresh identifier for the next walk-in order.
    pub async fn issue_identifier(&self) -> OrderIdentifier {
        self.payments.issue_identifier().await
    }

    pub async fn current_identifier(&self) -> OrderIdentifier {
        self.payments.current_identifier().await
    }

    pub async fn submit_payment(
        &self,
        cart: &mut Cart,
        method: PaymentMethod,
        tender: TenderDetails,
    ) -> Result<OrderInfo, CheckoutError> {
        self.auth.track_activity();
        self.payments.submit(cart, method, tender).await
    }

    // -----------------------------------------------------------------------
    // Auto-advance
    // -----------------------------------------------------------------------

    /// Start the poll loop if the operator may update order status.
    /// Returns whether the loop is running afterwards.
    pub fn start_auto_advance(&self) -> bool {
        if !self.auth.can(UPDATE_ORDER_STATUS) {
            info!("Auto-advance not started: operator lacks {UPDATE_ORDER_STATUS}");
            return false;
        }
        self.poller.start();
        self.poller.is_running()
    }

    pub async fn stop_auto_advance(&self) {
        self.poller.stop().await;
    }

    pub fn is_auto_advance_running(&self) -> bool {
        self.poller.is_running()
    }

    /// Reconcile the loop with the current operator's permissions: start it
    /// when allowed, stop it (clearing locks) when not.
    pub async fn sync_authorization(&self) -> bool {
        if self.auth.can(UPDATE_ORDER_STATUS) {
            if !self.poller.is_running() {
                self.start_auto_advance();
            }
        } else if self.poller.is_running() {
            info!("Operator lost {UPDATE_ORDER_STATUS}, stopping auto-advance");
            self.poller.stop().await;
        } else {
            // A loop that exited on its own may have left a pass's locks.
            self.scheduler.clear_locks();
        }
        self.poller.is_running()
    }

    /// Run one fetch-and-advance iteration immediately.
    pub async fn poll_now(&self) -> Result<PassOutcome, AutoAdvanceError> {
        self.poller.poll_once().await
    }

    /// Pause auto-advance for one order and drop its in-flight locks.
    pub async fn pause_auto_advance(&self, order_id: &str, reason: &str) -> Result<(), ApiError> {
        let reason = reason.trim();
        self.api
            .update_auto_flow(order_id, json!({ "action": "pause", "reason": reason }))
            .await?;
        let released = self.scheduler.release_order_locks(order_id);
        info!(order_id, reason, released, "Auto-advance paused");
        Ok(())
    }

    pub async fn resume_auto_advance(&self, order_id: &str) -> Result<(), ApiError> {
        self.api
            .update_auto_flow(order_id, json!({ "action": "resume", "reason": null }))
            .await?;
        info!(order_id, "Auto-advance resumed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queue view
    // -----------------------------------------------------------------------

    pub fn current_queue(&self) -> Option<Arc<QueueSnapshot>> {
        self.poller.latest_snapshot()
    }

    pub fn subscribe_queue(&self) -> SnapshotReceiver {
        self.poller.subscribe()
    }

    pub fn in_flight_transitions(&self) -> usize {
        self.scheduler.lock_count()
    }
}
