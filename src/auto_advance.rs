//! Timer-driven order auto-advance.
//!
//! Each pass walks one queue snapshot and issues at most one status
//! transition per `(order, target)` whose deadline has passed. The poll
//! interval is shorter than a worst-case status round trip, so a due order
//! would otherwise be re-sent before the backend reflects the first
//! request. The [`LockTable`] remembers in-flight transitions until the
//! snapshot shows the target status, the order stops needing it, or the
//! lock ages past the timeout (a request that died silently).
//!
//! Only `in_prep -> staged` and `staged -> completed` are automatic, unless
//! the backend supplies an explicit target for the order.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{reject_unsuccessful, OrderApi, StatusTransition};
use crate::error::AutoAdvanceError;
use crate::order::{Order, QueueSnapshot};
use crate::status::CanonicalStatus;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub order_id: String,
    /// Canonical target status.
    pub target: String,
}

impl LockKey {
    pub fn new(order_id: &str, target: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            target: target.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    acquired_at: DateTime<Utc>,
    nonce: Uuid,
}

/// In-memory, time-bounded markers for in-flight transitions. Never
/// persisted.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: HashMap<LockKey, LockEntry>,
}

impl LockTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &LockKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn acquired_at(&self, key: &LockKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|e| e.acquired_at)
    }

    /// A lock blocks re-issue while `0 <= age < timeout`. A negative age
    /// (wall clock stepped backwards) counts as stale.
    fn is_held(&self, key: &LockKey, now: DateTime<Utc>, timeout: ChronoDuration) -> bool {
        self.entries.get(key).is_some_and(|entry| {
            let age = now.signed_duration_since(entry.acquired_at);
            age >= ChronoDuration::zero() && age < timeout
        })
    }

    /// Acquire or refresh the lock. A refreshed stale lock keeps its nonce
    /// so the re-sent request can be deduplicated by the backend.
    fn acquire(&mut self, key: LockKey, now: DateTime<Utc>) -> Uuid {
        let entry = self.entries.entry(key).or_insert_with(|| LockEntry {
            acquired_at: now,
            nonce: Uuid::new_v4(),
        });
        entry.acquired_at = now;
        entry.nonce
    }

    fn release(&mut self, key: &LockKey) -> bool {
        self.entries.remove(key).is_some()
    }

    fn release_order(&mut self, order_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.order_id != order_id);
        before - self.entries.len()
    }

    /// Drop every lock not seen in the current pass.
    fn retain_seen(&mut self, seen: &HashSet<LockKey>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| seen.contains(key));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Seconds until the deadline, rounded up, never negative.
pub fn remaining_seconds(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = deadline.signed_duration_since(now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis + 999) / 1000
    }
}

/// The target an order should move to next: explicit backend target
/// first, else the fixed automatic mapping from its canonical status.
pub fn resolve_target(order: &Order) -> Option<CanonicalStatus> {
    match order.auto_advance_target.as_deref() {
        Some(explicit) if !explicit.trim().is_empty() => CanonicalStatus::from_raw(explicit),
        _ => order
            .canonical_status
            .as_ref()
            .and_then(CanonicalStatus::auto_advance_target),
    }
}

/// One transition chosen by the planning step.
#[derive(Debug, Clone)]
struct DueTransition {
    key: LockKey,
    label: String,
    nonce: Uuid,
}

/// Counters for one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Orders with an auto-advance target.
    pub candidates: usize,
    /// Due orders skipped because a transition is already in flight.
    pub in_flight: usize,
    pub issued: usize,
    pub advanced: usize,
    pub failed: usize,
    /// Locks dropped because their order left the queue or no longer needs
    /// that target.
    pub released_stale: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was still running; nothing was evaluated.
    Skipped,
    Completed(PassReport),
}

/// Clears the in-flight flag even if the pass future is dropped.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct AutoAdvanceScheduler {
    api: Arc<dyn OrderApi>,
    locks: Mutex<LockTable>,
    lock_timeout: ChronoDuration,
    processing: AtomicBool,
}

impl AutoAdvanceScheduler {
    pub fn new(api: Arc<dyn OrderApi>, lock_timeout: Duration) -> Self {
        let lock_timeout =
            ChronoDuration::from_std(lock_timeout).unwrap_or_else(|_| ChronoDuration::seconds(10));
        Self {
            api,
            locks: Mutex::new(LockTable::default()),
            lock_timeout,
            processing: AtomicBool::new(false),
        }
    }

    fn locks(&self) -> MutexGuard<'_, LockTable> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn lock_count(&self) -> usize {
        self.locks().len()
    }

    pub fn has_lock(&self, order_id: &str, target: &str) -> bool {
        self.locks().contains(&LockKey::new(order_id, target))
    }

    pub fn lock_acquired_at(&self, order_id: &str, target: &str) -> Option<DateTime<Utc>> {
        self.locks().acquired_at(&LockKey::new(order_id, target))
    }

    /// Drop every lock held for an order (manual pause).
    pub fn release_order_locks(&self, order_id: &str) -> usize {
        self.locks().release_order(order_id)
    }

    pub fn clear_locks(&self) {
        self.locks().clear();
    }

    /// Evaluate one snapshot. Returns [`PassOutcome::Skipped`] without
    /// touching anything when a previous pass is still settling.
    pub async fn run_pass(&self, snapshot: &QueueSnapshot, now: DateTime<Utc>) -> PassOutcome {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Auto-advance pass still running, skipping tick");
            return PassOutcome::Skipped;
        }
        let _guard = ProcessingGuard(&self.processing);

        let (due, mut report) = self.plan(snapshot, now);
        if !due.is_empty() {
            self.dispatch(due, &mut report).await;
        }
        debug!(
            candidates = report.candidates,
            issued = report.issued,
            in_flight = report.in_flight,
            failed = report.failed,
            released_stale = report.released_stale,
            "Auto-advance pass complete"
        );
        PassOutcome::Completed(report)
    }

    /// Decide which orders are due and take their locks. Runs entirely
    /// under the lock-table mutex, no suspension points.
    fn plan(&self, snapshot: &QueueSnapshot, now: DateTime<Utc>) -> (Vec<DueTransition>, PassReport) {
        let mut report = PassReport::default();
        let mut due = Vec::new();
        let mut seen = HashSet::new();
        let mut locks = self.locks();

        for order in &snapshot.orders {
            let Some(target) = resolve_target(order) else {
                continue;
            };
            report.candidates += 1;
            let key = LockKey::new(&order.id, target.as_str());
            seen.insert(key.clone());

            if order.auto_advance_paused {
                locks.release(&key);
                continue;
            }
            if order.canonical_status.as_ref() == Some(&target) {
                locks.release(&key);
                continue;
            }
            let Some(deadline) = order.auto_advance_at else {
                locks.release(&key);
                continue;
            };
            if remaining_seconds(deadline, now) > 0 {
                locks.release(&key);
                continue;
            }
            if locks.is_held(&key, now, self.lock_timeout) {
                report.in_flight += 1;
                continue;
            }

            let nonce = locks.acquire(key.clone(), now);
            due.push(DueTransition {
                key,
                label: order.label().to_string(),
                nonce,
            });
        }

        report.released_stale = locks.retain_seen(&seen);
        (due, report)
    }

    /// Issue the planned transitions concurrently and settle them all
    /// before returning.
    async fn dispatch(&self, due: Vec<DueTransition>, report: &mut PassReport) {
        let mut calls = JoinSet::new();
        for transition in due {
            let api = self.api.clone();
            report.issued += 1;
            calls.spawn(async move {
                let request = StatusTransition {
                    target: transition.key.target.clone(),
                    nonce: transition.nonce,
                };
                let result = api
                    .update_status(&transition.key.order_id, &request)
                    .await
                    .and_then(|response| reject_unsuccessful(&response));
                (transition, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((transition, Ok(()))) => {
                    report.advanced += 1;
                    info!(
                        order_id = %transition.key.order_id,
                        order_number = %transition.label,
                        target = %transition.key.target,
                        "Auto-advanced order"
                    );
                }
                Ok((transition, Err(source))) => {
                    report.failed += 1;
                    // Next tick retries.
                    self.locks().release(&transition.key);
                    let err = AutoAdvanceError::Transition {
                        order_id: transition.key.order_id,
                        target: transition.key.target,
                        source,
                    };
                    warn!(order_number = %transition.label, error = %err, "Auto-advance failed");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Auto-advance task aborted");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::test_support::MockOrderApi;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn snapshot(orders: Value) -> QueueSnapshot {
        QueueSnapshot::from_payload(&orders, now()).unwrap()
    }

    fn scheduler(api: &Arc<MockOrderApi>) -> AutoAdvanceScheduler {
        AutoAdvanceScheduler::new(api.clone(), Duration::from_secs(10))
    }

    fn due_in_prep(id: &str) -> Value {
        json!({
            "id": id,
            "orderNumber": format!("W-{id}"),
            "status": "in_prep",
            "autoAdvanceAt": "2024-01-01T11:59:00Z",
            "autoAdvancePaused": false,
        })
    }

    fn report(outcome: PassOutcome) -> PassReport {
        match outcome {
            PassOutcome::Completed(report) => report,
            PassOutcome::Skipped => panic!("pass unexpectedly skipped"),
        }
    }

    #[test]
    fn test_remaining_seconds_rounds_up() {
        let t = now();
        assert_eq!(remaining_seconds(t + ChronoDuration::milliseconds(1), t), 1);
        assert_eq!(remaining_seconds(t + ChronoDuration::milliseconds(1000), t), 1);
        assert_eq!(remaining_seconds(t + ChronoDuration::milliseconds(1001), t), 2);
        assert_eq!(remaining_seconds(t, t), 0);
        assert_eq!(remaining_seconds(t - ChronoDuration::seconds(30), t), 0);
    }

    #[test]
    fn test_resolve_target() {
        let snap = snapshot(json!([
            { "id": "a", "status": "preparing" },
            { "id": "b", "status": "ready" },
            { "id": "c", "status": "accepted" },
            { "id": "d", "status": "accepted", "autoAdvanceTarget": "in_progress" },
            { "id": "e", "status": "handoff", "autoAdvanceTarget": "  " },
        ]));
        let targets: Vec<_> = snap.orders.iter().map(resolve_target).collect();
        assert_eq!(
            targets,
            vec![
                Some(CanonicalStatus::Staged),
                Some(CanonicalStatus::Completed),
                None,
                Some(CanonicalStatus::InPrep),
                None,
            ]
        );
    }

    #[tokio::test]
    async fn test_due_order_advances_once() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([due_in_prep("o1")]));

        let first = report(scheduler.run_pass(&snap, now()).await);
        assert_eq!(first.issued, 1);
        assert_eq!(first.advanced, 1);
        let call = api.last_call("update_status").unwrap();
        assert_eq!(call.order_id.as_deref(), Some("o1"));
        assert_eq!(call.body["status"], "staged");
        assert!(scheduler.has_lock("o1", "staged"));

        // Backend has not reflected the change yet.
        let second = report(
            scheduler
                .run_pass(&snap, now() + ChronoDuration::seconds(2))
                .await,
        );
        assert_eq!(second.issued, 0);
        assert_eq!(second.in_flight, 1);
        assert_eq!(api.calls_named("update_status"), 1);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let api = Arc::new(MockOrderApi::new());
        let gate = api.gate_status_updates();
        let scheduler = Arc::new(scheduler(&api));
        let snap = Arc::new(snapshot(json!([due_in_prep("o1")])));

        let first = {
            let scheduler = scheduler.clone();
            let snap = snap.clone();
            tokio::spawn(async move { scheduler.run_pass(&snap, now()).await })
        };
        while api.calls_named("update_status") == 0 {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.is_processing());

        let second = scheduler.run_pass(&snap, now()).await;
        assert_eq!(second, PassOutcome::Skipped);
        assert_eq!(api.calls_named("update_status"), 1);

        gate.add_permits(1);
        let first = report(first.await.unwrap());
        assert_eq!(first.advanced, 1);
        assert!(!scheduler.is_processing());
        assert_eq!(api.calls_named("update_status"), 1);
    }

    #[tokio::test]
    async fn test_paused_order_never_advances() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([{
            "id": "o1",
            "status": "in_prep",
            "autoAdvanceAt": "2023-12-01T00:00:00Z",
            "autoAdvancePaused": true,
        }]));

        for hours in [0, 24, 24 * 365] {
            let pass = report(
                scheduler
                    .run_pass(&snap, now() + ChronoDuration::hours(hours))
                    .await,
            );
            assert_eq!(pass.candidates, 1);
            assert_eq!(pass.issued, 0);
        }
        assert_eq!(api.calls_named("update_status"), 0);
        assert_eq!(scheduler.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_pause_drops_existing_lock_and_resume_rearms() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        scheduler
            .run_pass(&snapshot(json!([due_in_prep("o1")])), now())
            .await;
        assert!(scheduler.has_lock("o1", "staged"));

        let mut paused = due_in_prep("o1");
        paused["autoAdvancePaused"] = json!(true);
        scheduler.run_pass(&snapshot(json!([paused])), now()).await;
        assert!(!scheduler.has_lock("o1", "staged"));

        let resumed = report(
            scheduler
                .run_pass(&snapshot(json!([due_in_prep("o1")])), now())
                .await,
        );
        assert_eq!(resumed.issued, 1);
        assert_eq!(api.calls_named("update_status"), 2);
    }

    #[tokio::test]
    async fn test_countdown_running_issues_nothing() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([{
            "id": "o1",
            "status": "ready",
            "autoAdvanceAt": "2024-01-01T12:00:00.500Z",
        }]));
        let pass = report(scheduler.run_pass(&snap, now()).await);
        assert_eq!(pass.issued, 0);

        let pass = report(
            scheduler
                .run_pass(&snap, now() + ChronoDuration::seconds(1))
                .await,
        );
        assert_eq!(pass.issued, 1);
        assert_eq!(api.last_call("update_status").unwrap().body["status"], "completed");
    }

    #[tokio::test]
    async fn test_missing_or_bad_deadline_is_skipped() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([
            { "id": "o1", "status": "in_prep" },
            { "id": "o2", "status": "in_prep", "autoAdvanceAt": "soon" },
        ]));
        let pass = report(scheduler.run_pass(&snap, now()).await);
        assert_eq!(pass.candidates, 2);
        assert_eq!(pass.issued, 0);
        assert_eq!(scheduler.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_already_at_target_clears_lock() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        let mut order = due_in_prep("o1");
        order["autoAdvanceTarget"] = json!("ready");
        scheduler.run_pass(&snapshot(json!([order.clone()])), now()).await;
        assert!(scheduler.has_lock("o1", "staged"));

        order["status"] = json!("ready");
        let pass = report(scheduler.run_pass(&snapshot(json!([order])), now()).await);
        assert_eq!(pass.issued, 0);
        assert!(!scheduler.has_lock("o1", "staged"));
        assert_eq!(api.calls_named("update_status"), 1);
    }

    #[tokio::test]
    async fn test_failure_releases_lock_for_retry() {
        let api = Arc::new(MockOrderApi::new());
        api.set_status_response(Err(ApiError::Network("timeout".into())));
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([due_in_prep("o1")]));

        let pass = report(scheduler.run_pass(&snap, now()).await);
        assert_eq!(pass.failed, 1);
        assert_eq!(scheduler.lock_count(), 0);

        api.set_status_response(Ok(json!({ "success": true })));
        let pass = report(
            scheduler
                .run_pass(&snap, now() + ChronoDuration::seconds(2))
                .await,
        );
        assert_eq!(pass.advanced, 1);
        assert_eq!(api.calls_named("update_status"), 2);
    }

    #[tokio::test]
    async fn test_unsuccessful_body_releases_lock() {
        let api = Arc::new(MockOrderApi::new());
        api.set_status_response(Ok(json!({ "success": false, "error": "Invalid transition" })));
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([due_in_prep("o1")]));

        let pass = report(scheduler.run_pass(&snap, now()).await);
        assert_eq!(pass.advanced, 0);
        assert_eq!(pass.failed, 1);
        assert!(!scheduler.has_lock("o1", "staged"));
    }

    #[tokio::test]
    async fn test_stale_lock_is_reissued_with_same_nonce() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([due_in_prep("o1")]));

        scheduler.run_pass(&snap, now()).await;
        let first_nonce = api.last_call("update_status").unwrap().body["nonce"].clone();

        let pass = report(
            scheduler
                .run_pass(&snap, now() + ChronoDuration::seconds(9))
                .await,
        );
        assert_eq!(pass.issued, 0);

        let later = now() + ChronoDuration::seconds(10);
        let pass = report(scheduler.run_pass(&snap, later).await);
        assert_eq!(pass.issued, 1);
        assert_eq!(api.last_call("update_status").unwrap().body["nonce"], first_nonce);
        assert_eq!(scheduler.lock_acquired_at("o1", "staged"), Some(later));
    }

    #[tokio::test]
    async fn test_locks_for_departed_orders_are_dropped() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        scheduler
            .run_pass(&snapshot(json!([due_in_prep("o1"), due_in_prep("o2")])), now())
            .await;
        assert_eq!(scheduler.lock_count(), 2);

        let pass = report(
            scheduler
                .run_pass(&snapshot(json!([due_in_prep("o2")])), now())
                .await,
        );
        assert_eq!(pass.released_stale, 1);
        assert!(!scheduler.has_lock("o1", "staged"));
        assert!(scheduler.has_lock("o2", "staged"));

        scheduler.run_pass(&snapshot(json!([])), now()).await;
        assert_eq!(scheduler.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_target_change_drops_old_lock() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        scheduler
            .run_pass(&snapshot(json!([due_in_prep("o1")])), now())
            .await;

        let mut retargeted = due_in_prep("o1");
        retargeted["autoAdvanceTarget"] = json!("handoff");
        scheduler.run_pass(&snapshot(json!([retargeted])), now()).await;
        assert!(!scheduler.has_lock("o1", "staged"));
        assert!(scheduler.has_lock("o1", "handoff"));
        assert_eq!(api.last_call("update_status").unwrap().body["status"], "handoff");
    }

    #[tokio::test]
    async fn test_multiple_due_orders_in_one_pass() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        let snap = snapshot(json!([
            due_in_prep("o1"),
            due_in_prep("o2"),
            { "id": "o3", "status": "new", "autoAdvanceAt": "2024-01-01T11:00:00Z" },
        ]));
        let pass = report(scheduler.run_pass(&snap, now()).await);
        assert_eq!(pass.candidates, 2);
        assert_eq!(pass.issued, 2);
        assert_eq!(pass.advanced, 2);
    }

    #[tokio::test]
    async fn test_release_order_locks() {
        let api = Arc::new(MockOrderApi::new());
        let scheduler = scheduler(&api);
        scheduler
            .run_pass(&snapshot(json!([due_in_prep("o1"), due_in_prep("o2")])), now())
            .await;
        assert_eq!(scheduler.release_order_locks("o1"), 1);
        assert_eq!(scheduler.lock_count(), 1);
        scheduler.clear_locks();
        assert_eq!(scheduler.lock_count(), 0);
    }
}
