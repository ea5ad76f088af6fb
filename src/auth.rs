//! Signed-in operator and permission checks.
//!
//! The engine does not authenticate anyone itself; the host POS signs an
//! operator in after its own PIN check and the engine consults the
//! resulting session before running privileged background work. Sessions
//! are in-memory only and expire on inactivity or after a maximum
//! duration.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Gates the auto-advance loop.
pub const UPDATE_ORDER_STATUS: &str = "update_order_status";

const SESSION_INACTIVITY_MINUTES: i64 = 30;
const SESSION_MAX_DURATION_HOURS: i64 = 2;

/// Permissions granted to administrators.
const ADMIN_PERMISSIONS: &[&str] = &[
    "view_orders",
    "update_order_status",
    "create_order",
    "delete_order",
    "view_reports",
    "manage_staff",
    "system_settings",
];

/// Permissions granted to regular staff.
const STAFF_PERMISSIONS: &[&str] = &["view_orders", "update_order_status", "create_order"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The signed-in operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub staff_id: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl Actor {
    /// Build an actor with the permission preset for `role`. Unknown roles
    /// get no permissions.
    pub fn with_role(staff_id: &str, role: &str) -> Self {
        let role = role.trim().to_lowercase();
        let preset: &[&str] = match role.as_str() {
            "admin" => ADMIN_PERMISSIONS,
            "staff" => STAFF_PERMISSIONS,
            _ => &[],
        };
        Self {
            staff_id: staff_id.to_string(),
            role,
            permissions: preset.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Clone)]
struct StaffSession {
    session_id: String,
    actor: Actor,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StaffSession {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
            || now - self.last_activity > Duration::minutes(SESSION_INACTIVITY_MINUTES)
    }
}

#[derive(Debug, Default)]
pub struct AuthState {
    session: Mutex<Option<StaffSession>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> MutexGuard<'_, Option<StaffSession>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current session. Returns the new session id.
    pub fn sign_in(&self, actor: Actor) -> String {
        self.sign_in_at(actor, Utc::now())
    }

    fn sign_in_at(&self, actor: Actor, now: DateTime<Utc>) -> String {
        let session_id = Uuid::new_v4().to_string();
        info!(staff_id = %actor.staff_id, role = %actor.role, "Operator signed in");
        *self.session() = Some(StaffSession {
            session_id: session_id.clone(),
            actor,
            last_activity: now,
            expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
        });
        session_id
    }

    pub fn sign_out(&self) {
        if let Some(session) = self.session().take() {
            info!(session_id = %session.session_id, "Operator signed out");
        }
    }

    /// The signed-in actor, if the session is still valid.
    pub fn current(&self) -> Option<Actor> {
        self.current_at(Utc::now())
    }

    fn current_at(&self, now: DateTime<Utc>) -> Option<Actor> {
        let mut session = self.session();
        if session.as_ref().is_some_and(|s| s.is_expired_at(now)) {
            if let Some(expired) = session.take() {
                info!(session_id = %expired.session_id, "Operator session expired");
            }
        }
        session.as_ref().map(|s| s.actor.clone())
    }

    pub fn can(&self, permission: &str) -> bool {
        self.current()
            .is_some_and(|actor| actor.has_permission(permission))
    }

    /// Refresh the inactivity timer.
    pub fn track_activity(&self) {
        if let Some(session) = self.session().as_mut() {
            session.last_activity = Utc::now();
        }
    }
}
