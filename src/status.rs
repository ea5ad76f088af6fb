//! Canonical order status vocabulary.
//!
//! The admin dashboard and older terminals report order status under a
//! handful of legacy spellings and field names. Everything the engine
//! compares against goes through [`CanonicalStatus::from_raw`] first, and
//! the canonical value is recomputed on every read: a precomputed
//! canonical field on the wire is only ever treated as another raw input.

use serde_json::Value;
use std::fmt;

/// Raw status fields, in resolution priority order.
pub const STATUS_FIELDS: &[&str] = &[
    "canonicalStatus",
    "canonical_status",
    "status",
    "rawStatus",
    "raw_status",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalStatus {
    New,
    Accepted,
    InPrep,
    Staged,
    Handoff,
    Completed,
    Cancelled,
    Voided,
    Refunded,
    /// Normalized passthrough for statuses outside the vocabulary. Never
    /// matches an auto-advance rule.
    Other(String),
}

impl CanonicalStatus {
    /// Canonicalize a raw status string. Returns `None` for blank input.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        let status = match normalized.as_str() {
            "new" | "pending" => Self::New,
            "accepted" | "in_queue" | "in-queue" => Self::Accepted,
            "in_prep" | "in-prep" | "in_progress" | "in-progress" | "preparing" => Self::InPrep,
            "staged" | "ready" => Self::Staged,
            "handoff" => Self::Handoff,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "voided" => Self::Voided,
            "refunded" => Self::Refunded,
            _ => Self::Other(normalized),
        };
        Some(status)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Accepted => "accepted",
            Self::InPrep => "in_prep",
            Self::Staged => "staged",
            Self::Handoff => "handoff",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Voided => "voided",
            Self::Refunded => "refunded",
            Self::Other(s) => s,
        }
    }

    /// The only automatic transitions the engine will ever trigger.
    pub fn auto_advance_target(&self) -> Option<Self> {
        match self {
            Self::InPrep => Some(Self::Staged),
            Self::Staged => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String form of [`CanonicalStatus::from_raw`]; blank input yields `""`.
pub fn canonicalize(raw: &str) -> String {
    CanonicalStatus::from_raw(raw)
        .map(|s| s.as_str().to_string())
        .unwrap_or_default()
}

/// Resolve an order's canonical status from whichever status-like field
/// it carries, first non-empty field in [`STATUS_FIELDS`] order wins.
pub fn resolve_order_status(order: &Value) -> Option<CanonicalStatus> {
    STATUS_FIELDS
        .iter()
        .filter_map(|key| order.get(*key).and_then(Value::as_str))
        .find_map(CanonicalStatus::from_raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_synonym_table() {
        let cases = [
            ("pending", "new"),
            ("new", "new"),
            ("accepted", "accepted"),
            ("in_queue", "accepted"),
            ("in-queue", "accepted"),
            ("in_progress", "in_prep"),
            ("in-progress", "in_prep"),
            ("preparing", "in_prep"),
            ("in_prep", "in_prep"),
            ("ready", "staged"),
            ("staged", "staged"),
            ("handoff", "handoff"),
            ("completed", "completed"),
            ("cancelled", "cancelled"),
            ("voided", "voided"),
            ("refunded", "refunded"),
        ];
        for (raw, expected) in cases {
            assert_eq!(canonicalize(raw), expected, "raw status {raw}");
        }
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(canonicalize("  In-Progress "), "in_prep");
        assert_eq!(canonicalize("READY"), "staged");
    }

    #[test]
    fn test_unrecognized_passthrough() {
        assert_eq!(canonicalize("  Out_For_Delivery "), "out_for_delivery");
        assert_eq!(
            CanonicalStatus::from_raw("held"),
            Some(CanonicalStatus::Other("held".into()))
        );
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("   "), "");
    }

    #[test]
    fn test_auto_advance_targets() {
        assert_eq!(
            CanonicalStatus::InPrep.auto_advance_target(),
            Some(CanonicalStatus::Staged)
        );
        assert_eq!(
            CanonicalStatus::Staged.auto_advance_target(),
            Some(CanonicalStatus::Completed)
        );
        for manual in [
            CanonicalStatus::New,
            CanonicalStatus::Accepted,
            CanonicalStatus::Handoff,
            CanonicalStatus::Completed,
            CanonicalStatus::Cancelled,
            CanonicalStatus::Voided,
            CanonicalStatus::Refunded,
            CanonicalStatus::Other("held".into()),
        ] {
            assert_eq!(manual.auto_advance_target(), None, "{manual}");
        }
    }

    #[test]
    fn test_resolution_prefers_canonical_field() {
        let order = json!({ "canonicalStatus": "ready", "status": "preparing" });
        assert_eq!(resolve_order_status(&order), Some(CanonicalStatus::Staged));
    }

    #[test]
    fn test_resolution_skips_blank_fields() {
        let order = json!({ "canonicalStatus": "", "status": " ", "raw_status": "in_progress" });
        assert_eq!(resolve_order_status(&order), Some(CanonicalStatus::InPrep));
        assert_eq!(resolve_order_status(&json!({ "id": "o1" })), None);
    }
}
