//! # Application Status
//!
//! Status types for tracking sync state and conditions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition reporting whether the Application was accepted by the controller
pub const CONDITION_READY: &str = "ready";
/// Condition reporting whether a git webhook points at this controller
pub const CONDITION_WEBHOOK_REGISTERED: &str = "webhook-registered";
/// Reason used when no token is configured to register a webhook with
pub const REASON_NO_GIT_TOKEN: &str = "noGitToken";
/// Reason used when a token is configured but the hook must be added on the git host by hand
pub const REASON_MANUAL_REGISTRATION: &str = "manualRegistration";

/// Status of the Application resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Result of the last sync pass
    #[serde(default)]
    pub sync: Option<SyncStatus>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Shared secret incoming webhook deliveries are validated against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: SyncStatusCode,
    /// Unix time of the last completed pass, 0 before the first one
    #[serde(default)]
    pub time_check: i64,
}

#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq,
)]
pub enum SyncStatusCode {
    #[default]
    Unknown,
    Synced,
    OutOfSync,
}

impl fmt::Display for SyncStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatusCode::Unknown => "Unknown",
            SyncStatusCode::Synced => "Synced",
            SyncStatusCode::OutOfSync => "OutOfSync",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn new(r#type: &str, status: bool, reason: Option<&str>, message: Option<&str>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: reason.map(str::to_string),
            message: message.map(str::to_string),
        }
    }
}

/// Insert or replace a condition by type.
///
/// The transition time is kept when status, reason and message are unchanged.
/// Returns `true` if anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing)
            if existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message =>
        {
            false
        }
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_inserts_then_ignores_identical() {
        let mut conditions = Vec::new();
        assert!(set_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, true, None, None)
        ));
        let first_time = conditions[0].last_transition_time.clone();
        assert!(!set_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, true, None, None)
        ));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first_time);
    }

    #[test]
    fn test_set_condition_replaces_changed() {
        let mut conditions = vec![Condition::new(
            CONDITION_WEBHOOK_REGISTERED,
            true,
            None,
            None,
        )];
        assert!(set_condition(
            &mut conditions,
            Condition::new(
                CONDITION_WEBHOOK_REGISTERED,
                false,
                Some(REASON_NO_GIT_TOKEN),
                None
            )
        ));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].reason.as_deref(), Some(REASON_NO_GIT_TOKEN));
    }

    #[test]
    fn test_sync_status_serializes_camel_case() {
        let status = ApplicationStatus {
            sync: Some(SyncStatus {
                status: SyncStatusCode::OutOfSync,
                time_check: 42,
            }),
            conditions: vec![],
            secrets: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["sync"]["status"], "OutOfSync");
        assert_eq!(value["sync"]["timeCheck"], 42);
        assert!(value.get("secrets").is_none());
    }
}
