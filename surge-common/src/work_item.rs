//! Work item shared between producers, the gate, the dispatcher and consumers.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lane a work item belongs to in a two-lane pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    Bulk,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::Bulk => "bulk",
        }
    }
}

/// A unit of generated or inbound work.
///
/// `created_at_millis` is stamped once at generation time and is the
/// authoritative timestamp for end-to-end latency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    created_at_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<Priority>,
    payload: String,
}

impl WorkItem {
    /// Create an item stamped with the current wall-clock time.
    pub fn new(priority: Option<Priority>, payload: impl Into<String>) -> Self {
        Self::with_timestamp(now_millis(), priority, payload)
    }

    pub fn with_timestamp(
        created_at_millis: i64,
        priority: Option<Priority>,
        payload: impl Into<String>,
    ) -> Self {
        Self { created_at_millis, priority, payload: payload.into() }
    }

    /// Re-label the item for a lane, keeping its creation timestamp.
    pub fn into_lane(self, priority: Priority) -> Self {
        Self { priority: Some(priority), ..self }
    }

    pub fn created_at_millis(&self) -> i64 {
        self.created_at_millis
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Milliseconds elapsed between creation and `now_ms`, floored at zero.
    pub fn age_millis(&self, now_ms: i64) -> u64 {
        now_ms.saturating_sub(self.created_at_millis).max(0) as u64
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let item = WorkItem::with_timestamp(1_700_000_000_123, Some(Priority::Urgent), "payload-1");
        let json = item.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"createdAtMillis":1700000000123,"priority":"urgent","payload":"payload-1"}"#
        );
    }

    #[test]
    fn test_priority_is_optional_on_the_wire() {
        let item = WorkItem::from_json(r#"{"createdAtMillis":5,"payload":"x"}"#).unwrap();
        assert_eq!(item.priority(), None);
        assert_eq!(item.created_at_millis(), 5);

        let json = item.to_json().unwrap();
        assert!(!json.contains("priority"), "Single-lane items omit priority: {json}");
    }

    #[test]
    fn test_into_lane_keeps_timestamp() {
        let item = WorkItem::with_timestamp(42, None, "p");
        let bulk = item.into_lane(Priority::Bulk);
        assert_eq!(bulk.created_at_millis(), 42);
        assert_eq!(bulk.priority(), Some(Priority::Bulk));
        assert_eq!(bulk.payload(), "p");
    }

    #[test]
    fn test_age_never_negative() {
        let item = WorkItem::with_timestamp(1_000, None, "p");
        assert_eq!(item.age_millis(1_250), 250);
        assert_eq!(item.age_millis(900), 0);
    }

    #[test]
    fn test_new_stamps_current_time() {
        let before = now_millis();
        let item = WorkItem::new(None, "p");
        let after = now_millis();
        assert!(item.created_at_millis() >= before && item.created_at_millis() <= after);
    }
}
