//! Core domain types for the generation job store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured record recovered from backend output (always a JSON object).
pub type Record = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ItemStatus / ItemState
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item, as written in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status together with the data that status requires.
///
/// A completed item always carries its payload and a failed item always
/// carries its last diagnostic; a pending item carries neither.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Pending,
    Completed { payload: Record },
    Failed { last_error: String },
}

impl ItemState {
    pub fn status(&self) -> ItemStatus {
        match self {
            Self::Pending => ItemStatus::Pending,
            Self::Completed { .. } => ItemStatus::Completed,
            Self::Failed { .. } => ItemStatus::Failed,
        }
    }

    pub fn payload(&self) -> Option<&Record> {
        match self {
            Self::Completed { payload } => Some(payload),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::Failed { last_error } => Some(last_error),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

// ---------------------------------------------------------------------------
// ItemEntry (on-disk item) / WorkItem (in-memory view)
// ---------------------------------------------------------------------------

/// One entry of the `items` map in the durable store. The id is the map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEntry", into = "RawEntry")]
pub struct ItemEntry {
    /// Ordering attribute (grade level).
    pub group: u32,
    pub state: ItemState,
}

impl ItemEntry {
    /// A fresh pending entry.
    pub fn pending(group: u32) -> Self {
        Self {
            group,
            state: ItemState::Pending,
        }
    }

    /// Attach the id to produce an owned [`WorkItem`].
    pub fn to_work_item(&self, id: &str) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            group: self.group,
            state: self.state.clone(),
        }
    }
}

/// Wire shape of an item: flat status plus optional payload/error.
#[derive(Serialize, Deserialize)]
struct RawEntry {
    group: u32,
    status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl TryFrom<RawEntry> for ItemEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> std::result::Result<Self, Self::Error> {
        let state = match (raw.status, raw.payload, raw.last_error) {
            (ItemStatus::Pending, None, None) => ItemState::Pending,
            (ItemStatus::Completed, Some(payload), None) => ItemState::Completed { payload },
            (ItemStatus::Failed, None, Some(last_error)) => ItemState::Failed { last_error },
            (status, payload, last_error) => {
                return Err(format!(
                    "item with status `{status}` has payload={} last_error={}",
                    payload.is_some(),
                    last_error.is_some()
                ));
            }
        };
        Ok(Self {
            group: raw.group,
            state,
        })
    }
}

impl From<ItemEntry> for RawEntry {
    fn from(entry: ItemEntry) -> Self {
        let status = entry.state.status();
        let (payload, last_error) = match entry.state {
            ItemState::Pending => (None, None),
            ItemState::Completed { payload } => (Some(payload), None),
            ItemState::Failed { last_error } => (None, Some(last_error)),
        };
        Self {
            group: entry.group,
            status,
            payload,
            last_error,
        }
    }
}

/// One unit of generation work, keyed by a stable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Stable key (a single character).
    pub id: String,
    /// Grade level; only affects processing order.
    pub group: u32,
    pub state: ItemState,
}

// ---------------------------------------------------------------------------
// StoreMeta
// ---------------------------------------------------------------------------

/// Run-level metadata stored next to the items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Number of items in the store.
    pub total: usize,
    /// Number of items whose status is `completed`.
    pub completed: usize,
    /// Time of the most recent durable write.
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ItemStatus::Completed).unwrap();
        assert_eq!(json, r#""completed""#);
        assert_eq!(ItemStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn pending_entry_omits_payload_and_error() {
        let json = serde_json::to_string(&ItemEntry::pending(2)).unwrap();
        assert_eq!(json, r#"{"group":2,"status":"pending"}"#);
    }

    #[test]
    fn completed_entry_roundtrip() {
        let mut payload = Record::new();
        payload.insert("kanji".into(), json!("日"));
        let entry = ItemEntry {
            group: 1,
            state: ItemState::Completed { payload },
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""status":"completed""#));
        let parsed: ItemEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn failed_entry_requires_last_error() {
        let err = serde_json::from_str::<ItemEntry>(r#"{"group":1,"status":"failed"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("status `failed`"));
    }

    #[test]
    fn completed_entry_requires_payload() {
        let result =
            serde_json::from_str::<ItemEntry>(r#"{"group":1,"status":"completed"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let result =
            serde_json::from_str::<ItemEntry>(r#"{"group":1,"status":"running"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn state_accessors() {
        let failed = ItemState::Failed {
            last_error: "timeout_after=5s".into(),
        };
        assert_eq!(failed.status(), ItemStatus::Failed);
        assert_eq!(failed.last_error(), Some("timeout_after=5s"));
        assert!(failed.payload().is_none());
        assert!(!failed.is_completed());
    }
}
