//! Pending mutations recorded while the client cannot reach the API.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::id::OperationId;
use crate::resource::ResourceKey;

/// Mutation kinds the client can queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    CreateOrder,
    UpdateOrderStatus,
    UpdateTableStatus,
    AssignWaiter,
    CreateBill,
    PayBill,
    UpdateItemStatus,
}

impl OperationType {
    /// Every operation type; a handler registry must cover all of them.
    pub const ALL: [OperationType; 7] = [
        OperationType::CreateOrder,
        OperationType::UpdateOrderStatus,
        OperationType::UpdateTableStatus,
        OperationType::AssignWaiter,
        OperationType::CreateBill,
        OperationType::PayBill,
        OperationType::UpdateItemStatus,
    ];

    /// Stable wire tag (e.g. `"UPDATE_TABLE_STATUS"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateOrder => "CREATE_ORDER",
            OperationType::UpdateOrderStatus => "UPDATE_ORDER_STATUS",
            OperationType::UpdateTableStatus => "UPDATE_TABLE_STATUS",
            OperationType::AssignWaiter => "ASSIGN_WAITER",
            OperationType::CreateBill => "CREATE_BILL",
            OperationType::PayBill => "PAY_BILL",
            OperationType::UpdateItemStatus => "UPDATE_ITEM_STATUS",
        }
    }

    /// Cached collections made stale when an operation of this type succeeds.
    pub fn affected_resources(&self) -> Vec<ResourceKey> {
        match self {
            OperationType::CreateOrder => vec![ResourceKey::Orders, ResourceKey::Tables],
            OperationType::UpdateOrderStatus | OperationType::UpdateItemStatus => {
                vec![ResourceKey::Orders]
            }
            OperationType::UpdateTableStatus | OperationType::AssignWaiter => {
                vec![ResourceKey::Tables]
            }
            OperationType::CreateBill => vec![ResourceKey::Bills, ResourceKey::Orders],
            OperationType::PayBill => {
                vec![ResourceKey::Bills, ResourceKey::Orders, ResourceKey::Tables]
            }
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unknown_operation_type(s))
    }
}

/// The type tag of a persisted operation.
///
/// Queues outlive client versions: an operation written by a newer client may
/// carry a tag this build does not know. Such tags are kept verbatim so the
/// operation survives in the queue untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    Known(OperationType),
    Unknown(String),
}

impl OperationKind {
    pub fn known(&self) -> Option<OperationType> {
        match self {
            OperationKind::Known(t) => Some(*t),
            OperationKind::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Known(t) => t.as_str(),
            OperationKind::Unknown(tag) => tag,
        }
    }
}

impl From<OperationType> for OperationKind {
    fn from(value: OperationType) -> Self {
        OperationKind::Known(value)
    }
}

impl From<String> for OperationKind {
    fn from(value: String) -> Self {
        match value.parse::<OperationType>() {
            Ok(t) => OperationKind::Known(t),
            Err(_) => OperationKind::Unknown(value),
        }
    }
}

impl From<OperationKind> for String {
    fn from(value: OperationKind) -> Self {
        match value {
            OperationKind::Known(t) => t.as_str().to_string(),
            OperationKind::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation waiting to be applied against the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    /// Failed replay attempts so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(kind: impl Into<OperationKind>, payload: Value, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: OperationId::new(),
            kind: kind.into(),
            payload,
            enqueued_at,
            attempts: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn tags_match_wire_names() {
        for t in OperationType::ALL {
            let encoded = serde_json::to_value(t).unwrap();
            assert_eq!(encoded, json!(t.as_str()));
            assert_eq!(t.as_str().parse::<OperationType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let raw = json!({
            "id": OperationId::new(),
            "type": "SPLIT_BILL",
            "payload": {"billId": "B1"},
            "enqueuedAt": "2024-05-01T12:00:00Z"
        });

        let op: PendingOperation = serde_json::from_value(raw).unwrap();
        assert_eq!(op.kind, OperationKind::Unknown("SPLIT_BILL".to_string()));
        assert_eq!(op.attempts, 0);
        assert!(op.kind.known().is_none());

        let back = serde_json::to_value(&op).unwrap();
        assert_eq!(back["type"], json!("SPLIT_BILL"));
        assert!(back.get("lastError").is_none());
    }

    #[test]
    fn persisted_layout_uses_camel_case() {
        let op = PendingOperation::new(
            OperationType::UpdateTableStatus,
            json!({"tableId": "T5", "status": "OCCUPIED"}),
            Utc::now(),
        );
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["type"], json!("UPDATE_TABLE_STATUS"));
        assert!(v.get("enqueuedAt").is_some());
        assert_eq!(v["payload"]["tableId"], json!("T5"));
    }

    #[test]
    fn every_type_invalidates_something() {
        for t in OperationType::ALL {
            assert!(!t.affected_resources().is_empty(), "{t} affects nothing");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any tag survives a store round trip unchanged, whether or
        /// not this build knows it.
        #[test]
        fn any_tag_round_trips(tag in "[A-Z_]{1,24}") {
            let kind = OperationKind::from(tag.clone());
            let encoded = serde_json::to_value(&kind).unwrap();
            prop_assert_eq!(&encoded, &json!(tag));
            let decoded: OperationKind = serde_json::from_value(encoded).unwrap();
            prop_assert_eq!(decoded, kind);
        }
    }
}
