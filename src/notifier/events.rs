//! Live-update wire protocol.
//!
//! A frame is one named event with a JSON payload. How frames travel is up
//! to the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NotifierError;
use crate::identity::Identity;
use crate::policy::{FactionCode, ResourceKind};

pub const AUTHENTICATE: &str = "authenticate";
pub const JOIN_DEPARTMENT: &str = "join_department";
pub const LEAVE_DEPARTMENT: &str = "leave_department";

pub const AUTHENTICATED: &str = "authenticated";
pub const TABLE_UPDATED: &str = "table_updated";
pub const STRUCTURE_CHANGED: &str = "structure_changed";
pub const NOTIFICATION: &str = "notification";
pub const ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Authenticate {
        user_id: String,
        faction: Option<FactionCode>,
    },
    JoinDepartment {
        department_id: String,
    },
    LeaveDepartment {
        department_id: String,
    },
}

impl Outbound {
    pub fn authenticate(identity: &Identity) -> Self {
        Outbound::Authenticate {
            user_id: identity.id.clone(),
            faction: identity.faction,
        }
    }

    pub fn into_frame(self) -> Frame {
        match self {
            Outbound::Authenticate { user_id, faction } => Frame::new(
                AUTHENTICATE,
                serde_json::json!({ "user_id": user_id, "faction": faction }),
            ),
            Outbound::JoinDepartment { department_id } => Frame::new(
                JOIN_DEPARTMENT,
                serde_json::json!({ "department_id": department_id }),
            ),
            Outbound::LeaveDepartment { department_id } => Frame::new(
                LEAVE_DEPARTMENT,
                serde_json::json!({ "department_id": department_id }),
            ),
        }
    }
}

/// A hint that something in a department changed.
///
/// Carries no data: the only correct reaction is to re-fetch. Delivery is
/// at-most-once and unordered, with no deduplication identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub resource_kind: ResourceKind,
    pub department_id: String,
    pub week_id: Option<String>,
    pub updated_by: String,
    pub updated_by_id: Option<String>,
    /// Local receipt time.
    pub timestamp: DateTime<Utc>,
}

impl ChangeNotification {
    /// Whether the local actor caused this change.
    ///
    /// Compares the stable actor id when the backend sends one, otherwise the
    /// display name. Name matching can miss (renames) or collide (namesakes).
    pub fn is_from(&self, identity: &Identity) -> bool {
        match &self.updated_by_id {
            Some(id) => *id == identity.id,
            None => self.updated_by == identity.full_name,
        }
    }
}

#[derive(Deserialize)]
struct ChangePayload {
    department_id: String,
    #[serde(default)]
    week_id: Option<String>,
    #[serde(default)]
    updated_by: String,
    #[serde(default)]
    updated_by_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Authenticated { user_id: Option<String> },
    TableUpdated(ChangeNotification),
    StructureChanged(ChangeNotification),
    Notification(Value),
    Error { message: String },
    Other(Frame),
}

impl Inbound {
    pub fn from_frame(frame: Frame) -> Result<Self, NotifierError> {
        let inbound = match frame.event.as_str() {
            AUTHENTICATED => Inbound::Authenticated {
                user_id: frame
                    .data
                    .get("user_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            TABLE_UPDATED => Inbound::TableUpdated(change(ResourceKind::WeekTable, frame.data)?),
            STRUCTURE_CHANGED => Inbound::StructureChanged(change(ResourceKind::Department, frame.data)?),
            NOTIFICATION => Inbound::Notification(frame.data),
            ERROR => Inbound::Error {
                message: frame
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            _ => Inbound::Other(frame),
        };

        Ok(inbound)
    }

    pub fn event_name(&self) -> &str {
        match self {
            Inbound::Authenticated { .. } => AUTHENTICATED,
            Inbound::TableUpdated(_) => TABLE_UPDATED,
            Inbound::StructureChanged(_) => STRUCTURE_CHANGED,
            Inbound::Notification(_) => NOTIFICATION,
            Inbound::Error { .. } => ERROR,
            Inbound::Other(frame) => &frame.event,
        }
    }

    pub fn change(&self) -> Option<&ChangeNotification> {
        match self {
            Inbound::TableUpdated(change) | Inbound::StructureChanged(change) => Some(change),
            _ => None,
        }
    }
}

fn change(resource_kind: ResourceKind, data: Value) -> Result<ChangeNotification, NotifierError> {
    let payload: ChangePayload =
        serde_json::from_value(data).map_err(|e| NotifierError::Protocol(e.to_string()))?;

    Ok(ChangeNotification {
        resource_kind,
        department_id: payload.department_id,
        week_id: payload.week_id,
        updated_by: payload.updated_by,
        updated_by_id: payload.updated_by_id,
        timestamp: Utc::now(),
    })
}
