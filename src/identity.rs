use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{Action, FactionCode, Resource, Role};

/// The signed-in actor as returned by `/api/auth/me` and `/api/auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub faction: Option<FactionCode>,
    #[serde(default)]
    pub department_id: Option<String>,
}

impl Identity {
    pub fn can(&self, resource: &Resource, action: Action) -> bool {
        crate::policy::can(Some(self), resource, action)
    }
}

/// An account row from the admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub faction: Option<FactionCode>,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub two_fa_enabled: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl UserAccount {
    pub fn as_resource(&self) -> Resource {
        let mut resource = Resource::account(self.role.clone());
        resource.faction_scope = self.faction;
        resource.department_scope = self.department_id.clone();
        resource
    }
}
