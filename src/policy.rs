//! The single authorization table for the portal.
//!
//! Every screen and every mutating call asks [`can`] instead of comparing role
//! strings locally. Decisions are pure: no I/O, no caching, and a missing
//! identity (session still loading or signed out) is always a denial.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ApiError;
use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactionCode {
    Gov,
    Fsb,
    Gibdd,
    Umvd,
    Army,
    Hospital,
    Smi,
    Fsin,
}

impl FactionCode {
    pub const ALL: [FactionCode; 8] = [
        FactionCode::Gov,
        FactionCode::Fsb,
        FactionCode::Gibdd,
        FactionCode::Umvd,
        FactionCode::Army,
        FactionCode::Hospital,
        FactionCode::Smi,
        FactionCode::Fsin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactionCode::Gov => "gov",
            FactionCode::Fsb => "fsb",
            FactionCode::Gibdd => "gibdd",
            FactionCode::Umvd => "umvd",
            FactionCode::Army => "army",
            FactionCode::Hospital => "hospital",
            FactionCode::Smi => "smi",
            FactionCode::Fsin => "fsin",
        }
    }
}

impl fmt::Display for FactionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactionCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        FactionCode::ALL
            .into_iter()
            .find(|code| code.as_str() == lower)
            .ok_or_else(|| anyhow::anyhow!("Invalid faction code: {}", s))
    }
}

/// Authority tag carried on a user account.
///
/// Serialized as the backend's plain string (`"gs"`, `"leader_fsb"`, ...).
/// Strings this client does not recognise become [`Role::Unknown`] rather
/// than a decode failure, and are denied everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Developer,
    Gs,
    Zgs,
    Leader(FactionCode),
    HeadOfDepartment,
    DeputyHead,
    Unknown(String),
}

impl Role {
    /// Developer, chief overseer and deputy chief overseer.
    pub fn is_superuser(&self) -> bool {
        matches!(self, Role::Developer | Role::Gs | Role::Zgs)
    }

    /// The faction a leader role is bound to.
    pub fn leader_of(&self) -> Option<FactionCode> {
        match self {
            Role::Leader(faction) => Some(*faction),
            _ => None,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Role::Developer => "developer".to_string(),
            Role::Gs => "gs".to_string(),
            Role::Zgs => "zgs".to_string(),
            Role::Leader(faction) => format!("leader_{}", faction),
            Role::HeadOfDepartment => "head_of_department".to_string(),
            Role::DeputyHead => "deputy_head".to_string(),
            Role::Unknown(raw) => raw.clone(),
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "developer" => Role::Developer,
            "gs" => Role::Gs,
            "zgs" => Role::Zgs,
            "head_of_department" => Role::HeadOfDepartment,
            "deputy_head" => Role::DeputyHead,
            other => other
                .strip_prefix("leader_")
                .and_then(|code| code.parse::<FactionCode>().ok())
                .map(Role::Leader)
                .unwrap_or_else(|| Role::Unknown(other.to_string())),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::from(s.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Faction,
    Department,
    WeekTable,
    LectureTopic,
    TrainingTopic,
    SeniorStaffTable,
    UserAccount,
    AuditLog,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Faction,
        ResourceKind::Department,
        ResourceKind::WeekTable,
        ResourceKind::LectureTopic,
        ResourceKind::TrainingTopic,
        ResourceKind::SeniorStaffTable,
        ResourceKind::UserAccount,
        ResourceKind::AuditLog,
    ];
}

impl std::str::FromStr for ResourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "faction" => Ok(ResourceKind::Faction),
            "department" => Ok(ResourceKind::Department),
            "week_table" => Ok(ResourceKind::WeekTable),
            "lecture_topic" => Ok(ResourceKind::LectureTopic),
            "training_topic" => Ok(ResourceKind::TrainingTopic),
            "senior_staff_table" => Ok(ResourceKind::SeniorStaffTable),
            "user_account" => Ok(ResourceKind::UserAccount),
            "audit_log" => Ok(ResourceKind::AuditLog),
            _ => anyhow::bail!("Invalid resource kind: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    ManageTopics,
    ManageUsers,
    Deactivate,
    Demote,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::ManageTopics,
        Action::ManageUsers,
        Action::Deactivate,
        Action::Demote,
    ];
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "view" => Ok(Action::View),
            "create" => Ok(Action::Create),
            "edit" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            "manage_topics" => Ok(Action::ManageTopics),
            "manage_users" => Ok(Action::ManageUsers),
            "deactivate" => Ok(Action::Deactivate),
            "demote" => Ok(Action::Demote),
            _ => anyhow::bail!("Invalid action: {}", s),
        }
    }
}

/// Developer-only operations that sit outside the resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SwitchRole,
    RestoreData,
}

/// A protected entity together with the scope it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub faction_scope: Option<FactionCode>,
    pub department_scope: Option<String>,
    /// Role of the target account, for `UserAccount` resources.
    pub target_role: Option<Role>,
}

impl Resource {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            faction_scope: None,
            department_scope: None,
            target_role: None,
        }
    }

    pub fn in_faction(mut self, faction: FactionCode) -> Self {
        self.faction_scope = Some(faction);
        self
    }

    pub fn in_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_scope = Some(department_id.into());
        self
    }

    pub fn account(target_role: Role) -> Self {
        Self {
            target_role: Some(target_role),
            ..Self::new(ResourceKind::UserAccount)
        }
    }
}

/// Can `actor` perform `action` on `resource`?
pub fn can(actor: Option<&Identity>, resource: &Resource, action: Action) -> bool {
    let Some(actor) = actor else {
        return false;
    };

    if touches_protected_account(&actor.role, resource, action) {
        return false;
    }

    match &actor.role {
        Role::Developer | Role::Gs | Role::Zgs => true,
        Role::Leader(faction) => leader_can(*faction, actor, resource, action),
        Role::HeadOfDepartment => in_own_department(actor, resource) && head_can(resource.kind, action),
        Role::DeputyHead => in_own_department(actor, resource) && deputy_can(resource.kind, action),
        Role::Unknown(_) => false,
    }
}

/// Point-of-mutation guard: a denial becomes [`ApiError::AccessDenied`].
pub fn ensure(actor: Option<&Identity>, resource: &Resource, action: Action) -> Result<(), ApiError> {
    if can(actor, resource, action) {
        Ok(())
    } else {
        tracing::debug!(?resource, ?action, "policy denied action");
        Err(ApiError::AccessDenied)
    }
}

pub fn has_capability(actor: Option<&Identity>, capability: Capability) -> bool {
    match capability {
        Capability::SwitchRole | Capability::RestoreData => {
            matches!(actor.map(|a| &a.role), Some(Role::Developer))
        }
    }
}

/// Roles that must have two-factor sign-in enabled.
pub fn requires_two_factor(role: &Role) -> bool {
    role.is_superuser() || matches!(role, Role::Leader(_))
}

// Developer accounts cannot be deactivated, demoted or deleted by anyone, and
// only another developer may edit one.
fn touches_protected_account(actor_role: &Role, resource: &Resource, action: Action) -> bool {
    if resource.kind != ResourceKind::UserAccount || resource.target_role != Some(Role::Developer) {
        return false;
    }

    match action {
        Action::Delete | Action::Deactivate | Action::Demote => true,
        Action::Edit => *actor_role != Role::Developer,
        _ => false,
    }
}

// The role's faction and the profile's faction must both match the resource.
fn leader_can(faction: FactionCode, actor: &Identity, resource: &Resource, action: Action) -> bool {
    if resource.faction_scope != Some(faction) || actor.faction != Some(faction) {
        return false;
    }

    match resource.kind {
        ResourceKind::Faction => action == Action::View,
        ResourceKind::Department | ResourceKind::SeniorStaffTable => {
            matches!(action, Action::View | Action::Create | Action::Edit | Action::Delete)
        }
        ResourceKind::LectureTopic | ResourceKind::TrainingTopic => matches!(
            action,
            Action::View | Action::Create | Action::Edit | Action::Delete | Action::ManageTopics
        ),
        ResourceKind::WeekTable => matches!(action, Action::View | Action::Edit),
        ResourceKind::UserAccount | ResourceKind::AuditLog => false,
    }
}

fn head_can(kind: ResourceKind, action: Action) -> bool {
    match kind {
        ResourceKind::WeekTable => matches!(action, Action::View | Action::Edit | Action::ManageTopics),
        ResourceKind::Department => matches!(action, Action::View | Action::ManageTopics),
        ResourceKind::LectureTopic | ResourceKind::TrainingTopic => action == Action::View,
        _ => false,
    }
}

fn deputy_can(kind: ResourceKind, action: Action) -> bool {
    match kind {
        ResourceKind::WeekTable => matches!(action, Action::View | Action::Edit),
        ResourceKind::Department => action == Action::View,
        _ => false,
    }
}

fn in_own_department(actor: &Identity, resource: &Resource) -> bool {
    match (&actor.department_id, &resource.department_scope) {
        (Some(own), Some(scope)) => own == scope,
        _ => false,
    }
}
