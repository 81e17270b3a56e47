//! REST collaborator client.
//!
//! Payloads are passed through as JSON values: screens pick out what they
//! need. The only typed rows are the ones the client itself must inspect.

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ApiError;
use crate::identity::UserAccount;
use crate::policy::{self, Action, FactionCode};
use crate::session::{error_detail, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Lecture,
    Training,
}

impl TopicKind {
    fn segment(&self) -> &'static str {
        match self {
            TopicKind::Lecture => "lectures",
            TopicKind::Training => "trainings",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditQuery {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub user_id: Option<String>,
    pub resource_type: Option<String>,
    pub action: Option<String>,
}

impl AuditQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(ref user_id) = self.user_id {
            pairs.push(("user_id", user_id.clone()));
        }
        if let Some(ref resource_type) = self.resource_type {
            pairs.push(("resource_type", resource_type.clone()));
        }
        if let Some(ref action) = self.action {
            pairs.push(("action", action.clone()));
        }
        pairs
    }
}

#[derive(Clone)]
pub struct PortalClient {
    session: Arc<Session>,
}

impl PortalClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, path, &[], None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::DELETE, path, &[], None).await
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let response = self.session.send(method, path, query, body).await?;
        let status = response.status();

        match status {
            s if s.is_success() => {
                let bytes = response.bytes().await?;
                if bytes.is_empty() {
                    return Ok(Value::Null);
                }
                Ok(serde_json::from_slice(&bytes)?)
            }
            StatusCode::FORBIDDEN => {
                tracing::info!(path, "backend denied access");
                Err(ApiError::AccessDenied)
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            _ => {
                let detail = error_detail(response).await;
                Err(ApiError::Status { status, detail })
            }
        }
    }

    pub async fn factions(&self) -> Result<Value, ApiError> {
        self.get("/api/factions").await
    }

    pub async fn faction(&self, code: FactionCode) -> Result<Value, ApiError> {
        self.get(&format!("/api/factions/{}", code)).await
    }

    pub async fn department(&self, department_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/api/departments/{}", department_id)).await
    }

    pub async fn departments(&self, faction: FactionCode) -> Result<Value, ApiError> {
        self.get(&format!("/api/departments/faction/{}", faction)).await
    }

    pub async fn create_department(&self, faction: FactionCode, body: &Value) -> Result<Value, ApiError> {
        self.post(&format!("/api/departments/faction/{}", faction), body).await
    }

    pub async fn update_department(&self, department_id: &str, body: &Value) -> Result<Value, ApiError> {
        self.put(&format!("/api/departments/{}", department_id), body).await
    }

    pub async fn delete_department(&self, department_id: &str) -> Result<Value, ApiError> {
        self.delete(&format!("/api/departments/{}", department_id)).await
    }

    pub async fn weeks(&self, department_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/api/weeks/department/{}", department_id)).await
    }

    pub async fn current_week(&self, department_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/api/weeks/department/{}/current", department_id)).await
    }

    pub async fn table_data(&self, week_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/api/weeks/{}/table-data", week_id)).await
    }

    pub async fn update_table_data(&self, week_id: &str, body: &Value) -> Result<Value, ApiError> {
        self.put(&format!("/api/weeks/{}/table-data", week_id), body).await
    }

    pub async fn topics(&self, kind: TopicKind, faction: FactionCode) -> Result<Value, ApiError> {
        self.get(&format!("/api/topics/{}/faction/{}", kind.segment(), faction)).await
    }

    pub async fn create_topic(&self, kind: TopicKind, faction: FactionCode, body: &Value) -> Result<Value, ApiError> {
        self.post(&format!("/api/topics/{}/faction/{}", kind.segment(), faction), body)
            .await
    }

    pub async fn delete_topic(&self, kind: TopicKind, topic_id: &str) -> Result<Value, ApiError> {
        self.delete(&format!("/api/topics/{}/{}", kind.segment(), topic_id)).await
    }

    pub async fn senior_staff(&self, faction: FactionCode) -> Result<Value, ApiError> {
        self.get(&format!("/api/senior-staff/faction/{}", faction)).await
    }

    pub async fn update_senior_staff(&self, faction: FactionCode, body: &Value) -> Result<Value, ApiError> {
        self.put(&format!("/api/senior-staff/faction/{}", faction), body).await
    }

    pub async fn audit_logs(&self, query: &AuditQuery) -> Result<Value, ApiError> {
        self.call(Method::GET, "/api/audit/logs", &query.pairs(), None).await
    }

    pub async fn notifications(&self, unread_only: bool) -> Result<Value, ApiError> {
        self.call(
            Method::GET,
            "/api/notifications",
            &[("unread_only", unread_only.to_string())],
            None,
        )
        .await
    }

    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<Value, ApiError> {
        self.post(&format!("/api/notifications/{}/read", notification_id), &Value::Null)
            .await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<Value, ApiError> {
        self.post("/api/notifications/read-all", &Value::Null).await
    }

    pub async fn users(&self) -> Result<Vec<UserAccount>, ApiError> {
        let value = self.get("/api/admin/users").await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn update_user(&self, account: &UserAccount, body: &Value) -> Result<Value, ApiError> {
        let actor = self.session.current_identity();
        let resource = account.as_resource();

        policy::ensure(actor.as_ref(), &resource, Action::Edit)?;

        let new_role = body.get("role").and_then(Value::as_str);
        if new_role.is_some_and(|role| role != account.role.as_string()) {
            policy::ensure(actor.as_ref(), &resource, Action::Demote)?;
        }

        if body.get("is_active").and_then(Value::as_bool) == Some(false) {
            policy::ensure(actor.as_ref(), &resource, Action::Deactivate)?;
        }

        self.put(&format!("/api/admin/users/{}", account.id), body).await
    }

    /// Deactivates an account. Developer accounts are refused locally before
    /// any request is sent.
    pub async fn deactivate_user(&self, account: &UserAccount) -> Result<Value, ApiError> {
        let actor = self.session.current_identity();
        policy::ensure(actor.as_ref(), &account.as_resource(), Action::Deactivate)?;

        self.delete(&format!("/api/admin/users/{}", account.id)).await
    }

    pub async fn activate_user(&self, account: &UserAccount) -> Result<Value, ApiError> {
        let actor = self.session.current_identity();
        policy::ensure(actor.as_ref(), &account.as_resource(), Action::ManageUsers)?;

        self.post(&format!("/api/admin/users/{}/activate", account.id), &Value::Null)
            .await
    }
}
