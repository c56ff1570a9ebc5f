use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, sqlite::SqliteRow};

use crate::error::AppError;

/// Role names as stored on the user row. Kept as plain text rather than a
/// closed enum: the unit-head classifier matches on the role *name* (see
/// `tier::is_unit_head`), and the identity provider owns the value.
pub mod role {
    pub const ECONOMIST: &str = "economist";
    pub const SENIOR_ECONOMIST: &str = "senior_economist";
    pub const PRINCIPAL_ECONOMIST: &str = "principal_economist";
    pub const ASSISTANT_COMMISSIONER: &str = "assistant_commissioner";
    pub const COMMISSIONER: &str = "commissioner";
    pub const SUPER_ADMIN: &str = "super_admin";
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub phone_number: String,
    pub role: String,
    pub designation: String,
    pub department_id: Option<String>,
    pub department_unit_id: Option<String>,
    pub is_active: bool,
}

impl User {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone_number: row.try_get("phone_number")?,
            role: row.try_get("role")?,
            designation: row.try_get("designation")?,
            department_id: row.try_get("department_id")?,
            department_unit_id: row.try_get("department_unit_id")?,
            is_active: row.try_get("is_active")?,
        })
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn is_commissioner(&self) -> bool {
        self.role == role::COMMISSIONER
    }

    pub fn is_assistant_commissioner(&self) -> bool {
        self.role == role::ASSISTANT_COMMISSIONER
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == role::SUPER_ADMIN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Open,
    InProgress,
    PendingApproval,
    Closed,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Open => "open",
            LogStatus::InProgress => "in_progress",
            LogStatus::PendingApproval => "pending_approval",
            LogStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "open" => Ok(LogStatus::Open),
            "in_progress" => Ok(LogStatus::InProgress),
            "pending_approval" => Ok(LogStatus::PendingApproval),
            "closed" => Ok(LogStatus::Closed),
            other => Err(AppError::validation(format!("unknown status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureStage {
    None,
    UnitHead,
    AssistantCommissioner,
    Commissioner,
    Closed,
    Rejected,
}

impl ClosureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ClosureStage::None => "none",
            ClosureStage::UnitHead => "unit_head",
            ClosureStage::AssistantCommissioner => "assistant_commissioner",
            ClosureStage::Commissioner => "commissioner",
            ClosureStage::Closed => "closed",
            ClosureStage::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "none" => Ok(ClosureStage::None),
            "unit_head" => Ok(ClosureStage::UnitHead),
            "assistant_commissioner" => Ok(ClosureStage::AssistantCommissioner),
            "commissioner" => Ok(ClosureStage::Commissioner),
            "closed" => Ok(ClosureStage::Closed),
            "rejected" => Ok(ClosureStage::Rejected),
            other => Err(AppError::validation(format!("unknown closure stage: {other}"))),
        }
    }

    pub fn is_approval_stage(self) -> bool {
        matches!(
            self,
            ClosureStage::UnitHead | ClosureStage::AssistantCommissioner | ClosureStage::Commissioner
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationReason {
    Leave,
    Other,
}

impl DelegationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DelegationReason::Leave => "leave",
            DelegationReason::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "leave" => Ok(DelegationReason::Leave),
            "other" => Ok(DelegationReason::Other),
            other => Err(AppError::validation(format!("unknown delegation reason: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Delegation {
    pub id: String,
    pub delegated_by: String,
    pub delegated_to: String,
    pub reason: DelegationReason,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub delegated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Delegation {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        let reason: String = row.try_get("reason")?;
        Ok(Self {
            id: row.try_get("id")?,
            delegated_by: row.try_get("delegated_by")?,
            delegated_to: row.try_get("delegated_to")?,
            reason: DelegationReason::parse(&reason)?,
            expires_at: row.try_get("expires_at")?,
            is_active: row.try_get("is_active")?,
            delegated_at: row.try_get("delegated_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }

    /// The authoritative activity answer. The stored flag alone is never
    /// trusted: an expired delegation is invalid even before a sweep runs.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    pub fn is_expiring_soon(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => self.is_valid(now) && at - now <= Duration::hours(24),
            None => false,
        }
    }

    /// Who really holds the grantor's approval authority for this record:
    /// the grantee while a leave delegation is live, the grantor otherwise.
    pub fn effective_approver(&self, now: DateTime<Utc>) -> &str {
        if self.reason == DelegationReason::Leave && self.is_valid(now) {
            &self.delegated_to
        } else {
            &self.delegated_by
        }
    }
}

// --- request/response payloads ---

#[derive(Debug, Deserialize)]
pub struct CreateActionLogRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_to: Vec<String>,
    #[serde(default)]
    pub team_leader: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateActionLogRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<LogStatus>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_to: Option<Vec<String>>,
    #[serde(default)]
    pub team_leader: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalActionRequest {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionLogResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub department_id: Option<String>,
    pub created_by: String,
    pub status: LogStatus,
    pub priority: String,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Vec<String>,
    pub team_leader: Option<String>,
    pub closure_approval_stage: ClosureStage,
    pub closure_requested_by: Option<String>,
    pub original_assigner: Option<String>,
    pub can_approve: bool,
    pub effective_approver: Option<String>,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDelegationRequest {
    #[serde(default)]
    pub delegated_by: Option<String>,
    pub delegated_to: String,
    pub reason: DelegationReason,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct DelegationResponse {
    pub id: String,
    pub delegated_by: String,
    pub delegated_to: String,
    pub reason: DelegationReason,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_valid: bool,
    pub is_expiring_soon: bool,
    pub effective_approver: String,
    pub delegated_at: DateTime<Utc>,
}

impl DelegationResponse {
    pub fn from_delegation(delegation: &Delegation, now: DateTime<Utc>) -> Self {
        Self {
            id: delegation.id.clone(),
            delegated_by: delegation.delegated_by.clone(),
            delegated_to: delegation.delegated_to.clone(),
            reason: delegation.reason,
            expires_at: delegation.expires_at,
            is_active: delegation.is_active,
            is_valid: delegation.is_valid(now),
            is_expiring_soon: delegation.is_expiring_soon(now),
            effective_approver: delegation.effective_approver(now).to_string(),
            delegated_at: delegation.delegated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub comment: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: String,
    pub action_log_id: String,
    pub user_id: String,
    pub comment: String,
    pub status: Option<String>,
    pub is_approved: bool,
    pub is_viewed: bool,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentHistoryResponse {
    pub id: String,
    pub action_log_id: String,
    pub assigned_by: String,
    pub assigned_to: Vec<String>,
    pub assigned_at: DateTime<Utc>,
    pub comment: Option<String>,
}
