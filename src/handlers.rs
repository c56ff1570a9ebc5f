//! HTTP surface. Handlers stay thin: parse, authorize, delegate to the
//! workflow/delegation modules, shape the response. The caller's identity
//! arrives in `x-user-id`, stamped by the auth gateway in front of us.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::warn;

use crate::{
    authority,
    db::{fetch_user, new_id, utc_now},
    delegation,
    error::AppError,
    models::{
        ActionLogResponse, ApprovalActionRequest, AssignmentHistoryResponse, ClosureStage,
        CommentResponse, CreateActionLogRequest, CreateCommentRequest, CreateDelegationRequest,
        DelegationResponse, LogStatus, UpdateActionLogRequest, User,
    },
    notify,
    state::AppState,
    tier, workflow,
};

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/action-logs", post(create_action_log).get(list_action_logs))
        .route(
            "/action-logs/:id",
            get(get_action_log).patch(update_action_log),
        )
        .route("/action-logs/:id/approve", post(approve_action_log))
        .route("/action-logs/:id/reject", post(reject_action_log))
        .route(
            "/action-logs/:id/comments",
            get(list_comments).post(create_comment),
        )
        .route("/action-logs/:id/comments/mark-viewed", post(mark_comments_viewed))
        .route("/action-logs/:id/assignment-history", get(assignment_history))
        .route("/action-logs/:id/notifications/unread", get(unread_notifications))
        .route(
            "/action-logs/:id/notifications/mark-read",
            post(mark_notifications_read),
        )
        .route("/delegations", post(create_delegation).get(list_delegations))
        .route("/delegations/:id", axum::routing::delete(delete_delegation))
        .route("/delegations/:id/revoke", post(revoke_delegation))
        .route("/delegations/sweep", post(sweep_delegations));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/v1", v1)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Result<&'static str, AppError> {
    sqlx::query("SELECT 1").execute(&state.db).await?;
    Ok("ok")
}

/// Resolve the acting user from `x-user-id`. Unknown or deactivated users
/// are rejected the same way as a missing header.
async fn require_actor(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing x-user-id header".to_string()))?;

    let user = fetch_user(&state.db, user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("unknown user".to_string()))?;

    if !user.is_active {
        return Err(AppError::Unauthorized("user is deactivated".to_string()));
    }

    Ok(user)
}

// --- action logs ---

struct ActionLogRecord {
    id: String,
    title: String,
    description: String,
    department_id: Option<String>,
    created_by: String,
    status: LogStatus,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    team_leader: Option<String>,
    closure_approval_stage: ClosureStage,
    closure_requested_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ActionLogRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        let status: String = row.try_get("status")?;
        let stage: String = row.try_get("closure_approval_stage")?;
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            department_id: row.try_get("department_id")?,
            created_by: row.try_get("created_by")?,
            status: LogStatus::parse(&status)?,
            priority: row.try_get("priority")?,
            due_date: row.try_get("due_date")?,
            team_leader: row.try_get("team_leader")?,
            closure_approval_stage: ClosureStage::parse(&stage)?,
            closure_requested_by: row.try_get("closure_requested_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

async fn load_log(pool: &SqlitePool, id: &str) -> Result<ActionLogRecord, AppError> {
    let row = sqlx::query("SELECT * FROM action_logs WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("action log {id} not found")))?;
    ActionLogRecord::from_row(&row)
}

async fn log_assignees(pool: &SqlitePool, log_id: &str) -> Result<Vec<String>, AppError> {
    Ok(sqlx::query_scalar(
        "SELECT user_id FROM action_log_assignees WHERE action_log_id = ?1 ORDER BY position",
    )
    .bind(log_id)
    .fetch_all(pool)
    .await?)
}

async fn build_response(
    pool: &SqlitePool,
    record: ActionLogRecord,
    viewer: &User,
) -> Result<ActionLogResponse, AppError> {
    let assigned_to = log_assignees(pool, &record.id).await?;
    let original_assigner = workflow::original_assigner(pool, &record.id)
        .await?
        .map(|user| user.id);
    let comment_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE action_log_id = ?1")
            .bind(&record.id)
            .fetch_one(pool)
            .await?;
    let now = utc_now();
    let can_approve = authority::can_approve(pool, viewer, now).await?;
    let effective_approver = authority::current_effective_approver(pool, viewer, now).await?;

    Ok(ActionLogResponse {
        id: record.id,
        title: record.title,
        description: record.description,
        department_id: record.department_id,
        created_by: record.created_by,
        status: record.status,
        priority: record.priority,
        due_date: record.due_date,
        assigned_to,
        team_leader: record.team_leader,
        closure_approval_stage: record.closure_approval_stage,
        closure_requested_by: record.closure_requested_by,
        original_assigner,
        can_approve,
        effective_approver,
        comment_count,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

/// View access: org-wide roles, same department, assignee, or creator.
async fn can_view(pool: &SqlitePool, record: &ActionLogRecord, user: &User) -> Result<bool, AppError> {
    if user.is_commissioner() || user.is_super_admin() || record.created_by == user.id {
        return Ok(true);
    }
    if record.department_id.is_some() && record.department_id == user.department_id {
        return Ok(true);
    }
    Ok(log_assignees(pool, &record.id).await?.contains(&user.id))
}

/// Team leader must be one of the assignees; with two or more assignees and
/// no leader supplied, the first assignee leads by default.
fn resolve_team_leader(
    requested: Option<&String>,
    assignees: &[String],
) -> Result<Option<String>, AppError> {
    match requested {
        Some(leader) => {
            if !assignees.contains(leader) {
                return Err(AppError::Validation(
                    "team leader must be one of the assignees".to_string(),
                ));
            }
            Ok(Some(leader.clone()))
        }
        None if assignees.len() >= 2 => Ok(Some(assignees[0].clone())),
        None => Ok(None),
    }
}

async fn create_action_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateActionLogRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let now = utc_now();

    if request.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if let Some(due) = request.due_date {
        if due < now {
            return Err(AppError::Validation("due date cannot be in the past".to_string()));
        }
    }
    for assignee_id in &request.assigned_to {
        if fetch_user(&state.db, assignee_id).await?.is_none() {
            return Err(AppError::Validation(format!("unknown assignee: {assignee_id}")));
        }
    }
    let team_leader = resolve_team_leader(request.team_leader.as_ref(), &request.assigned_to)?;

    let log_id = new_id("alg");
    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO action_logs (
          id, title, description, department_id, created_by, status, priority,
          due_date, team_leader, closure_approval_stage, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6, ?7, ?8, 'none', ?9, ?9)
        "#,
    )
    .bind(&log_id)
    .bind(request.title.trim())
    .bind(&request.description)
    .bind(request.department_id.as_deref().or(actor.department_id.as_deref()))
    .bind(&actor.id)
    .bind(request.priority.as_deref().unwrap_or("Medium"))
    .bind(request.due_date)
    .bind(&team_leader)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (position, user_id) in request.assigned_to.iter().enumerate() {
        sqlx::query(
            "INSERT INTO action_log_assignees (action_log_id, user_id, position) VALUES (?1, ?2, ?3)",
        )
        .bind(&log_id)
        .bind(user_id)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }

    if !request.assigned_to.is_empty() {
        workflow::record_assignment(&mut tx, &log_id, &actor.id, &request.assigned_to, None, now)
            .await?;
    }

    tx.commit().await?;

    if !request.assigned_to.is_empty() {
        let due = request.due_date.map(|d| d.format("%Y-%m-%d").to_string());
        if let Err(err) = notify::notify_assignment(
            &state.db,
            &state.notifier,
            &actor,
            &request.assigned_to,
            request.title.trim(),
            due.as_deref(),
        )
        .await
        {
            warn!(log_id = %log_id, error = %err, "assignment notification failed");
        }
    }

    let record = load_log(&state.db, &log_id).await?;
    let response = build_response(&state.db, record, &actor).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_action_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ActionLogResponse>>, AppError> {
    let actor = require_actor(&state, &headers).await?;

    let rows = if actor.is_commissioner() || actor.is_super_admin() {
        sqlx::query("SELECT * FROM action_logs ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?
    } else if tier::is_unit_head(&actor) {
        // Unit heads additionally see tickets queued for their stage whose
        // first assignee sits in their unit.
        sqlx::query(
            r#"
            SELECT DISTINCT l.* FROM action_logs l
            LEFT JOIN action_log_assignees a ON a.action_log_id = l.id
            LEFT JOIN action_log_assignees fa ON fa.action_log_id = l.id AND fa.position = 0
            LEFT JOIN users fu ON fu.id = fa.user_id
            WHERE l.created_by = ?1
               OR a.user_id = ?1
               OR (l.department_id IS NOT NULL AND l.department_id = ?2)
               OR (l.closure_approval_stage = 'unit_head'
                   AND fu.department_unit_id IS NOT NULL
                   AND fu.department_unit_id = ?3)
            ORDER BY l.created_at DESC
            "#,
        )
        .bind(&actor.id)
        .bind(&actor.department_id)
        .bind(&actor.department_unit_id)
        .fetch_all(&state.db)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT DISTINCT l.* FROM action_logs l
            LEFT JOIN action_log_assignees a ON a.action_log_id = l.id
            WHERE l.created_by = ?1
               OR a.user_id = ?1
               OR (l.department_id IS NOT NULL AND l.department_id = ?2)
            ORDER BY l.created_at DESC
            "#,
        )
        .bind(&actor.id)
        .bind(&actor.department_id)
        .fetch_all(&state.db)
        .await?
    };

    let mut responses = Vec::with_capacity(rows.len());
    for row in &rows {
        let record = ActionLogRecord::from_row(row)?;
        responses.push(build_response(&state.db, record, &actor).await?);
    }
    Ok(Json(responses))
}

async fn get_action_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ActionLogResponse>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let record = load_log(&state.db, &id).await?;

    if !can_view(&state.db, &record, &actor).await? {
        return Err(AppError::Forbidden(
            "you don't have access to this action log".to_string(),
        ));
    }

    Ok(Json(build_response(&state.db, record, &actor).await?))
}

async fn update_action_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateActionLogRequest>,
) -> Result<Json<ActionLogResponse>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let record = load_log(&state.db, &id).await?;

    if !can_view(&state.db, &record, &actor).await? {
        return Err(AppError::Forbidden(
            "you don't have access to this action log".to_string(),
        ));
    }
    if record.status == LogStatus::Closed {
        return Err(AppError::Conflict("action log is already closed".to_string()));
    }

    let now = utc_now();
    let mut reassigned: Option<Vec<String>> = None;

    let mut tx = state.db.begin().await?;

    if let Some(title) = request.title.as_deref() {
        if title.trim().is_empty() {
            return Err(AppError::Validation("title is required".to_string()));
        }
        sqlx::query("UPDATE action_logs SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title.trim())
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(description) = request.description.as_deref() {
        sqlx::query("UPDATE action_logs SET description = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(description)
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(priority) = request.priority.as_deref() {
        sqlx::query("UPDATE action_logs SET priority = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(priority)
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(due) = request.due_date {
        sqlx::query("UPDATE action_logs SET due_date = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(due)
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(assignees) = request.assigned_to.as_ref() {
        for assignee_id in assignees {
            if fetch_user(&state.db, assignee_id).await?.is_none() {
                return Err(AppError::Validation(format!("unknown assignee: {assignee_id}")));
            }
        }
        let team_leader = resolve_team_leader(request.team_leader.as_ref(), assignees)?;

        sqlx::query("DELETE FROM action_log_assignees WHERE action_log_id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        for (position, user_id) in assignees.iter().enumerate() {
            sqlx::query(
                "INSERT INTO action_log_assignees (action_log_id, user_id, position) VALUES (?1, ?2, ?3)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE action_logs SET team_leader = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&team_leader)
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        workflow::record_assignment(
            &mut tx,
            &id,
            &actor.id,
            assignees,
            request.comment.as_deref(),
            now,
        )
        .await?;
        reassigned = Some(assignees.clone());
    } else if let Some(leader) = request.team_leader.as_ref() {
        let current = log_assignees(&state.db, &id).await?;
        if !current.contains(leader) {
            return Err(AppError::Validation(
                "team leader must be one of the assignees".to_string(),
            ));
        }
        sqlx::query("UPDATE action_logs SET team_leader = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(leader)
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }

    // A requested close never lands directly: it enters the approval chain.
    let mut post_status = record.status;
    match request.status {
        Some(LogStatus::Closed) => {
            workflow::begin_closure(&mut tx, &id, &actor, now).await?;
            post_status = LogStatus::PendingApproval;
        }
        // pending_approval always carries an approval stage; it can only be
        // entered through the closure workflow.
        Some(LogStatus::PendingApproval) => {
            return Err(AppError::Validation(
                "status pending_approval is entered by requesting closure".to_string(),
            ));
        }
        Some(status) => {
            sqlx::query(
                "UPDATE action_logs SET status = ?1, closure_approval_stage = 'none', updated_at = ?2 WHERE id = ?3",
            )
            .bind(status.as_str())
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
            post_status = status;
        }
        None => {}
    }

    if let Some(body) = request.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        sqlx::query(
            r#"
            INSERT INTO comments (id, action_log_id, user_id, body, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(new_id("cmt"))
        .bind(&id)
        .bind(&actor.id)
        .bind(body)
        .bind(post_status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    if let Some(assignees) = reassigned {
        let due = request.due_date.or(record.due_date).map(|d| d.format("%Y-%m-%d").to_string());
        let title = request.title.as_deref().unwrap_or(&record.title);
        if let Err(err) = notify::notify_assignment(
            &state.db,
            &state.notifier,
            &actor,
            &assignees,
            title,
            due.as_deref(),
        )
        .await
        {
            warn!(log_id = %id, error = %err, "assignment notification failed");
        }
    }

    let record = load_log(&state.db, &id).await?;
    Ok(Json(build_response(&state.db, record, &actor).await?))
}

async fn approve_action_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ApprovalActionRequest>,
) -> Result<Json<ActionLogResponse>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    workflow::approve(&state.db, &id, &actor, request.comment.as_deref()).await?;
    let record = load_log(&state.db, &id).await?;
    Ok(Json(build_response(&state.db, record, &actor).await?))
}

async fn reject_action_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ApprovalActionRequest>,
) -> Result<Json<ActionLogResponse>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    workflow::reject(&state.db, &id, &actor, request.comment.as_deref()).await?;
    let record = load_log(&state.db, &id).await?;
    Ok(Json(build_response(&state.db, record, &actor).await?))
}

// --- comments ---

fn comment_from_row(row: &SqliteRow) -> Result<CommentResponse, AppError> {
    Ok(CommentResponse {
        id: row.try_get("id")?,
        action_log_id: row.try_get("action_log_id")?,
        user_id: row.try_get("user_id")?,
        comment: row.try_get("body")?,
        status: row.try_get("status")?,
        is_approved: row.try_get("is_approved")?,
        is_viewed: row.try_get("is_viewed")?,
        parent_id: row.try_get("parent_id")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<CommentResponse>>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let record = load_log(&state.db, &id).await?;

    if !can_view(&state.db, &record, &actor).await? {
        return Err(AppError::Forbidden(
            "you don't have access to this action log".to_string(),
        ));
    }

    let rows = sqlx::query("SELECT * FROM comments WHERE action_log_id = ?1 ORDER BY created_at ASC")
        .bind(&id)
        .fetch_all(&state.db)
        .await?;

    rows.iter().map(comment_from_row).collect::<Result<Vec<_>, _>>().map(Json)
}

async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let record = load_log(&state.db, &id).await?;

    if !can_view(&state.db, &record, &actor).await? {
        return Err(AppError::Forbidden(
            "you don't have access to this action log".to_string(),
        ));
    }
    if request.comment.trim().is_empty() {
        return Err(AppError::Validation("comment cannot be empty".to_string()));
    }

    if let Some(parent_id) = request.parent_id.as_deref() {
        let parent_log: Option<String> =
            sqlx::query_scalar("SELECT action_log_id FROM comments WHERE id = ?1")
                .bind(parent_id)
                .fetch_optional(&state.db)
                .await?;
        match parent_log {
            Some(log) if log == id => {}
            Some(_) => {
                return Err(AppError::Validation(
                    "parent comment belongs to a different action log".to_string(),
                ));
            }
            None => {
                return Err(AppError::NotFound(format!("parent comment {parent_id} not found")));
            }
        }
    }

    let now = utc_now();
    let comment_id = new_id("cmt");
    sqlx::query(
        r#"
        INSERT INTO comments (id, action_log_id, user_id, body, status, parent_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&comment_id)
    .bind(&id)
    .bind(&actor.id)
    .bind(request.comment.trim())
    .bind(record.status.as_str())
    .bind(&request.parent_id)
    .bind(now)
    .execute(&state.db)
    .await?;

    let recipients =
        notify::comment_recipients(&state.db, &id, &actor.id, request.parent_id.as_deref()).await?;
    if let Err(err) = notify::notify_comment(
        &state.db,
        &state.notifier,
        &id,
        &comment_id,
        &record.title,
        &actor,
        &recipients,
    )
    .await
    {
        warn!(comment_id = %comment_id, error = %err, "comment notification failed");
    }

    let row = sqlx::query("SELECT * FROM comments WHERE id = ?1")
        .bind(&comment_id)
        .fetch_one(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(comment_from_row(&row)?)))
}

#[derive(Serialize)]
struct CountResponse {
    updated: u64,
}

async fn mark_comments_viewed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CountResponse>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    load_log(&state.db, &id).await?;

    let result = sqlx::query(
        "UPDATE comments SET is_viewed = 1 WHERE action_log_id = ?1 AND user_id != ?2 AND is_viewed = 0",
    )
    .bind(&id)
    .bind(&actor.id)
    .execute(&state.db)
    .await?;

    Ok(Json(CountResponse {
        updated: result.rows_affected(),
    }))
}

// --- assignment history ---

async fn assignment_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<AssignmentHistoryResponse>>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let record = load_log(&state.db, &id).await?;

    if !can_view(&state.db, &record, &actor).await? {
        return Err(AppError::Forbidden(
            "you don't have access to this action log".to_string(),
        ));
    }

    let rows = sqlx::query(
        "SELECT * FROM assignment_history WHERE action_log_id = ?1 ORDER BY assigned_at ASC, id ASC",
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let history_id: String = row.try_get("id")?;
        let assigned_to: Vec<String> = sqlx::query_scalar(
            "SELECT user_id FROM assignment_history_assignees WHERE history_id = ?1 ORDER BY position",
        )
        .bind(&history_id)
        .fetch_all(&state.db)
        .await?;

        entries.push(AssignmentHistoryResponse {
            id: history_id,
            action_log_id: row.try_get("action_log_id")?,
            assigned_by: row.try_get("assigned_by")?,
            assigned_to,
            assigned_at: row.try_get("assigned_at")?,
            comment: row.try_get("comment")?,
        });
    }

    Ok(Json(entries))
}

// --- notifications ---

#[derive(Serialize)]
struct NotificationResponse {
    id: String,
    action_log_id: String,
    comment_id: Option<String>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

async fn unread_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<NotificationResponse>>, AppError> {
    let actor = require_actor(&state, &headers).await?;

    let rows = sqlx::query(
        r#"
        SELECT * FROM notifications
        WHERE user_id = ?1 AND action_log_id = ?2 AND is_read = 0
        ORDER BY created_at ASC
        "#,
    )
    .bind(&actor.id)
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    let mut notifications = Vec::with_capacity(rows.len());
    for row in &rows {
        notifications.push(NotificationResponse {
            id: row.try_get("id")?,
            action_log_id: row.try_get("action_log_id")?,
            comment_id: row.try_get("comment_id")?,
            is_read: row.try_get("is_read")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(Json(notifications))
}

async fn mark_notifications_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CountResponse>, AppError> {
    let actor = require_actor(&state, &headers).await?;

    let result = sqlx::query(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND action_log_id = ?2 AND is_read = 0",
    )
    .bind(&actor.id)
    .bind(&id)
    .execute(&state.db)
    .await?;

    Ok(Json(CountResponse {
        updated: result.rows_affected(),
    }))
}

// --- delegations ---

async fn create_delegation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateDelegationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let delegation = delegation::create(&state.db, &actor, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(DelegationResponse::from_delegation(&delegation, utc_now())),
    ))
}

async fn list_delegations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DelegationResponse>>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let now = utc_now();
    let delegations = delegation::list(&state.db, &actor).await?;
    Ok(Json(
        delegations
            .iter()
            .map(|d| DelegationResponse::from_delegation(d, now))
            .collect(),
    ))
}

async fn revoke_delegation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DelegationResponse>, AppError> {
    let actor = require_actor(&state, &headers).await?;
    let delegation = delegation::revoke(&state.db, &id, &actor).await?;
    Ok(Json(DelegationResponse::from_delegation(&delegation, utc_now())))
}

async fn delete_delegation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let actor = require_actor(&state, &headers).await?;
    delegation::hard_delete(&state.db, &id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct SweepResponse {
    swept: u64,
}

async fn sweep_delegations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, AppError> {
    require_actor(&state, &headers).await?;
    let swept = delegation::sweep_expired(&state.db).await?;
    Ok(Json(SweepResponse { swept }))
}
