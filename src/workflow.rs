//! Per-ticket closure workflow: a multi-stage sign-off chain keyed off the
//! assignment lineage (who originally assigned the ticket) and gated by the
//! authority resolver. Stage and status always move together inside one
//! transaction.

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};

use crate::{
    authority, delegation,
    db::{fetch_user, new_id, utc_now},
    error::AppError,
    models::{ClosureStage, LogStatus, User, role},
    tier,
};

/// Single step along the approval chain. The commissioner stage is terminal:
/// stepping it closes the ticket.
pub fn next_stage(stage: ClosureStage) -> ClosureStage {
    match stage {
        ClosureStage::UnitHead => ClosureStage::AssistantCommissioner,
        ClosureStage::AssistantCommissioner => ClosureStage::Commissioner,
        ClosureStage::Commissioner => ClosureStage::Closed,
        other => other,
    }
}

/// Which stage a closure request enters at, decided by the original
/// assigner's role. Tickets assigned from the top enter at the top.
pub fn initial_stage_for_assigner(assigner_role: Option<&str>) -> ClosureStage {
    match assigner_role {
        Some(role::COMMISSIONER) => ClosureStage::Commissioner,
        Some(role::ASSISTANT_COMMISSIONER) => ClosureStage::AssistantCommissioner,
        _ => ClosureStage::UnitHead,
    }
}

pub async fn original_assigner(pool: &SqlitePool, log_id: &str) -> Result<Option<User>, AppError> {
    let assigner_id: Option<String> = sqlx::query_scalar(
        r#"
        SELECT assigned_by
        FROM assignment_history
        WHERE action_log_id = ?1
        ORDER BY assigned_at ASC, id ASC
        LIMIT 1
        "#,
    )
    .bind(log_id)
    .fetch_optional(pool)
    .await?;

    match assigner_id {
        Some(id) => fetch_user(pool, &id).await,
        None => Ok(None),
    }
}

pub async fn first_assignee(pool: &SqlitePool, log_id: &str) -> Result<Option<User>, AppError> {
    let user_id: Option<String> = sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM action_log_assignees
        WHERE action_log_id = ?1
        ORDER BY position ASC
        LIMIT 1
        "#,
    )
    .bind(log_id)
    .fetch_optional(pool)
    .await?;

    match user_id {
        Some(id) => fetch_user(pool, &id).await,
        None => Ok(None),
    }
}

async fn load_stage_and_status(
    tx: &mut Transaction<'_, Sqlite>,
    log_id: &str,
) -> Result<(LogStatus, ClosureStage), AppError> {
    let row = sqlx::query("SELECT status, closure_approval_stage FROM action_logs WHERE id = ?1")
        .bind(log_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("action log {log_id} not found")))?;

    let status: String = row.try_get("status")?;
    let stage: String = row.try_get("closure_approval_stage")?;
    Ok((LogStatus::parse(&status)?, ClosureStage::parse(&stage)?))
}

async fn persist_transition(
    tx: &mut Transaction<'_, Sqlite>,
    log_id: &str,
    status: LogStatus,
    stage: ClosureStage,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE action_logs
        SET status = ?1, closure_approval_stage = ?2, updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(status.as_str())
    .bind(stage.as_str())
    .bind(now)
    .bind(log_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_workflow_comment(
    tx: &mut Transaction<'_, Sqlite>,
    log_id: &str,
    user_id: &str,
    body: &str,
    status: LogStatus,
    is_approved: bool,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO comments (
          id, action_log_id, user_id, body, status, is_approved, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(new_id("cmt"))
    .bind(log_id)
    .bind(user_id)
    .bind(body)
    .bind(status.as_str())
    .bind(is_approved)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Append an assignment-history record. The oldest record per ticket is the
/// original assignment and drives the approval chain forever after.
pub async fn record_assignment(
    tx: &mut Transaction<'_, Sqlite>,
    log_id: &str,
    assigned_by: &str,
    assignee_ids: &[String],
    comment: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let history_id = new_id("ash");
    sqlx::query(
        r#"
        INSERT INTO assignment_history (id, action_log_id, assigned_by, assigned_at, comment)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(&history_id)
    .bind(log_id)
    .bind(assigned_by)
    .bind(now)
    .bind(comment)
    .execute(&mut **tx)
    .await?;

    for (position, user_id) in assignee_ids.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO assignment_history_assignees (history_id, user_id, position)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&history_id)
        .bind(user_id)
        .bind(position as i64)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Route a requested `status = closed` into the approval chain. The caller's
/// requested status is superseded by `pending_approval`; the entry stage is
/// derived from the original assigner's role.
pub async fn begin_closure(
    tx: &mut Transaction<'_, Sqlite>,
    log_id: &str,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<ClosureStage, AppError> {
    // Read through the transaction so an assignment recorded earlier in the
    // same request is visible.
    let assigner_role: Option<String> = sqlx::query_scalar(
        r#"
        SELECT u.role
        FROM assignment_history h
        JOIN users u ON u.id = h.assigned_by
        WHERE h.action_log_id = ?1
        ORDER BY h.assigned_at ASC, h.id ASC
        LIMIT 1
        "#,
    )
    .bind(log_id)
    .fetch_optional(&mut **tx)
    .await?;

    let stage = initial_stage_for_assigner(assigner_role.as_deref());

    if assigner_role.is_none() {
        warn!(log_id = %log_id, "no assignment history; closure entering at unit_head");
    }

    sqlx::query(
        r#"
        UPDATE action_logs
        SET closure_approval_stage = ?1,
            status = 'pending_approval',
            closure_requested_by = ?2,
            updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(stage.as_str())
    .bind(&actor.id)
    .bind(now)
    .bind(log_id)
    .execute(&mut **tx)
    .await?;

    info!(
        log_id = %log_id,
        requested_by = %actor.id,
        assigner_role = assigner_role.as_deref().unwrap_or("none"),
        stage = stage.as_str(),
        "closure approval workflow initiated"
    );

    Ok(stage)
}

enum ApprovePrivilege {
    /// Close immediately, regardless of current stage.
    ShortCircuit,
    /// Advance exactly one stage along the chain.
    SingleStep,
}

/// Whether this actor may finalize in one step. The top tier short-circuits
/// unless currently on leave, in which case their own approval is demoted to
/// a normal advance so the chain still reaches the deputized delegate. The
/// delegate short-circuits only while actually holding leave responsibilities.
async fn approve_privilege(
    pool: &SqlitePool,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<ApprovePrivilege, AppError> {
    if tier::is_top_delegate(actor) {
        let on_leave = delegation::valid_leave_delegation_granted_by(pool, &actor.id, now)
            .await?
            .is_some();
        if on_leave {
            info!(actor = %actor.id, "top-tier approver on leave; demoting to single-stage advance");
            return Ok(ApprovePrivilege::SingleStep);
        }
        return Ok(ApprovePrivilege::ShortCircuit);
    }

    if tier::is_delegate_receiver(actor) {
        let holding = delegation::valid_leave_delegation_received_by(pool, &actor.id, now)
            .await?
            .is_some();
        if holding {
            return Ok(ApprovePrivilege::ShortCircuit);
        }
    }

    Ok(ApprovePrivilege::SingleStep)
}

pub async fn approve(
    pool: &SqlitePool,
    log_id: &str,
    actor: &User,
    comment: Option<&str>,
) -> Result<(LogStatus, ClosureStage), AppError> {
    let now = utc_now();
    delegation::reconcile_expired_for_user(pool, &actor.id).await?;

    let mut tx = pool.begin().await?;
    let (_, stage) = load_stage_and_status(&mut tx, log_id).await?;

    if !stage.is_approval_stage() {
        return Err(AppError::Conflict(
            "action log is not pending closure approval".to_string(),
        ));
    }

    // The stage gate anchors on the original assignment. Without one there is
    // no lineage to gate against (and no first assignee to align units with),
    // so the ticket takes the gate-free fallback: privilege rules only.
    if original_assigner(pool, log_id).await?.is_some() {
        let assignee = first_assignee(pool, log_id).await?;
        let assignee_unit = assignee.as_ref().and_then(|u| u.department_unit_id.as_deref());

        if !authority::can_approve_at_stage(actor, stage, assignee_unit) {
            warn!(
                log_id = %log_id,
                actor = %actor.id,
                stage = stage.as_str(),
                "approval denied at stage gate"
            );
            return Err(AppError::Forbidden(format!(
                "you don't have permission to approve this action log at the {} stage",
                stage.as_str()
            )));
        }
    } else {
        warn!(log_id = %log_id, "no assignment history; approving via fallback path");
    }

    let privilege = approve_privilege(pool, actor, now).await?;

    let new_stage = match privilege {
        ApprovePrivilege::ShortCircuit => ClosureStage::Closed,
        ApprovePrivilege::SingleStep => next_stage(stage),
    };
    let new_status = if new_stage == ClosureStage::Closed {
        LogStatus::Closed
    } else {
        LogStatus::PendingApproval
    };

    persist_transition(&mut tx, log_id, new_status, new_stage, now).await?;

    if let Some(body) = comment.filter(|c| !c.trim().is_empty()) {
        insert_workflow_comment(&mut tx, log_id, &actor.id, body, new_status, true, now).await?;
    }

    tx.commit().await?;

    info!(
        log_id = %log_id,
        actor = %actor.id,
        from_stage = stage.as_str(),
        to_stage = new_stage.as_str(),
        "action log approved"
    );

    Ok((new_status, new_stage))
}

/// Delegation-scoped rejection authority: unlike approval this is not gated
/// by stage. The top tier may reject only while not on leave, the delegate
/// only while holding leave responsibilities, and anyone else falls through
/// to the generic approval-permission check.
async fn can_reject(pool: &SqlitePool, actor: &User, now: DateTime<Utc>) -> Result<bool, AppError> {
    if tier::is_top_delegate(actor) {
        let on_leave = delegation::valid_leave_delegation_granted_by(pool, &actor.id, now)
            .await?
            .is_some();
        return Ok(!on_leave);
    }

    if tier::is_delegate_receiver(actor) {
        let holding = delegation::valid_leave_delegation_received_by(pool, &actor.id, now)
            .await?
            .is_some();
        return Ok(holding);
    }

    authority::can_approve(pool, actor, now).await
}

pub async fn reject(
    pool: &SqlitePool,
    log_id: &str,
    actor: &User,
    comment: Option<&str>,
) -> Result<(LogStatus, ClosureStage), AppError> {
    let now = utc_now();
    delegation::reconcile_expired_for_user(pool, &actor.id).await?;

    let mut tx = pool.begin().await?;
    let (_, stage) = load_stage_and_status(&mut tx, log_id).await?;

    if !stage.is_approval_stage() {
        return Err(AppError::Conflict(
            "action log is not pending closure approval".to_string(),
        ));
    }

    if !can_reject(pool, actor, now).await? {
        warn!(log_id = %log_id, actor = %actor.id, "rejection denied");
        return Err(AppError::Forbidden(
            "you are not authorized to reject action logs".to_string(),
        ));
    }

    let assigner = original_assigner(pool, log_id).await?;

    let (new_status, new_stage) = match assigner {
        // Lineage path. The branch table below distinguishes the original
        // assigner's role but every arm currently resolves to the same
        // outcome: return the ticket to the requester. Kept as a table, not
        // unified: the upstream system carries the same vestigial branching
        // (see DESIGN.md).
        Some(assigner) => match assigner.role.as_str() {
            role::COMMISSIONER => (LogStatus::InProgress, ClosureStage::None),
            role::ASSISTANT_COMMISSIONER => (LogStatus::InProgress, ClosureStage::None),
            _ => (LogStatus::InProgress, ClosureStage::None),
        },
        // Fallback path: demote by exactly one stage instead of resetting,
        // except at unit_head which returns to the requester.
        None => {
            warn!(log_id = %log_id, "no assignment history; rejecting via fallback path");
            match stage {
                ClosureStage::Commissioner => (LogStatus::InProgress, ClosureStage::AssistantCommissioner),
                ClosureStage::AssistantCommissioner => (LogStatus::InProgress, ClosureStage::UnitHead),
                _ => (LogStatus::InProgress, ClosureStage::None),
            }
        }
    };

    persist_transition(&mut tx, log_id, new_status, new_stage, now).await?;

    if let Some(body) = comment.filter(|c| !c.trim().is_empty()) {
        insert_workflow_comment(&mut tx, log_id, &actor.id, body, new_status, false, now).await?;
    }

    tx.commit().await?;

    info!(
        log_id = %log_id,
        actor = %actor.id,
        from_stage = stage.as_str(),
        to_stage = new_stage.as_str(),
        "action log rejected"
    );

    Ok((new_status, new_stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_chain_advances_in_order() {
        assert_eq!(next_stage(ClosureStage::UnitHead), ClosureStage::AssistantCommissioner);
        assert_eq!(
            next_stage(ClosureStage::AssistantCommissioner),
            ClosureStage::Commissioner
        );
        assert_eq!(next_stage(ClosureStage::Commissioner), ClosureStage::Closed);
        assert_eq!(next_stage(ClosureStage::Closed), ClosureStage::Closed);
        assert_eq!(next_stage(ClosureStage::None), ClosureStage::None);
    }

    #[test]
    fn entry_stage_follows_original_assigner_role() {
        assert_eq!(
            initial_stage_for_assigner(Some(role::COMMISSIONER)),
            ClosureStage::Commissioner
        );
        assert_eq!(
            initial_stage_for_assigner(Some(role::ASSISTANT_COMMISSIONER)),
            ClosureStage::AssistantCommissioner
        );
        assert_eq!(initial_stage_for_assigner(Some(role::ECONOMIST)), ClosureStage::UnitHead);
        assert_eq!(initial_stage_for_assigner(None), ClosureStage::UnitHead);
    }
}
