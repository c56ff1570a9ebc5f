//! Delegation registry: time-bounded transfer of approval authority from a
//! grantor to a grantee, with lazy expiry reconciliation on every read path.
//!
//! Staleness of the `is_active` flag is a correctness bug, not cosmetic:
//! approve/reject authorization depends on delegation validity at the instant
//! of the call. Every query here therefore filters on
//! `is_active = 1 AND (expires_at IS NULL OR expires_at > now)` and the read
//! paths heal the stored flag as a side effect.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    db::{fetch_user, new_id, utc_now},
    error::AppError,
    models::{CreateDelegationRequest, Delegation, DelegationReason, User},
    tier,
};

pub async fn create(
    pool: &SqlitePool,
    actor: &User,
    request: &CreateDelegationRequest,
) -> Result<Delegation, AppError> {
    let grantor_id = request.delegated_by.as_deref().unwrap_or(&actor.id);

    if grantor_id != actor.id && !actor.is_super_admin() && !actor.is_commissioner() {
        return Err(AppError::Forbidden(
            "only a commissioner or super admin may delegate on behalf of another user".to_string(),
        ));
    }

    if grantor_id == request.delegated_to {
        return Err(AppError::Validation("cannot delegate to yourself".to_string()));
    }

    let grantor = if grantor_id == actor.id {
        actor.clone()
    } else {
        fetch_user(pool, grantor_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("grantor {grantor_id} not found")))?
    };
    let grantee = fetch_user(pool, &request.delegated_to)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("grantee {} not found", request.delegated_to)))?;

    if request.reason == DelegationReason::Leave {
        if !tier::is_top_delegate(&grantor) {
            return Err(AppError::Validation(
                "leave delegations may only be granted by an Ag. C/PAP user".to_string(),
            ));
        }
        if !tier::is_delegate_receiver(&grantee) {
            return Err(AppError::Validation(
                "leave delegations may only name an Ag. AC/PAP user as delegate".to_string(),
            ));
        }
        if request.expires_at.is_none() {
            return Err(AppError::Validation(
                "leave delegations require an expiry date".to_string(),
            ));
        }
    }

    let now = utc_now();
    let grantor_is_top = tier::is_top_delegate(&grantor);

    let mut tx = pool.begin().await?;

    // Heal any stale flags for this grantor before checking uniqueness.
    sqlx::query(
        r#"
        UPDATE delegations
        SET is_active = 0
        WHERE delegated_by = ?1
          AND is_active = 1
          AND expires_at IS NOT NULL
          AND expires_at < ?2
        "#,
    )
    .bind(&grantor.id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let prior_active: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM delegations
        WHERE delegated_by = ?1
          AND delegated_to != ?2
          AND is_active = 1
        LIMIT 1
        "#,
    )
    .bind(&grantor.id)
    .bind(&grantee.id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(prior_id) = prior_active {
        if grantor_is_top {
            // Top tier holds at most one live delegation: the new grant
            // supersedes the old one.
            sqlx::query(
                "UPDATE delegations SET is_active = 0, revoked_at = ?1 WHERE id = ?2",
            )
            .bind(now)
            .bind(&prior_id)
            .execute(&mut *tx)
            .await?;
            info!(delegation_id = %prior_id, grantor = %grantor.id, "auto-revoked prior active delegation");
        } else {
            return Err(AppError::Conflict(
                "grantor already has an active delegation".to_string(),
            ));
        }
    }

    // Expired-at-creation grants are stored inactive (reconcile-on-save).
    let active_on_save = request
        .expires_at
        .map(|at| at > now)
        .unwrap_or(true);

    let existing_pair: Option<String> = sqlx::query_scalar(
        "SELECT id FROM delegations WHERE delegated_by = ?1 AND delegated_to = ?2",
    )
    .bind(&grantor.id)
    .bind(&grantee.id)
    .fetch_optional(&mut *tx)
    .await?;

    let delegation_id = match existing_pair {
        // One row per (grantor, grantee) pair: recreation reactivates in
        // place and leaves delegated_at untouched.
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE delegations
                SET reason = ?1, expires_at = ?2, is_active = ?3, revoked_at = NULL
                WHERE id = ?4
                "#,
            )
            .bind(request.reason.as_str())
            .bind(request.expires_at)
            .bind(active_on_save)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
            id
        }
        None => {
            let id = new_id("del");
            sqlx::query(
                r#"
                INSERT INTO delegations (
                  id, delegated_by, delegated_to, reason, expires_at, is_active, delegated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&id)
            .bind(&grantor.id)
            .bind(&grantee.id)
            .bind(request.reason.as_str())
            .bind(request.expires_at)
            .bind(active_on_save)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            id
        }
    };

    tx.commit().await?;

    info!(
        delegation_id = %delegation_id,
        grantor = %grantor.id,
        grantee = %grantee.id,
        reason = request.reason.as_str(),
        "delegation created"
    );

    fetch(pool, &delegation_id)
        .await?
        .ok_or_else(|| AppError::internal("delegation vanished after creation"))
}

/// Load one delegation, healing the stored flag if it expired while active
/// (self-healing read).
pub async fn fetch(pool: &SqlitePool, id: &str) -> Result<Option<Delegation>, AppError> {
    let row = sqlx::query("SELECT * FROM delegations WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut delegation = Delegation::from_row(&row)?;
    let now = utc_now();
    if delegation.is_active && delegation.is_expired(now) {
        sqlx::query("UPDATE delegations SET is_active = 0 WHERE id = ?1 AND is_active = 1")
            .bind(id)
            .execute(pool)
            .await?;
        delegation.is_active = false;
        info!(delegation_id = %id, "delegation deactivated on access after expiry");
    }

    Ok(Some(delegation))
}

pub async fn revoke(pool: &SqlitePool, id: &str, actor: &User) -> Result<Delegation, AppError> {
    let delegation = fetch(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delegation {id} not found")))?;

    if delegation.delegated_by != actor.id && !actor.is_super_admin() && !actor.is_commissioner() {
        return Err(AppError::Forbidden(
            "only the grantor, a commissioner or a super admin may revoke a delegation".to_string(),
        ));
    }

    sqlx::query("UPDATE delegations SET is_active = 0, revoked_at = ?1 WHERE id = ?2")
        .bind(utc_now())
        .bind(id)
        .execute(pool)
        .await?;

    info!(delegation_id = %id, actor = %actor.id, "delegation revoked");

    fetch(pool, id)
        .await?
        .ok_or_else(|| AppError::internal("delegation vanished during revoke"))
}

/// Physical delete, super-admin escape hatch only; normal flows deactivate.
pub async fn hard_delete(pool: &SqlitePool, id: &str, actor: &User) -> Result<(), AppError> {
    if !actor.is_super_admin() {
        return Err(AppError::Forbidden(
            "only a super admin may delete a delegation record".to_string(),
        ));
    }

    let result = sqlx::query("DELETE FROM delegations WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("delegation {id} not found")));
    }

    Ok(())
}

/// Delegations visible to the actor: everything they granted or received;
/// commissioners and super admins see all.
pub async fn list(pool: &SqlitePool, actor: &User) -> Result<Vec<Delegation>, AppError> {
    reconcile_expired_for_user(pool, &actor.id).await?;

    let rows = if actor.is_super_admin() || actor.is_commissioner() {
        sqlx::query("SELECT * FROM delegations ORDER BY delegated_at DESC")
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query(
            r#"
            SELECT * FROM delegations
            WHERE delegated_by = ?1 OR delegated_to = ?1
            ORDER BY delegated_at DESC
            "#,
        )
        .bind(&actor.id)
        .fetch_all(pool)
        .await?
    };

    rows.iter().map(Delegation::from_row).collect()
}

/// Bulk compare-and-set on every expired-but-active record. Idempotent and
/// safe to run concurrently with the lazy per-record healing.
pub async fn sweep_expired(pool: &SqlitePool) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE delegations
        SET is_active = 0
        WHERE is_active = 1
          AND expires_at IS NOT NULL
          AND expires_at < ?1
        "#,
    )
    .bind(utc_now())
    .execute(pool)
    .await?;

    let swept = result.rows_affected();
    if swept > 0 {
        info!(count = swept, "expired delegations deactivated by sweep");
    }
    Ok(swept)
}

/// Targeted heal for one user's delegations, run by authority read paths
/// before they answer.
pub async fn reconcile_expired_for_user(pool: &SqlitePool, user_id: &str) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE delegations
        SET is_active = 0
        WHERE (delegated_by = ?1 OR delegated_to = ?1)
          AND is_active = 1
          AND expires_at IS NOT NULL
          AND expires_at < ?2
        "#,
    )
    .bind(user_id)
    .bind(utc_now())
    .execute(pool)
    .await?;
    Ok(())
}

/// The grantor's currently-live leave delegation, if any ("is on leave").
pub async fn valid_leave_delegation_granted_by(
    pool: &SqlitePool,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Delegation>, AppError> {
    let row = sqlx::query(
        r#"
        SELECT * FROM delegations
        WHERE delegated_by = ?1
          AND reason = 'leave'
          AND is_active = 1
          AND expires_at IS NOT NULL
          AND expires_at > ?2
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(Delegation::from_row).transpose()
}

/// The grantee's currently-live leave delegation, if any ("has taken over").
pub async fn valid_leave_delegation_received_by(
    pool: &SqlitePool,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Delegation>, AppError> {
    let row = sqlx::query(
        r#"
        SELECT * FROM delegations
        WHERE delegated_to = ?1
          AND reason = 'leave'
          AND is_active = 1
          AND expires_at IS NOT NULL
          AND expires_at > ?2
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(Delegation::from_row).transpose()
}

/// Any currently-valid delegation received, regardless of reason (the generic
/// non-leave grant of approval authority).
pub async fn has_valid_received_delegation(
    pool: &SqlitePool,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let found: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM delegations
        WHERE delegated_to = ?1
          AND is_active = 1
          AND (expires_at IS NULL OR expires_at > ?2)
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}
