//! Approval authority resolution: composes the designation classifier with
//! the delegation registry to answer "may this user act as approver right
//! now" and "who is the effective approver".
//!
//! Rule ordering matters. Delegation-derived answers for the Ag. C/PAP and
//! Ag. AC/PAP tiers override role-based answers: a top-tier user on leave
//! cannot approve even though their role alone would permit it.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    delegation,
    error::AppError,
    models::{ClosureStage, User, role},
    tier::{self, AuthorityTier},
};

pub async fn can_approve(pool: &SqlitePool, user: &User, now: DateTime<Utc>) -> Result<bool, AppError> {
    delegation::reconcile_expired_for_user(pool, &user.id).await?;

    match tier::classify(user) {
        // On leave means the authority has moved to the delegate.
        AuthorityTier::TopDelegate => {
            let on_leave = delegation::valid_leave_delegation_granted_by(pool, &user.id, now)
                .await?
                .is_some();
            Ok(!on_leave)
        }
        AuthorityTier::DelegateReceiver => {
            let holding = delegation::valid_leave_delegation_received_by(pool, &user.id, now)
                .await?
                .is_some();
            Ok(holding)
        }
        AuthorityTier::SuperAdmin | AuthorityTier::Commissioner => Ok(true),
        AuthorityTier::AssistantCommissioner | AuthorityTier::UnitHead | AuthorityTier::Staff => {
            delegation::has_valid_received_delegation(pool, &user.id, now).await
        }
    }
}

/// The identity that really holds approval authority for this user right now:
/// themselves, their leave delegate, or nobody.
pub async fn current_effective_approver(
    pool: &SqlitePool,
    user: &User,
    now: DateTime<Utc>,
) -> Result<Option<String>, AppError> {
    delegation::reconcile_expired_for_user(pool, &user.id).await?;

    match tier::classify(user) {
        AuthorityTier::TopDelegate => {
            match delegation::valid_leave_delegation_granted_by(pool, &user.id, now).await? {
                Some(leave) => Ok(Some(leave.delegated_to)),
                None => Ok(Some(user.id.clone())),
            }
        }
        AuthorityTier::DelegateReceiver => {
            let holding = delegation::valid_leave_delegation_received_by(pool, &user.id, now)
                .await?
                .is_some();
            Ok(holding.then(|| user.id.clone()))
        }
        AuthorityTier::SuperAdmin | AuthorityTier::Commissioner => Ok(Some(user.id.clone())),
        AuthorityTier::AssistantCommissioner | AuthorityTier::UnitHead | AuthorityTier::Staff => {
            if delegation::has_valid_received_delegation(pool, &user.id, now).await? {
                Ok(Some(user.id.clone()))
            } else {
                Ok(None)
            }
        }
    }
}

/// Stage-scoped authorization for the closure workflow. Distinct from the
/// generic `can_approve`: the unit_head stage additionally requires unit
/// alignment with the ticket's first assignee, and the later stages require
/// an exact role match.
pub fn can_approve_at_stage(
    user: &User,
    stage: ClosureStage,
    first_assignee_unit: Option<&str>,
) -> bool {
    match stage {
        ClosureStage::UnitHead => {
            let same_unit = match (first_assignee_unit, user.department_unit_id.as_deref()) {
                (Some(assignee_unit), Some(user_unit)) => assignee_unit == user_unit,
                _ => false,
            };
            tier::is_unit_head(user) && same_unit
        }
        ClosureStage::AssistantCommissioner => user.role == role::ASSISTANT_COMMISSIONER,
        ClosureStage::Commissioner => user.role == role::COMMISSIONER,
        _ => false,
    }
}
