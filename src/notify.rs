//! In-app notifications plus best-effort SMS fan-out. Delivery failures are
//! logged and swallowed: a gateway outage must never fail the request that
//! triggered the message.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    config::Config,
    db::{new_id, utc_now},
    error::AppError,
    models::User,
};

#[derive(Clone)]
pub struct SmsNotifier {
    client: reqwest::Client,
    gateway_url: Option<String>,
    gateway_token: Option<String>,
    from_number: String,
}

#[derive(Serialize)]
struct SmsPayload<'a> {
    from: &'a str,
    to: &'a str,
    body: &'a str,
}

impl SmsNotifier {
    pub fn from_config(config: &Config) -> Self {
        if config.sms_gateway_url.is_none() {
            warn!("SMS_GATEWAY_URL not set; SMS delivery disabled");
        }
        Self {
            client: reqwest::Client::new(),
            gateway_url: config.sms_gateway_url.clone(),
            gateway_token: config.sms_gateway_token.clone(),
            from_number: config.sms_from_number.clone(),
        }
    }

    /// Fire one SMS. Never returns an error: failure is a log line.
    pub async fn send_sms(&self, to: &str, body: &str) {
        let Some(url) = self.gateway_url.as_deref() else {
            return;
        };
        if to.trim().is_empty() {
            return;
        }

        let payload = SmsPayload {
            from: &self.from_number,
            to,
            body,
        };

        let mut request = self.client.post(url).json(&payload);
        if let Some(token) = self.gateway_token.as_deref() {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(to = %to, "SMS dispatched");
            }
            Ok(response) => {
                warn!(to = %to, status = %response.status(), "SMS gateway rejected message");
            }
            Err(err) => {
                warn!(to = %to, error = %err, "SMS delivery failed");
            }
        }
    }
}

pub fn assignment_message(title: &str, assigner: &User, due_date: Option<&str>) -> String {
    match due_date {
        Some(due) => format!(
            "You have been assigned to action log \"{}\" by {}. Due: {}.",
            title,
            assigner.full_name(),
            due
        ),
        None => format!(
            "You have been assigned to action log \"{}\" by {}.",
            title,
            assigner.full_name()
        ),
    }
}

pub fn comment_message(title: &str, author: &User) -> String {
    format!(
        "{} commented on action log \"{}\".",
        author.full_name(),
        title
    )
}

/// SMS every assignee about a new or changed assignment.
pub async fn notify_assignment(
    pool: &SqlitePool,
    notifier: &SmsNotifier,
    assigner: &User,
    assignee_ids: &[String],
    title: &str,
    due_date: Option<&str>,
) -> Result<(), AppError> {
    let body = assignment_message(title, assigner, due_date);

    for user_id in assignee_ids {
        if user_id == &assigner.id {
            continue;
        }
        let phone: Option<String> =
            sqlx::query_scalar("SELECT phone_number FROM users WHERE id = ?1 AND is_active = 1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;
        if let Some(phone) = phone {
            notifier.send_sms(&phone, &body).await;
        }
    }

    Ok(())
}

/// Who hears about a new comment: every assignee except the author, plus
/// (for replies) the immediate parent's author and the author at the root of
/// the thread. Authors in between are not notified. The parent walk is
/// bounded so a cyclic parent_id can never hang the request.
pub async fn comment_recipients(
    pool: &SqlitePool,
    log_id: &str,
    author_id: &str,
    parent_id: Option<&str>,
) -> Result<Vec<String>, AppError> {
    let mut recipients: Vec<String> = sqlx::query_scalar(
        "SELECT user_id FROM action_log_assignees WHERE action_log_id = ?1 ORDER BY position",
    )
    .bind(log_id)
    .fetch_all(pool)
    .await?;

    if let Some(parent) = parent_id {
        let mut current = parent.to_string();
        let mut last_author: Option<String> = None;
        let mut hops = 0;
        loop {
            if hops >= 16 {
                warn!(comment_id = %current, "comment thread too deep; stopping recipient walk");
                break;
            }
            hops += 1;

            let row: Option<(String, Option<String>)> =
                sqlx::query_as("SELECT user_id, parent_id FROM comments WHERE id = ?1")
                    .bind(&current)
                    .fetch_optional(pool)
                    .await?;

            let Some((commenter, next_parent)) = row else {
                break;
            };
            if hops == 1 {
                recipients.push(commenter.clone());
            }
            last_author = Some(commenter);
            match next_parent {
                Some(next) => current = next,
                None => break,
            }
        }
        if let Some(root_author) = last_author {
            recipients.push(root_author);
        }
    }

    recipients.sort();
    recipients.dedup();
    recipients.retain(|id| id != author_id);
    Ok(recipients)
}

/// Record an in-app notification per recipient and SMS them best-effort.
pub async fn notify_comment(
    pool: &SqlitePool,
    notifier: &SmsNotifier,
    log_id: &str,
    comment_id: &str,
    title: &str,
    author: &User,
    recipients: &[String],
) -> Result<(), AppError> {
    let now = utc_now();
    let body = comment_message(title, author);

    for user_id in recipients {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, action_log_id, comment_id, is_read, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            "#,
        )
        .bind(new_id("ntf"))
        .bind(user_id)
        .bind(log_id)
        .bind(comment_id)
        .bind(now)
        .execute(pool)
        .await?;

        let phone: Option<String> =
            sqlx::query_scalar("SELECT phone_number FROM users WHERE id = ?1 AND is_active = 1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;
        if let Some(phone) = phone {
            notifier.send_sms(&phone, &body).await;
        }
    }

    Ok(())
}
