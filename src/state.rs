use sqlx::SqlitePool;

use crate::{config::Config, notify::SmsNotifier};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: SqlitePool,
    pub notifier: SmsNotifier,
}
