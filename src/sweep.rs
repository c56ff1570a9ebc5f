//! Background sweeper that deactivates expired delegations on an interval.
//! The lazy per-request healing in `delegation` already keeps authorization
//! correct; the sweep exists so listings and dashboards converge without
//! waiting for someone to touch the record.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::time;
use tracing::error;

use crate::delegation;

pub fn start(pool: SqlitePool, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = delegation::sweep_expired(&pool).await {
                error!(error = %err, "delegation sweep failed");
            }
        }
    });
}
