//! Connection keeping for the ACL/alias store.
//!
//! The bot needs exactly one MariaDB connection; the pool exists so a
//! connection that the server dropped is replaced transparently on the next
//! acquire. A probe task exercises the connection on a fixed cadence so
//! stale-connection errors surface in the log instead of in user commands.

use anyhow::Result;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DbConfig;

#[derive(Clone)]
pub struct Db {
    pool: MySqlPool,
}

impl Db {
    /// Connect, retrying until the database answers.
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}/{}",
            cfg.user, cfg.password, cfg.host, cfg.database
        );

        loop {
            match MySqlPoolOptions::new()
                .max_connections(1)
                .connect(&url)
                .await
            {
                Ok(pool) => {
                    let db = Self { pool };
                    if let Err(e) = db.probe().await {
                        warn!("database probe failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                    info!("connected to database {} on {}", cfg.database, cfg.host);
                    return Ok(db);
                }
                Err(e) => {
                    warn!("cannot connect to database: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub async fn probe(&self) -> Result<()> {
        sqlx::query("SELECT NOW(), VERSION()")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// Keep the connection warm; a failed probe closes it so the next acquire
/// opens a fresh one.
pub fn spawn_probe(db: Db) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(29));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = db.probe().await {
                warn!("database probe failed, reconnecting: {}", e);
            }
        }
    })
}
