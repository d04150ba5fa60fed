//! CLI command implementations.

pub mod config;
pub mod control;
pub mod daemon;
pub mod queue;
pub mod supervise;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{initialize_database, SqliteMailbox, SqliteRequestStore};
use crate::domain::models::Config;
use crate::services::{PriorityScorer, RequestQueue};

/// Database-backed collaborators shared by the commands.
pub struct RigContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<SqliteRequestStore>,
    /// Mail viewed from the coordinator's address
    pub mail: SqliteMailbox,
    pub queue: Arc<RequestQueue>,
}

impl RigContext {
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;

        let coordinator = config.rig.role_address(&config.daemon.coordinator_role);
        let store = Arc::new(SqliteRequestStore::new(pool.clone()));
        let mail = SqliteMailbox::new(pool.clone(), coordinator.clone());
        let scorer = PriorityScorer::with_weights(config.scoring.clone())
            .context("Invalid scoring weights")?;

        let queue = Arc::new(
            RequestQueue::new(store.clone(), Arc::new(mail.clone()), scorer, config.rig.clone())
                .with_sender(coordinator),
        );

        Ok(Self {
            config,
            pool,
            store,
            mail,
            queue,
        })
    }

    pub fn coordinator_address(&self) -> String {
        self.config
            .rig
            .role_address(&self.config.daemon.coordinator_role)
    }

    pub fn supervisor_address(&self) -> String {
        self.config
            .rig
            .role_address(&self.config.daemon.supervisor_role)
    }
}
