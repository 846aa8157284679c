use std::sync::Arc;

use orderly_agent::{AgentError, AgentRuntime, CallerVerifier, StaticTokenVerifier};
use orderly_core::config::{AppConfig, ConfigError, LoadOptions};
use orderly_db::repositories::{ProgressRepository, SqlProgressRepository};
use orderly_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub verifier: Arc<dyn CallerVerifier>,
    pub progress: Arc<dyn ProgressRepository>,
}

impl Application {
    pub fn api_state(&self, shutdown: CancellationToken) -> ApiState {
        ApiState {
            runtime: self.runtime.clone(),
            verifier: self.verifier.clone(),
            progress: self.progress.clone(),
            shutdown,
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent runtime setup failed: {0}")]
    Runtime(#[source] AgentError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runtime =
        AgentRuntime::from_config(&config, db_pool.clone()).map_err(BootstrapError::Runtime)?;
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        llm_model = %config.llm.model,
        max_iterations = config.agent.max_iterations,
        "agent runtime initialized"
    );

    Ok(Application {
        verifier: Arc::new(StaticTokenVerifier::from_config(&config.auth)),
        progress: Arc::new(SqlProgressRepository::new(db_pool.clone())),
        runtime: Arc::new(runtime),
        config,
        db_pool,
    })
}
