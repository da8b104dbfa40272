//! The reload side effect, as an explicit collaborator.
//!
//! Roster changes only take effect on the protected service after a
//! reload, and a restore additionally restarts the conversational
//! front-end itself. Both are opaque, best-effort operations invoked
//! strictly outside the store lock; a failure is surfaced to the
//! caller and never retried automatically.

use crate::config::ServiceConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Make roster changes take effect on the protected service.
    async fn reload(&self) -> AppResult<()>;

    /// Restart the conversational front-end (after a restore replaced
    /// configuration it holds in memory).
    async fn restart_frontend(&self) -> AppResult<()>;
}

pub type SharedControl = Arc<dyn ServiceControl>;

/// Runs configured argv vectors. An empty vector disables the side
/// effect, which keeps development setups runnable.
#[derive(Debug)]
pub struct CommandControl {
    reload_command: Vec<String>,
    restart_frontend_command: Vec<String>,
    timeout: Duration,
}

impl CommandControl {
    pub fn from_config(service: &ServiceConfig) -> Self {
        Self {
            reload_command: service.reload_command.clone(),
            restart_frontend_command: service.restart_frontend_command.clone(),
            timeout: Duration::from_secs(30),
        }
    }

    async fn run(&self, argv: &[String]) -> AppResult<()> {
        let Some((program, args)) = argv.split_first() else {
            debug!("no control command configured, skipping");
            return Ok(());
        };

        let status = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).status(),
        )
        .await
        .map_err(|_| AppError::Reload(format!("{} timed out", program)))?
        .map_err(|e| AppError::Reload(format!("{}: {}", program, e)))?;

        if !status.success() {
            return Err(AppError::Reload(format!(
                "{} exited with {}",
                program, status
            )));
        }
        info!(command = %program, "service control command succeeded");
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for CommandControl {
    async fn reload(&self) -> AppResult<()> {
        self.run(&self.reload_command).await
    }

    async fn restart_frontend(&self) -> AppResult<()> {
        self.run(&self.restart_frontend_command).await
    }
}
