//! # Daemon Runtime
//!
//! Builds the policy service from configuration and runs its startup pass.

use core_types::UserId;
use services_device_policy::{
    Collaborators, ConfigError, PolicyError, PolicyService, PolicyServiceConfig,
};
use services_storage::{FileJournal, MemoryJournal, RecordStore};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Daemon error types
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

/// Where policy records live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Journal files under the configured base directory
    File,
    /// In memory; everything is lost on exit
    Ephemeral,
}

/// Daemon configuration, usually built from the command line
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Service configuration file; defaults apply when absent
    pub config_path: Option<PathBuf>,
    /// Overrides the base directory from the configuration file
    pub base_dir: Option<PathBuf>,
    pub store: StoreMode,
    /// Users whose state is loaded and included in the dump
    pub dump_users: Vec<UserId>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            base_dir: None,
            store: StoreMode::File,
            dump_users: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Resolves the service configuration: file first, then overrides
    pub fn service_config(&self) -> Result<PolicyServiceConfig, ConfigError> {
        let mut config = match &self.config_path {
            Some(path) => PolicyServiceConfig::from_file(path)?,
            None => PolicyServiceConfig::default(),
        };
        if let Some(base_dir) = &self.base_dir {
            config = config.with_base_dir(base_dir.clone());
        }
        Ok(config)
    }
}

/// A started policy service with its startup work done
pub struct Daemon {
    service: PolicyService,
    dump_users: Vec<UserId>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        Self::with_collaborators(config, Collaborators::null())
    }

    pub fn with_collaborators(
        config: DaemonConfig,
        collaborators: Collaborators,
    ) -> Result<Self, DaemonError> {
        let service_config = config.service_config()?;
        let store: Arc<dyn RecordStore> = match config.store {
            StoreMode::File => Arc::new(FileJournal::new(service_config.base_dir.clone())),
            StoreMode::Ephemeral => Arc::new(MemoryJournal::new()),
        };
        info!(
            base_dir = %service_config.base_dir.display(),
            store = ?config.store,
            "starting device policy service"
        );
        let service = PolicyService::new(service_config, store, collaborators)?;
        Ok(Self {
            service,
            dump_users: config.dump_users,
        })
    }

    pub fn service(&self) -> &PolicyService {
        &self.service
    }

    /// Runs the startup pass and returns the state dump
    ///
    /// Startup drops data of vanished users, forces overdue removals, and
    /// starts every user that was asked for.
    pub fn run(&self) -> Result<String, DaemonError> {
        self.service.system_ready()?;
        let forced = self.service.expire_pending_removals()?;
        if !forced.is_empty() {
            info!(count = forced.len(), "forced overdue admin removals");
        }
        for user in &self.dump_users {
            let pruned = self.service.user_started(*user)?;
            if !pruned.is_empty() {
                info!(%user, count = pruned.len(), "pruned admins of uninstalled packages");
            }
        }
        Ok(self.service.dump())
    }
}
