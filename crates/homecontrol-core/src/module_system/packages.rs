use std::fmt::Debug;
use std::process::{Command, Stdio};

use async_trait::async_trait;

use crate::config::PackageManagerConfig;
use crate::module_system::error::ModuleError;
use crate::module_system::requirement::{InstalledPackages, Requirement};

/// External package installer used to satisfy `pip-requirements`.
#[async_trait]
pub trait PackageManager: Send + Sync + Debug {
    async fn list_installed(&self) -> Result<InstalledPackages, ModuleError>;

    /// Install all `requirements` in one invocation and return its exit status
    async fn install(&self, requirements: &[Requirement]) -> Result<i32, ModuleError>;
}

/// [`PackageManager`] running an external command (`python3 -m pip` by default).
///
/// Both commands run on the blocking thread pool.
#[derive(Debug, Clone, Default)]
pub struct CommandPackageManager {
    config: PackageManagerConfig,
}

impl CommandPackageManager {
    pub fn new(config: PackageManagerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PackageManagerConfig {
        &self.config
    }

    fn command_failed(&self, message: impl ToString) -> ModuleError {
        ModuleError::PackageCommandFailed {
            program: self.config.program.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl PackageManager for CommandPackageManager {
    async fn list_installed(&self) -> Result<InstalledPackages, ModuleError> {
        let program = self.config.program.clone();
        let args = self.config.list_args.clone();
        let output = tokio::task::spawn_blocking(move || {
            Command::new(program).args(args).stdin(Stdio::null()).output()
        })
        .await
        .map_err(|e| self.command_failed(e))?
        .map_err(|e| self.command_failed(e))?;

        if !output.status.success() {
            return Err(ModuleError::PackageListFailed {
                message: format!(
                    "{} exited with {}: {}",
                    self.config.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        InstalledPackages::from_pip_json(&stdout).map_err(|e| ModuleError::PackageListFailed {
            message: e.to_string(),
        })
    }

    async fn install(&self, requirements: &[Requirement]) -> Result<i32, ModuleError> {
        let program = self.config.program.clone();
        let mut args = self.config.install_args.clone();
        args.extend(requirements.iter().map(Requirement::install_arg));
        log::info!("Running {} {}", program, args.join(" "));

        let status = tokio::task::spawn_blocking(move || {
            Command::new(program).args(args).stdin(Stdio::null()).status()
        })
        .await
        .map_err(|e| self.command_failed(e))?
        .map_err(|e| self.command_failed(e))?;

        // Killed by a signal: no exit code, report as failure
        Ok(status.code().unwrap_or(-1))
    }
}
