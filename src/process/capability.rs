//! Making sure external tools are installed before they are needed.
//!
//! Stages depend only on [`EnsureCapability`]. Detection and installation
//! live in [`Provisioner`], which tries a list of package-manager
//! [`InstallStrategy`] implementations in order.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{CommandRunner, CommandSpec, ProcessError};

// ============================================================================
// Capability
// ============================================================================

/// An external binary the pipeline needs on `PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub binary: &'static str,
    /// Package providing the binary, keyed by package manager.
    pub packages: &'static [(&'static str, &'static str)],
}

impl Capability {
    pub fn package_for(&self, manager: &str) -> Option<&'static str> {
        self.packages
            .iter()
            .find(|(m, _)| *m == manager)
            .map(|(_, package)| *package)
    }
}

/// 7-Zip, used to write AES-256 encrypted zip archives.
pub const SEVEN_ZIP: Capability = Capability {
    binary: "7z",
    packages: &[
        ("apt-get", "p7zip-full"),
        ("apk", "p7zip"),
        ("dnf", "p7zip-plugins"),
        ("yum", "p7zip-plugins"),
    ],
};

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("'{binary}' is not installed")]
    Missing { binary: &'static str },

    #[error("'{binary}' is unavailable after trying: {tried}")]
    InstallFailed { binary: &'static str, tried: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Guarantees a capability is usable, installing it if needed.
#[async_trait]
pub trait EnsureCapability: Send + Sync {
    async fn ensure(&self, capability: &Capability) -> Result<(), DependencyError>;
}

// ============================================================================
// Install strategies
// ============================================================================

/// One way of installing packages.
#[async_trait]
pub trait InstallStrategy: Send + Sync {
    /// Package manager name, used to look up [`Capability::packages`].
    fn manager(&self) -> &'static str;

    /// Whether this package manager exists on the host.
    async fn is_present(&self, runner: &dyn CommandRunner) -> bool {
        binary_on_path(runner, self.manager()).await
    }

    /// Install `package`. Returns `false` when the package manager reported
    /// failure.
    async fn install(
        &self,
        runner: &dyn CommandRunner,
        package: &str,
    ) -> Result<bool, ProcessError>;
}

/// A package manager driven by a fixed command line.
#[derive(Debug, Clone, Copy)]
pub struct PackageManager {
    pub name: &'static str,
    /// Arguments for an index refresh run before installing, if any.
    pub refresh: Option<&'static [&'static str]>,
    pub install: &'static [&'static str],
}

#[async_trait]
impl InstallStrategy for PackageManager {
    fn manager(&self) -> &'static str {
        self.name
    }

    async fn install(
        &self,
        runner: &dyn CommandRunner,
        package: &str,
    ) -> Result<bool, ProcessError> {
        if let Some(refresh) = self.refresh {
            let result = runner
                .run(&CommandSpec::new(self.name).args(refresh.iter().copied()))
                .await?;
            if !result.success() {
                warn!(manager = self.name, reason = %result.failure_summary(), "Package index refresh failed");
            }
        }

        let result = runner
            .run(
                &CommandSpec::new(self.name)
                    .args(self.install.iter().copied())
                    .arg(package),
            )
            .await?;
        if !result.success() {
            warn!(
                manager = self.name,
                package,
                reason = %result.failure_summary(),
                "Package install failed"
            );
        }
        Ok(result.success())
    }
}

/// Package managers tried in order.
pub fn default_strategies() -> Vec<Box<dyn InstallStrategy>> {
    vec![
        Box::new(PackageManager {
            name: "apt-get",
            refresh: Some(&["update"]),
            install: &["install", "-y", "--no-install-recommends"],
        }),
        Box::new(PackageManager {
            name: "apk",
            refresh: None,
            install: &["add", "--no-cache"],
        }),
        Box::new(PackageManager {
            name: "dnf",
            refresh: None,
            install: &["install", "-y"],
        }),
        Box::new(PackageManager {
            name: "yum",
            refresh: None,
            install: &["install", "-y"],
        }),
    ]
}

// ============================================================================
// Provisioner
// ============================================================================

/// Checks `PATH` for a capability and installs it with the first package
/// manager that succeeds.
pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    strategies: Vec<Box<dyn InstallStrategy>>,
    install: bool,
}

impl Provisioner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_strategies(runner, default_strategies())
    }

    pub fn with_strategies(
        runner: Arc<dyn CommandRunner>,
        strategies: Vec<Box<dyn InstallStrategy>>,
    ) -> Self {
        Self {
            runner,
            strategies,
            install: true,
        }
    }

    /// Only detect; never install. Used by `check`.
    pub fn detect_only(mut self) -> Self {
        self.install = false;
        self
    }

    pub async fn is_available(&self, capability: &Capability) -> bool {
        binary_on_path(self.runner.as_ref(), capability.binary).await
    }
}

#[async_trait]
impl EnsureCapability for Provisioner {
    async fn ensure(&self, capability: &Capability) -> Result<(), DependencyError> {
        if self.is_available(capability).await {
            debug!(binary = capability.binary, "Capability present");
            return Ok(());
        }
        if !self.install {
            return Err(DependencyError::Missing {
                binary: capability.binary,
            });
        }

        let mut tried = Vec::new();
        for strategy in &self.strategies {
            let manager = strategy.manager();
            let Some(package) = capability.package_for(manager) else {
                continue;
            };
            if !strategy.is_present(self.runner.as_ref()).await {
                continue;
            }

            info!(binary = capability.binary, manager, package, "Installing missing dependency");
            tried.push(manager);
            if strategy.install(self.runner.as_ref(), package).await?
                && self.is_available(capability).await
            {
                info!(binary = capability.binary, manager, "Dependency installed");
                return Ok(());
            }
        }

        Err(DependencyError::InstallFailed {
            binary: capability.binary,
            tried: if tried.is_empty() {
                "no supported package manager found".to_string()
            } else {
                tried.join(", ")
            },
        })
    }
}

/// `command -v <binary>` through the runner.
async fn binary_on_path(runner: &dyn CommandRunner, binary: &str) -> bool {
    let spec = CommandSpec::new("sh").args(["-c", &format!("command -v {binary}")]);
    matches!(runner.run(&spec).await, Ok(result) if result.success())
}
