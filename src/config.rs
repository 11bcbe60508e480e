//! Configuration for registering and running a service

use std::path::PathBuf;
use std::time::Duration;

use crate::error::LifecycleError;
use crate::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// When the service manager starts the service
pub enum StartMode {
    /// Started at boot
    #[default]
    Automatic,
    /// Started on request
    Manual,
    /// Cannot be started
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// The account a service runs as
pub enum ServiceAccount {
    /// The fully privileged system account
    #[default]
    LocalSystem,
    /// A minimally privileged local account
    LocalService,
    /// A minimally privileged account that presents machine credentials on the network
    NetworkService,
    /// A specific user account
    User {
        /// The account name
        name: String,
        /// The password for the account, where the platform needs one
        password: Option<String>,
    },
}

/// The configuration used when registering the service
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstallOptions {
    /// The service start options
    pub start_mode: StartMode,
    /// The account the service runs as
    pub account: ServiceAccount,
    /// Extra arguments stored in the service command line
    pub arguments: Vec<String>,
    /// The working directory of the service, where the platform supports one
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// What the entry point does with a failed lifecycle command
pub enum FailurePolicy {
    /// Log the failure and carry on as if it succeeded
    #[default]
    Absorb,
    /// Hand the failure back to the caller
    Report,
}

impl FailurePolicy {
    /// Apply the policy to a failed lifecycle command
    pub fn apply(self, error: LifecycleError) -> Result<(), LifecycleError> {
        match self {
            Self::Absorb => {
                log::warn!("Ignoring failed service command: {}", error);
                Ok(())
            }
            Self::Report => Err(error),
        }
    }
}

/// Process level settings for a running service
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceSettings {
    /// How long a stop request waits for the worker to observe cancellation
    pub stop_timeout: Duration,
    /// What happens to failed lifecycle commands
    pub failure_policy: FailurePolicy,
    /// The level used by the service log
    pub log_level: LogLevel,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            failure_policy: FailurePolicy::default(),
            log_level: LogLevel::Info,
        }
    }
}
