//! Turns an executable into an operating system service.
//!
//! A [`StandaloneService`] pairs a [`ServiceIdentity`] with the functionality the service runs.
//! The same executable installs and uninstalls itself, starts and stops the installed service,
//! and runs the functionality either directly in a console or under the service manager.
//! Install and uninstall retry themselves in an elevated copy of the executable when the
//! current process lacks the privilege.

pub use log;

pub mod args;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod runner;
pub mod service;
pub mod session;
pub mod supervisor;

pub use args::Command;
pub use cancel::CancelToken;
pub use config::{FailurePolicy, InstallOptions, ServiceAccount, ServiceSettings, StartMode};
pub use dispatch::{Dispatcher, ServiceHost};
pub use error::{HostError, IdentityError, LaunchError, LifecycleError, LogInitError, ServiceError};
pub use identity::ServiceIdentity;
pub use lifecycle::{ControlAction, LifecycleManager, LifecycleOutcome, ServiceRegistry};
pub use runner::CommandRunner;
pub use service::StandaloneService;
pub use session::{Mode, SessionDetector};
pub use supervisor::{Functionality, StopOutcome, WorkerSupervisor};

/// The various levels of log, increasing in severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogLevel {
    /// Trace
    Trace,
    /// Debug
    Debug,
    /// Informational
    #[default]
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
}

impl LogLevel {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level().to_level_filter()
    }

    pub fn level(&self) -> log::Level {
        match self {
            crate::LogLevel::Debug => log::Level::Debug,
            crate::LogLevel::Info => log::Level::Info,
            crate::LogLevel::Warning => log::Level::Warn,
            crate::LogLevel::Error => log::Level::Error,
            crate::LogLevel::Trace => log::Level::Trace,
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub use winapi;
        pub use self::windows::ScmRegistry as NativeRegistry;
        pub use self::windows::RunasRunner as ElevatedRunner;
        pub use self::windows::WindowStation as ConsoleSession;
        pub use self::windows::ScmHost as NativeHost;
        pub use self::windows::init_log as init_log;
    } else if #[cfg(target_os = "linux")] {
        mod linux;
        pub use self::linux::SystemdRegistry as NativeRegistry;
        pub use self::linux::PkexecRunner as ElevatedRunner;
        pub use self::linux::Terminal as ConsoleSession;
        pub use self::linux::SignalHost as NativeHost;
        pub use self::linux::init_log as init_log;
    } else {
        compile_error!("standalone-service supports windows and linux only");
    }
}
