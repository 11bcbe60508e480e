//! The errors that can occur when managing or hosting a service

use std::fmt;

#[derive(Debug)]
/// Errors that can occur when building a service identity
pub enum IdentityError {
    /// The id was empty or only whitespace
    EmptyId,
    /// The id contains characters that cannot be used in a service name
    InvalidId(String),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "service id must not be empty"),
            Self::InvalidId(id) => write!(f, "service id {:?} contains a reserved character", id),
        }
    }
}

impl std::error::Error for IdentityError {}

#[derive(Debug)]
/// Errors that can occur launching a process with elevated privileges
pub enum LaunchError {
    /// The process could not be spawned at all
    Spawn(std::io::Error),
    /// The user declined the elevation request
    Declined,
    /// A platform specific error code
    Os(u32),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to spawn elevated process: {}", e),
            Self::Declined => write!(f, "elevation was declined"),
            Self::Os(code) => write!(f, "elevated launch failed with code {}", code),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
/// Errors that can occur installing, uninstalling, starting or stopping a service
pub enum LifecycleError {
    /// A service with the same id is already registered
    AlreadyInstalled,
    /// No service with the id is registered
    NotInstalled,
    /// The current process lacks the privilege for the operation
    PermissionDenied,
    /// A platform specific error code
    Os(u32),
    /// An io error while touching the service manager's store
    Io(std::io::Error),
    /// The path of the running executable could not be determined
    CurrentExe(std::io::Error),
    /// The primary attempt failed and relaunching with elevation failed too
    Relaunch {
        /// Why the in-process attempt failed
        primary: Box<LifecycleError>,
        /// Why the elevated relaunch failed
        launch: LaunchError,
    },
    /// The elevated service control command could not be launched
    Launch(LaunchError),
}

impl LifecycleError {
    /// Could the failure plausibly go away if the operation ran with more privilege?
    pub fn may_need_elevation(&self) -> bool {
        match self {
            Self::PermissionDenied | Self::Os(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInstalled => write!(f, "the service is already installed"),
            Self::NotInstalled => write!(f, "the service is not installed"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Os(code) => write!(f, "service manager error {}", code),
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::CurrentExe(e) => write!(f, "unable to locate the current executable: {}", e),
            Self::Relaunch { primary, launch } => {
                write!(f, "{}, and the elevated retry failed: {}", primary, launch)
            }
            Self::Launch(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LifecycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::CurrentExe(e) => Some(e),
            Self::Relaunch { launch, .. } => Some(launch),
            Self::Launch(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
/// Errors that can occur handing the process over to the service host
pub enum HostError {
    /// The service dispatcher returned an error code
    Dispatch(u32),
    /// The process was not started by the service manager
    NotAService,
    /// Termination signals could not be registered
    Signal(std::io::Error),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch(code) => write!(f, "service dispatcher failed with code {}", code),
            Self::NotAService => write!(f, "the process was not started by the service manager"),
            Self::Signal(e) => write!(f, "unable to register termination signals: {}", e),
        }
    }
}

impl std::error::Error for HostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Signal(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
/// Any error from the top level entry point of a service
pub enum ServiceError {
    /// A lifecycle command failed
    Lifecycle(LifecycleError),
    /// Running the service failed
    Host(HostError),
}

impl From<LifecycleError> for ServiceError {
    fn from(value: LifecycleError) -> Self {
        Self::Lifecycle(value)
    }
}

impl From<HostError> for ServiceError {
    fn from(value: HostError) -> Self {
        Self::Host(value)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifecycle(e) => write!(f, "{}", e),
            Self::Host(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lifecycle(e) => Some(e),
            Self::Host(e) => Some(e),
        }
    }
}

#[derive(Debug)]
/// The logger could not be installed
pub struct LogInitError(pub String);

impl fmt::Display for LogInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to initialize logging: {}", self.0)
    }
}

impl std::error::Error for LogInitError {}
