//! Launching processes with elevated privileges

use std::path::Path;

use crate::error::LaunchError;

/// Launches a command with elevated privileges. The launch is fire and forget: an Ok result only
/// means the launch was initiated, the exit status of the command is never observed.
pub trait CommandRunner {
    /// Launch `executable` with the single argument string `arguments`, requesting elevation
    /// and without showing a window.
    fn run_elevated(&self, executable: &Path, arguments: &str) -> Result<(), LaunchError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run_elevated(&self, executable: &Path, arguments: &str) -> Result<(), LaunchError> {
        (**self).run_elevated(executable, arguments)
    }
}
