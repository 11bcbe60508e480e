//! The command line conventions of a standalone service

/// Registers the service
pub const INSTALL_ARG: &str = "--install";
/// Removes the registration
pub const UNINSTALL_ARG: &str = "--uninstall";
/// Starts the installed service
pub const START_ARG: &str = "--start";
/// Stops the installed service
pub const STOP_ARG: &str = "--stop";
/// Appended to the arguments of an elevated relaunch, so the child never relaunches again
pub const CHILD_PROCESS_ARG: &str = "--child-process";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What the process was asked to do
pub enum Command {
    /// Register the service
    Install,
    /// Remove the registration
    Uninstall,
    /// Start the installed service
    Start,
    /// Stop the installed service
    Stop,
    /// Run the service functionality
    Run,
}

impl Command {
    /// Pick the command from the process arguments. Flags are recognised anywhere in the list,
    /// with install taking priority over uninstall, then start, then stop.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let has = |flag: &str| args.iter().any(|a| a.as_ref() == flag);
        if has(INSTALL_ARG) {
            Self::Install
        } else if has(UNINSTALL_ARG) {
            Self::Uninstall
        } else if has(START_ARG) {
            Self::Start
        } else if has(STOP_ARG) {
            Self::Stop
        } else {
            Self::Run
        }
    }

    /// The flag that selects this command, used again when relaunching with elevation
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            Self::Install => Some(INSTALL_ARG),
            Self::Uninstall => Some(UNINSTALL_ARG),
            Self::Start => Some(START_ARG),
            Self::Stop => Some(STOP_ARG),
            Self::Run => None,
        }
    }
}

/// Was this process launched as an elevated relaunch of itself?
pub fn is_child_process<S: AsRef<str>>(args: &[S]) -> bool {
    args.iter().any(|a| a.as_ref() == CHILD_PROCESS_ARG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_found_anywhere() {
        assert_eq!(Command::from_args(&["x", "--install"]), Command::Install);
        assert_eq!(
            Command::from_args(&["--uninstall", "--child-process"]),
            Command::Uninstall
        );
        assert_eq!(Command::from_args(&["--start"]), Command::Start);
        assert_eq!(Command::from_args(&["a", "b", "--stop"]), Command::Stop);
    }

    #[test]
    fn anything_else_runs_the_service() {
        let empty: [&str; 0] = [];
        assert_eq!(Command::from_args(&empty), Command::Run);
        assert_eq!(Command::from_args(&["--installed", "-install"]), Command::Run);
    }

    #[test]
    fn install_wins_over_the_other_flags() {
        assert_eq!(
            Command::from_args(&["--stop", "--start", "--uninstall", "--install"]),
            Command::Install
        );
        assert_eq!(Command::from_args(&["--stop", "--start"]), Command::Start);
    }

    #[test]
    fn sentinel_detection() {
        assert!(is_child_process(&["--install", CHILD_PROCESS_ARG]));
        assert!(!is_child_process(&["--install", "--child-processes"]));
        assert_eq!(Command::Install.flag(), Some(INSTALL_ARG));
        assert_eq!(Command::Run.flag(), None);
    }
}
