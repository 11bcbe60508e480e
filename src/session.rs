//! Detecting whether the process runs in front of a user or under the service manager

/// Answers whether the process has an interactive session attached
pub trait SessionDetector {
    fn is_interactive(&self) -> bool;
}

impl<T: SessionDetector + ?Sized> SessionDetector for &T {
    fn is_interactive(&self) -> bool {
        (**self).is_interactive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How the process runs the service functionality, chosen once at startup
pub enum Mode {
    /// A user is attached, the functionality runs on the calling thread
    Interactive,
    /// Launched by the service manager, control is handed to the service host
    NonInteractive,
}

impl Mode {
    /// Select the mode from the hosting environment alone
    pub fn detect(detector: &impl SessionDetector) -> Self {
        if detector.is_interactive() {
            Self::Interactive
        } else {
            Self::NonInteractive
        }
    }
}
