//! Installing, uninstalling, starting and stopping a service

use std::path::{Path, PathBuf};

use crate::args::{is_child_process, CHILD_PROCESS_ARG};
use crate::config::InstallOptions;
use crate::error::LifecycleError;
use crate::identity::ServiceIdentity;
use crate::runner::CommandRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A service manager control request
pub enum ControlAction {
    Start,
    Stop,
}

/// The operating system's store of registered services
pub trait ServiceRegistry {
    /// Register `binary` as the service described by `identity`
    fn install(
        &self,
        identity: &ServiceIdentity,
        binary: &Path,
        options: &InstallOptions,
    ) -> Result<(), LifecycleError>;

    /// Remove the registration
    fn uninstall(&self, identity: &ServiceIdentity) -> Result<(), LifecycleError>;

    /// Does a registration exist for the identity?
    fn is_installed(&self, identity: &ServiceIdentity) -> Result<bool, LifecycleError>;

    /// The executable and argument string of the command line tool that starts or stops the service
    fn control_command(&self, identity: &ServiceIdentity, action: ControlAction)
        -> (PathBuf, String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a lifecycle operation did
pub enum LifecycleOutcome {
    /// The operation was carried out, or the control command launched
    Completed,
    /// The operation failed here and was handed to an elevated copy of this executable
    Relaunched,
}

/// Carries out lifecycle operations for one service. Install and uninstall are first attempted
/// in-process; when that fails for lack of privilege the executable relaunches itself elevated,
/// unless it already is such a relaunch.
pub struct LifecycleManager<R, C> {
    identity: ServiceIdentity,
    registry: R,
    runner: C,
    options: InstallOptions,
    /// The path to the running executable, registered as the service binary
    executable: PathBuf,
    /// The arguments of the running process, checked for the relaunch marker
    process_args: Vec<String>,
}

impl<R: ServiceRegistry, C: CommandRunner> LifecycleManager<R, C> {
    /// Construct a new self
    /// # Arguments
    /// * identity - The service to manage
    /// * registry - The service manager store
    /// * runner - Launches elevated commands
    /// * executable - The binary registered for the service and relaunched when elevating
    /// * process_args - The arguments of the current process
    pub fn new(
        identity: ServiceIdentity,
        registry: R,
        runner: C,
        executable: PathBuf,
        process_args: Vec<String>,
    ) -> Self {
        Self {
            identity,
            registry,
            runner,
            options: InstallOptions::default(),
            executable,
            process_args,
        }
    }

    /// Replace the default install options
    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Register the service. `arg` is the flag that leads back here, used to relaunch elevated
    /// (for example `--install`); with None the failure is returned without a relaunch.
    pub fn install(&self, arg: Option<&str>) -> Result<LifecycleOutcome, LifecycleError> {
        log::debug!(
            "Installing service {} for {}",
            self.identity.id(),
            self.executable.display()
        );
        match self
            .registry
            .install(&self.identity, &self.executable, &self.options)
        {
            Ok(()) => {
                log::info!("Installed service {}", self.identity.id());
                Ok(LifecycleOutcome::Completed)
            }
            Err(e) => self.relaunch_elevated(arg, e),
        }
    }

    /// Remove the service registration. `arg` works as it does for install.
    pub fn uninstall(&self, arg: Option<&str>) -> Result<LifecycleOutcome, LifecycleError> {
        log::debug!("Uninstalling service {}", self.identity.id());
        match self.registry.uninstall(&self.identity) {
            Ok(()) => {
                log::info!("Uninstalled service {}", self.identity.id());
                Ok(LifecycleOutcome::Completed)
            }
            Err(e) => self.relaunch_elevated(arg, e),
        }
    }

    /// Start the installed service through the elevated service control command
    pub fn start(&self) -> Result<LifecycleOutcome, LifecycleError> {
        self.control(ControlAction::Start)
    }

    /// Stop the installed service through the elevated service control command
    pub fn stop(&self) -> Result<LifecycleOutcome, LifecycleError> {
        self.control(ControlAction::Stop)
    }

    /// Does the service manager know about the service?
    pub fn is_installed(&self) -> Result<bool, LifecycleError> {
        self.registry.is_installed(&self.identity)
    }

    fn control(&self, action: ControlAction) -> Result<LifecycleOutcome, LifecycleError> {
        let (executable, arguments) = self.registry.control_command(&self.identity, action);
        log::debug!(
            "Launching {} {} for service {}",
            executable.display(),
            arguments,
            self.identity.id()
        );
        self.runner
            .run_elevated(&executable, &arguments)
            .map_err(LifecycleError::Launch)?;
        Ok(LifecycleOutcome::Completed)
    }

    fn relaunch_elevated(
        &self,
        arg: Option<&str>,
        primary: LifecycleError,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        log::warn!(
            "Service operation for {} failed: {}",
            self.identity.id(),
            primary
        );
        let arg = match arg {
            Some(arg) if !is_child_process(&self.process_args) => arg,
            _ => return Err(primary),
        };
        if !primary.may_need_elevation() {
            return Err(primary);
        }
        let arguments = format!("{} {}", arg, CHILD_PROCESS_ARG);
        log::info!(
            "Relaunching {} {} with elevation",
            self.executable.display(),
            arguments
        );
        match self.runner.run_elevated(&self.executable, &arguments) {
            Ok(()) => Ok(LifecycleOutcome::Relaunched),
            Err(launch) => Err(LifecycleError::Relaunch {
                primary: Box::new(primary),
                launch,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use std::cell::RefCell;

    /// Fails every registry call with the given error
    struct Failing(fn() -> LifecycleError);

    impl ServiceRegistry for Failing {
        fn install(
            &self,
            _: &ServiceIdentity,
            _: &Path,
            _: &InstallOptions,
        ) -> Result<(), LifecycleError> {
            Err((self.0)())
        }

        fn uninstall(&self, _: &ServiceIdentity) -> Result<(), LifecycleError> {
            Err((self.0)())
        }

        fn is_installed(&self, _: &ServiceIdentity) -> Result<bool, LifecycleError> {
            Ok(false)
        }

        fn control_command(
            &self,
            identity: &ServiceIdentity,
            action: ControlAction,
        ) -> (PathBuf, String) {
            (PathBuf::from("ctl"), format!("{:?} {}", action, identity.id()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        launches: RefCell<Vec<(PathBuf, String)>>,
        decline: bool,
    }

    impl CommandRunner for Recorder {
        fn run_elevated(&self, executable: &Path, arguments: &str) -> Result<(), LaunchError> {
            self.launches
                .borrow_mut()
                .push((executable.to_path_buf(), arguments.to_string()));
            if self.decline {
                Err(LaunchError::Declined)
            } else {
                Ok(())
            }
        }
    }

    fn manager<'a>(
        registry: Failing,
        runner: &'a Recorder,
        args: &[&str],
    ) -> LifecycleManager<Failing, &'a Recorder> {
        LifecycleManager::new(
            ServiceIdentity::new("test-service", "Test standalone service", "...").unwrap(),
            registry,
            runner,
            PathBuf::from("/opt/test/test-service"),
            args.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn permission_failure_relaunches_once_with_marker() {
        let runner = Recorder::default();
        let m = manager(Failing(|| LifecycleError::PermissionDenied), &runner, &["--install"]);
        assert_eq!(
            m.install(Some("--install")).unwrap(),
            LifecycleOutcome::Relaunched
        );
        let launches = runner.launches.borrow();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, PathBuf::from("/opt/test/test-service"));
        assert_eq!(launches[0].1, "--install --child-process");
    }

    #[test]
    fn child_process_never_relaunches() {
        let runner = Recorder::default();
        let m = manager(
            Failing(|| LifecycleError::PermissionDenied),
            &runner,
            &["--uninstall", "--child-process"],
        );
        for arg in [None, Some("--uninstall"), Some("--install"), Some("")] {
            assert!(matches!(m.install(arg), Err(LifecycleError::PermissionDenied)));
            assert!(matches!(m.uninstall(arg), Err(LifecycleError::PermissionDenied)));
        }
        assert!(runner.launches.borrow().is_empty());
    }

    #[test]
    fn no_argument_means_no_relaunch() {
        let runner = Recorder::default();
        let m = manager(Failing(|| LifecycleError::Os(5)), &runner, &[]);
        assert!(matches!(m.uninstall(None), Err(LifecycleError::Os(5))));
        assert!(runner.launches.borrow().is_empty());
    }

    #[test]
    fn unrelated_failures_are_not_retried() {
        let runner = Recorder::default();
        let m = manager(Failing(|| LifecycleError::AlreadyInstalled), &runner, &[]);
        assert!(matches!(
            m.install(Some("--install")),
            Err(LifecycleError::AlreadyInstalled)
        ));
        let m = manager(Failing(|| LifecycleError::NotInstalled), &runner, &[]);
        assert!(matches!(
            m.uninstall(Some("--uninstall")),
            Err(LifecycleError::NotInstalled)
        ));
        assert!(runner.launches.borrow().is_empty());
    }

    #[test]
    fn declined_relaunch_reports_both_errors() {
        let runner = Recorder {
            decline: true,
            ..Default::default()
        };
        let m = manager(Failing(|| LifecycleError::PermissionDenied), &runner, &[]);
        match m.uninstall(Some("--uninstall")) {
            Err(LifecycleError::Relaunch { primary, launch }) => {
                assert!(matches!(*primary, LifecycleError::PermissionDenied));
                assert!(matches!(launch, LaunchError::Declined));
            }
            other => panic!("Expected a relaunch failure, got {:?}", other),
        }
        assert_eq!(runner.launches.borrow().len(), 1);
    }

    #[test]
    fn start_and_stop_launch_the_control_command() {
        let runner = Recorder::default();
        let m = manager(
            Failing(|| LifecycleError::PermissionDenied),
            &runner,
            &["--child-process"],
        );
        assert_eq!(m.start().unwrap(), LifecycleOutcome::Completed);
        assert_eq!(m.stop().unwrap(), LifecycleOutcome::Completed);
        let launches = runner.launches.borrow();
        assert_eq!(launches[0], (PathBuf::from("ctl"), "Start test-service".to_string()));
        assert_eq!(launches[1], (PathBuf::from("ctl"), "Stop test-service".to_string()));
    }

    #[test]
    fn failed_control_launch_is_returned() {
        let runner = Recorder {
            decline: true,
            ..Default::default()
        };
        let m = manager(Failing(|| LifecycleError::PermissionDenied), &runner, &[]);
        assert!(matches!(
            m.start(),
            Err(LifecycleError::Launch(LaunchError::Declined))
        ));
    }
}
