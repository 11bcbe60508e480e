//! A standalone service: one identity, one functionality, and the entry point tying them together

use std::sync::Arc;

use crate::args::Command;
use crate::cancel::CancelToken;
use crate::config::{InstallOptions, ServiceSettings};
use crate::dispatch::{Dispatcher, ServiceHost};
use crate::error::{HostError, LifecycleError, LogInitError, ServiceError};
use crate::identity::ServiceIdentity;
use crate::lifecycle::{LifecycleManager, ServiceRegistry};
use crate::runner::CommandRunner;
use crate::session::{Mode, SessionDetector};
use crate::supervisor::{Functionality, WorkerSupervisor};
use crate::{ConsoleSession, ElevatedRunner, NativeHost, NativeRegistry};

/// A service defined by its identity and the work it performs
pub struct StandaloneService {
    identity: ServiceIdentity,
    supervisor: Arc<WorkerSupervisor>,
    options: InstallOptions,
    settings: ServiceSettings,
}

impl StandaloneService {
    /// Build a service with default settings
    /// # Arguments
    /// * identity - How the service is known to the operating system
    /// * functionality - The long running work, called with the startup arguments and a
    ///   token that is cancelled when the service stops
    pub fn new<F>(identity: ServiceIdentity, functionality: F) -> Self
    where
        F: Fn(Vec<String>, CancelToken) + Send + Sync + 'static,
    {
        Self::with_functionality(identity, Functionality::new(functionality))
    }

    /// Build a service from an already wrapped functionality
    pub fn with_functionality(identity: ServiceIdentity, functionality: Functionality) -> Self {
        Self::build(
            identity,
            functionality,
            InstallOptions::default(),
            ServiceSettings::default(),
        )
    }

    fn build(
        identity: ServiceIdentity,
        functionality: Functionality,
        options: InstallOptions,
        settings: ServiceSettings,
    ) -> Self {
        let supervisor = Arc::new(WorkerSupervisor::new(
            identity.id(),
            functionality,
            settings.stop_timeout,
        ));
        Self {
            identity,
            supervisor,
            options,
            settings,
        }
    }

    /// Replace the options used when installing
    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the process settings
    pub fn with_settings(self, settings: ServiceSettings) -> Self {
        let functionality = self.supervisor.functionality().clone();
        Self::build(self.identity, functionality, self.options, settings)
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// The supervisor that runs the functionality under the service host
    pub fn supervisor(&self) -> Arc<WorkerSupervisor> {
        self.supervisor.clone()
    }

    /// Initialize a new log instance at the configured level
    pub fn init_log(&self) -> Result<(), LogInitError> {
        crate::init_log(&self.identity, self.settings.log_level)
    }

    /// The lifecycle manager for this service on the current platform
    pub fn lifecycle(
        &self,
        process_args: Vec<String>,
    ) -> Result<LifecycleManager<NativeRegistry, ElevatedRunner>, LifecycleError> {
        let executable = std::env::current_exe().map_err(LifecycleError::CurrentExe)?;
        Ok(LifecycleManager::new(
            self.identity.clone(),
            NativeRegistry::default(),
            ElevatedRunner,
            executable,
            process_args,
        )
        .with_options(self.options.clone()))
    }

    /// The dispatcher for this service on the current platform
    pub fn dispatcher(&self) -> Dispatcher<ConsoleSession, NativeHost> {
        Dispatcher::new(ConsoleSession, NativeHost)
    }

    /// Run the service functionality, in the console or under the service host
    pub fn run(&self, args: Vec<String>) -> Result<Mode, HostError> {
        self.dispatcher()
            .run(&self.identity, self.supervisor.clone(), args)
    }

    /// Carry out a command with the platform's components
    pub fn execute(&self, command: Command, args: Vec<String>) -> Result<(), ServiceError> {
        match command {
            Command::Run => {
                self.run(args)?;
                Ok(())
            }
            _ => match self.lifecycle(args.clone()) {
                Ok(lifecycle) => self.execute_with(&lifecycle, &self.dispatcher(), command, args),
                Err(e) => Ok(self.settings.failure_policy.apply(e)?),
            },
        }
    }

    /// Carry out a command with the given components. Lifecycle failures go through the
    /// configured failure policy.
    pub fn execute_with<R, C, P, H>(
        &self,
        lifecycle: &LifecycleManager<R, C>,
        dispatcher: &Dispatcher<P, H>,
        command: Command,
        args: Vec<String>,
    ) -> Result<(), ServiceError>
    where
        R: ServiceRegistry,
        C: CommandRunner,
        P: SessionDetector,
        H: ServiceHost,
    {
        let result = match command {
            Command::Install => lifecycle.install(command.flag()),
            Command::Uninstall => lifecycle.uninstall(command.flag()),
            Command::Start => lifecycle.start(),
            Command::Stop => lifecycle.stop(),
            Command::Run => {
                dispatcher.run(&self.identity, self.supervisor.clone(), args)?;
                return Ok(());
            }
        };
        match result {
            Ok(outcome) => {
                log::info!("{:?} of {}: {:?}", command, self.identity.id(), outcome);
                Ok(())
            }
            Err(e) => Ok(self.settings.failure_policy.apply(e)?),
        }
    }

    /// The usual entry point: read the process arguments and do what they ask
    pub fn main(&self) -> Result<(), ServiceError> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        log::debug!("Service {} called with {:?}", self.identity.id(), args);
        self.execute(Command::from_args(&args), args)
    }
}
