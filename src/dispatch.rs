//! Routing execution to the console or to the service host

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::error::HostError;
use crate::identity::ServiceIdentity;
use crate::session::{Mode, SessionDetector};
use crate::supervisor::WorkerSupervisor;

/// Hands the process to the operating system's service host, which drives the supervisor's
/// start and stop hooks. Blocks until the service has stopped.
pub trait ServiceHost {
    fn run(
        &self,
        identity: &ServiceIdentity,
        supervisor: Arc<WorkerSupervisor>,
        args: Vec<String>,
    ) -> Result<(), HostError>;
}

/// Picks the run path once, from the session the process was launched in
pub struct Dispatcher<P, H> {
    detector: P,
    host: H,
}

impl<P: SessionDetector, H: ServiceHost> Dispatcher<P, H> {
    /// Construct a new self
    pub fn new(detector: P, host: H) -> Self {
        Self { detector, host }
    }

    pub fn mode(&self) -> Mode {
        Mode::detect(&self.detector)
    }

    /// Run the service. Interactively the functionality runs on the calling thread until it
    /// returns, otherwise the service host takes over.
    pub fn run(
        &self,
        identity: &ServiceIdentity,
        supervisor: Arc<WorkerSupervisor>,
        args: Vec<String>,
    ) -> Result<Mode, HostError> {
        let mode = self.mode();
        match mode {
            Mode::Interactive => {
                log::info!("Running {} in the console", identity.id());
                supervisor.functionality().call(args, CancelToken::new());
            }
            Mode::NonInteractive => {
                log::info!("Running {} under the service host", identity.id());
                self.host.run(identity, supervisor, args)?;
            }
        }
        Ok(mode)
    }
}
