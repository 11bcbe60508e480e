//! Owns the background thread that runs the service functionality

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;

/// The type for the service function. Receives the startup arguments and a token that is
/// cancelled when the service is asked to stop.
pub type ServiceFn = dyn Fn(Vec<String>, CancelToken) + Send + Sync;

/// The long running work a service performs
#[derive(Clone)]
pub struct Functionality(Arc<ServiceFn>);

impl Functionality {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<String>, CancelToken) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[cfg(feature = "async")]
    /// Wrap an async service function. Each invocation gets its own tokio runtime on the
    /// thread that calls it.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<String>, CancelToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()>,
    {
        Self::new(move |args, token| {
            match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(f(args, token)),
                Err(e) => log::error!("Failed to build the service runtime: {}", e),
            }
        })
    }

    /// Run the functionality on the calling thread
    pub fn call(&self, args: Vec<String>, token: CancelToken) {
        (self.0)(args, token)
    }
}

impl std::fmt::Debug for Functionality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Functionality")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The result of asking the supervisor to stop
pub enum StopOutcome {
    /// There was no worker to stop
    NotRunning,
    /// The worker observed cancellation and exited
    Stopped,
    /// The worker did not exit in time and was detached
    TimedOut,
    /// The worker panicked
    Panicked,
}

/// A running worker
struct Worker {
    handle: JoinHandle<()>,
    token: CancelToken,
    /// Disconnects when the worker thread exits, however it exits
    done: Receiver<()>,
}

/// Runs the service functionality on a single background thread. There is one supervisor per
/// process and at most one worker alive at a time.
pub struct WorkerSupervisor {
    /// Used to name the worker thread
    name: String,
    functionality: Functionality,
    stop_timeout: Duration,
    worker: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    current: Option<Worker>,
    /// A worker that timed out on stop and is still running detached
    stray: Option<Receiver<()>>,
}

impl Slot {
    /// Is a detached worker still alive?
    fn stray_alive(&mut self) -> bool {
        match self.stray.as_ref().map(Receiver::try_recv) {
            Some(Err(TryRecvError::Empty)) => true,
            _ => {
                self.stray = None;
                false
            }
        }
    }
}

impl WorkerSupervisor {
    /// Construct a new self
    pub fn new(
        name: impl Into<String>,
        functionality: Functionality,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            functionality,
            stop_timeout,
            worker: Mutex::new(Slot::default()),
        }
    }

    /// The functionality this supervisor runs
    pub fn functionality(&self) -> &Functionality {
        &self.functionality
    }

    /// How long a stop waits for the worker
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    fn worker(&self) -> MutexGuard<'_, Slot> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Is a worker currently alive? A worker detached after a stop timeout is not counted.
    pub fn is_running(&self) -> bool {
        self.worker()
            .current
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start the worker. Returns false without doing anything if a worker is already running,
    /// including one that was detached by a stop that timed out.
    pub fn on_start(&self, args: Vec<String>) -> bool {
        let mut slot = self.worker();
        if slot.stray_alive() {
            log::warn!(
                "Detached service worker for {} is still running, not starting another",
                self.name
            );
            return false;
        }
        if let Some(previous) = slot.current.take() {
            if !previous.handle.is_finished() {
                log::debug!("Service worker for {} is already running", self.name);
                slot.current = Some(previous);
                return false;
            }
            if previous.handle.join().is_err() {
                log::error!("Previous service worker for {} had panicked", self.name);
            }
        }

        let token = CancelToken::new();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let functionality = self.functionality.clone();
        let worker_token = token.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || {
                let _done = done_tx;
                functionality.call(args, worker_token);
            });
        match spawned {
            Ok(handle) => {
                log::info!("Started service worker for {}", self.name);
                slot.current = Some(Worker {
                    handle,
                    token,
                    done: done_rx,
                });
                true
            }
            Err(e) => {
                log::error!("Failed to spawn service worker for {}: {}", self.name, e);
                false
            }
        }
    }

    /// Cancel the worker and wait, up to the stop timeout, for it to exit. A worker that does not
    /// exit in time is detached, and blocks `on_start` until it finally returns.
    pub fn on_stop(&self) -> StopOutcome {
        let worker = match self.worker().current.take() {
            Some(worker) => worker,
            None => {
                log::debug!("No service worker for {} to stop", self.name);
                return StopOutcome::NotRunning;
            }
        };
        worker.token.cancel();
        match worker.done.recv_timeout(self.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Service worker for {} did not stop within {:?}, detaching it",
                    self.name,
                    self.stop_timeout
                );
                self.worker().stray = Some(worker.done);
                StopOutcome::TimedOut
            }
            _ => match worker.handle.join() {
                Ok(()) => {
                    log::info!("Stopped service worker for {}", self.name);
                    StopOutcome::Stopped
                }
                Err(_) => {
                    log::error!("Service worker for {} panicked", self.name);
                    StopOutcome::Panicked
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(starts: Arc<AtomicUsize>) -> Functionality {
        Functionality::new(move |_args, token| {
            starts.fetch_add(1, Ordering::SeqCst);
            while token.sleep(Duration::from_millis(10)) {}
        })
    }

    fn wait_for(count: &AtomicUsize, expected: usize) {
        for _ in 0..500 {
            if count.load(Ordering::SeqCst) >= expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("worker never reached {} starts", expected);
    }

    #[test]
    fn duplicate_start_is_ignored() {
        let starts = Arc::new(AtomicUsize::new(0));
        let sup = WorkerSupervisor::new("dup", counting(starts.clone()), Duration::from_secs(5));
        assert!(sup.on_start(vec![]));
        assert!(!sup.on_start(vec![]));
        wait_for(&starts, 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(sup.on_stop(), StopOutcome::Stopped);
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let sup = WorkerSupervisor::new(
            "idle",
            counting(Arc::new(AtomicUsize::new(0))),
            Duration::from_secs(1),
        );
        assert_eq!(sup.on_stop(), StopOutcome::NotRunning);
        assert_eq!(sup.on_stop(), StopOutcome::NotRunning);
        assert!(!sup.is_running());
    }

    #[test]
    fn restart_creates_a_fresh_worker() {
        let starts = Arc::new(AtomicUsize::new(0));
        let sup = WorkerSupervisor::new("again", counting(starts.clone()), Duration::from_secs(5));
        assert!(sup.on_start(vec![]));
        wait_for(&starts, 1);
        assert!(sup.is_running());
        assert_eq!(sup.on_stop(), StopOutcome::Stopped);
        assert!(!sup.is_running());
        assert!(sup.on_start(vec![]));
        wait_for(&starts, 2);
        assert_eq!(sup.on_stop(), StopOutcome::Stopped);
    }

    #[test]
    fn args_reach_the_functionality() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sup = WorkerSupervisor::new(
            "args",
            Functionality::new(move |args, _token| {
                let _ = tx.lock().unwrap().send(args);
            }),
            Duration::from_secs(1),
        );
        assert!(sup.on_start(vec!["a".into(), "b".into()]));
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(sup.on_stop(), StopOutcome::Stopped);
    }

    #[test]
    fn uncooperative_worker_is_detached() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        let sup = WorkerSupervisor::new(
            "stubborn",
            Functionality::new(move |_args, _token| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
            }),
            Duration::from_millis(50),
        );
        assert!(sup.on_start(vec![]));
        assert_eq!(sup.on_stop(), StopOutcome::TimedOut);
        assert!(!sup.is_running());
        assert_eq!(sup.on_stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn detached_worker_blocks_a_second_worker_until_it_exits() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        let sup = WorkerSupervisor::new(
            "stubborn",
            Functionality::new(move |_args, _token| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
            }),
            Duration::from_millis(50),
        );
        assert!(sup.on_start(vec![]));
        assert_eq!(sup.on_stop(), StopOutcome::TimedOut);
        assert!(!sup.on_start(vec![]));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        let mut restarted = false;
        for _ in 0..500 {
            if sup.on_start(vec![]) {
                restarted = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(restarted);
        wait_for(&starts, 2);
    }

    #[cfg(feature = "async")]
    #[test]
    fn async_functionality_stops_on_cancel() {
        let sup = WorkerSupervisor::new(
            "async",
            Functionality::from_async(|_args, token| async move { token.cancelled().await }),
            Duration::from_secs(5),
        );
        assert!(sup.on_start(vec![]));
        std::thread::sleep(Duration::from_millis(50));
        assert!(sup.is_running());
        assert_eq!(sup.on_stop(), StopOutcome::Stopped);
    }

    #[test]
    fn finished_worker_can_be_replaced() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        let sup = WorkerSupervisor::new(
            "short",
            Functionality::new(move |_args, _token| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_secs(1),
        );
        assert!(sup.on_start(vec![]));
        wait_for(&starts, 1);
        for _ in 0..500 {
            if !sup.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(sup.on_start(vec![]));
        wait_for(&starts, 2);
    }

    #[test]
    fn panicking_worker_is_reported() {
        let sup = WorkerSupervisor::new(
            "panics",
            Functionality::new(|_args, _token| panic!("boom")),
            Duration::from_secs(5),
        );
        assert!(sup.on_start(vec![]));
        assert_eq!(sup.on_stop(), StopOutcome::Panicked);
    }
}
