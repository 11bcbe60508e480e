//! The windows specific code for service handling

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use std::os::windows::ffi::OsStrExt;

use winapi::shared::minwindef::{DWORD, LPVOID};
use winapi::shared::winerror::{
    ERROR_ACCESS_DENIED, ERROR_CALL_NOT_IMPLEMENTED, ERROR_CANCELLED,
    ERROR_FAILED_SERVICE_CONTROLLER_CONNECT, ERROR_SERVICE_DOES_NOT_EXIST, ERROR_SERVICE_EXISTS,
    ERROR_SERVICE_MARKED_FOR_DELETE, ERROR_SERVICE_SPECIFIC_ERROR, NO_ERROR,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::winnt::{HANDLE, LPCWSTR, LPWSTR, PVOID};
use winapi::um::winsvc::CloseServiceHandle;
use winapi::um::winsvc::OpenSCManagerW;
use winapi::um::winsvc::OpenServiceW;
use winapi::um::winsvc::QueryServiceStatus;
use winapi::um::winsvc::SC_HANDLE;
use winapi::um::winsvc::SERVICE_STATUS;
use winapi::um::winsvc::SERVICE_STATUS_HANDLE;

use crate::config::{InstallOptions, ServiceAccount, StartMode};
use crate::dispatch::ServiceHost;
use crate::error::{HostError, LaunchError, LifecycleError, LogInitError};
use crate::identity::ServiceIdentity;
use crate::lifecycle::{ControlAction, ServiceRegistry};
use crate::runner::CommandRunner;
use crate::session::SessionDetector;
use crate::supervisor::{StopOutcome, WorkerSupervisor};
use crate::LogLevel;

/// Initialize a new log instance, writing to the service's event log source
pub fn init_log(identity: &ServiceIdentity, level: LogLevel) -> Result<(), LogInitError> {
    eventlog::init(&identity.log_source(), level.level())
        .map_err(|e| LogInitError(format!("{:?}", e)))
}

/// Converts a utf8 string or a path into a nul terminated utf-16 string for windows
pub fn get_utf16(value: impl AsRef<OsStr>) -> Vec<u16> {
    value
        .as_ref()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// A pointer to an optional utf-16 string, null when absent. The vector must outlive the pointer.
fn optional_ptr(value: &Option<Vec<u16>>) -> LPCWSTR {
    value.as_ref().map_or(std::ptr::null(), |v| v.as_ptr())
}

/// Convert the windows style arguments to a vec of string
/// # Safety
///
/// argv must be valid - typically straight from windows
pub unsafe fn convert_args(argc: DWORD, argv: *mut LPWSTR) -> Vec<String> {
    let mut args = Vec::new();
    for i in 0..argc {
        let s = *argv.add(i as usize);
        let widestr = widestring::WideCString::from_ptr_str(s);
        args.push(widestr.to_string_lossy());
    }
    args
}

fn error_from_code(code: DWORD) -> LifecycleError {
    match code {
        ERROR_ACCESS_DENIED => LifecycleError::PermissionDenied,
        ERROR_SERVICE_EXISTS => LifecycleError::AlreadyInstalled,
        ERROR_SERVICE_DOES_NOT_EXIST | ERROR_SERVICE_MARKED_FOR_DELETE => {
            LifecycleError::NotInstalled
        }
        code => LifecycleError::Os(code),
    }
}

fn last_error() -> LifecycleError {
    error_from_code(unsafe { GetLastError() })
}

/// Represents a service control handle
struct ServiceHandle {
    /// The actual handle
    handle: SC_HANDLE,
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { CloseServiceHandle(self.handle) };
        }
    }
}

/// Represents a service controller manager
struct ServiceController {
    /// The actual handle
    handle: SC_HANDLE,
}

impl ServiceController {
    /// Request access to the service controller manager using the specified access level.
    fn open(access: DWORD) -> Result<Self, LifecycleError> {
        let handle = unsafe { OpenSCManagerW(std::ptr::null(), std::ptr::null(), access) };
        if handle.is_null() {
            Err(last_error())
        } else {
            Ok(Self { handle })
        }
    }

    /// Request access to the specified service, with the specified access permissions.
    fn open_service(&self, name: &str, access: DWORD) -> Result<ServiceHandle, LifecycleError> {
        let handle = unsafe { OpenServiceW(self.handle, get_utf16(name).as_ptr(), access) };
        if handle.is_null() {
            Err(last_error())
        } else {
            Ok(ServiceHandle { handle })
        }
    }
}

impl Drop for ServiceController {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { CloseServiceHandle(self.handle) };
        }
    }
}

fn start_type(mode: StartMode) -> DWORD {
    match mode {
        StartMode::Automatic => winapi::um::winnt::SERVICE_AUTO_START,
        StartMode::Manual => winapi::um::winnt::SERVICE_DEMAND_START,
        StartMode::Disabled => winapi::um::winnt::SERVICE_DISABLED,
    }
}

/// The account name and password handed to the service manager. No name means LocalSystem.
fn account_credentials(account: &ServiceAccount) -> (Option<String>, Option<String>) {
    match account {
        ServiceAccount::LocalSystem => (None, None),
        ServiceAccount::LocalService => (Some("NT AUTHORITY\\LocalService".into()), None),
        ServiceAccount::NetworkService => (Some("NT AUTHORITY\\NetworkService".into()), None),
        ServiceAccount::User { name, password } => (Some(name.clone()), password.clone()),
    }
}

fn empty_status() -> SERVICE_STATUS {
    SERVICE_STATUS {
        dwServiceType: winapi::um::winnt::SERVICE_WIN32_OWN_PROCESS,
        dwCurrentState: winapi::um::winsvc::SERVICE_STOPPED,
        dwControlsAccepted: 0,
        dwWin32ExitCode: 0,
        dwServiceSpecificExitCode: 0,
        dwCheckPoint: 0,
        dwWaitHint: 0,
    }
}

/// Ask a running service to stop and wait a while for it to leave the stop pending state
fn stop_and_wait(service: &ServiceHandle) {
    let mut service_status = empty_status();
    if unsafe {
        winapi::um::winsvc::ControlService(
            service.handle,
            winapi::um::winsvc::SERVICE_CONTROL_STOP,
            &mut service_status,
        )
    } == 0
    {
        return;
    }
    for _ in 0..120 {
        if unsafe { QueryServiceStatus(service.handle, &mut service_status) } == 0
            || service_status.dwCurrentState != winapi::um::winsvc::SERVICE_STOP_PENDING
        {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(250));
    }
}

/// Registers services with the windows service control manager
#[derive(Default)]
pub struct ScmRegistry;

impl ServiceRegistry for ScmRegistry {
    fn install(
        &self,
        identity: &ServiceIdentity,
        binary: &Path,
        options: &InstallOptions,
    ) -> Result<(), LifecycleError> {
        let service_manager = ServiceController::open(
            winapi::um::winsvc::SC_MANAGER_CONNECT | winapi::um::winsvc::SC_MANAGER_CREATE_SERVICE,
        )?;
        let mut exe_with_args = format!("\"{}\"", binary.to_string_lossy());
        for arg in &options.arguments {
            exe_with_args.push(' ');
            exe_with_args.push_str(arg);
        }
        let (account, password) = account_credentials(&options.account);
        let account = account.map(get_utf16);
        let password = password.map(get_utf16);
        let name = get_utf16(identity.id());
        let display = get_utf16(identity.name());
        let binary_path = get_utf16(&exe_with_args);
        let handle = unsafe {
            winapi::um::winsvc::CreateServiceW(
                service_manager.handle,
                name.as_ptr(),
                display.as_ptr(),
                winapi::um::winsvc::SERVICE_ALL_ACCESS,
                winapi::um::winnt::SERVICE_WIN32_OWN_PROCESS,
                start_type(options.start_mode),
                winapi::um::winnt::SERVICE_ERROR_NORMAL,
                binary_path.as_ptr(),
                std::ptr::null(),
                std::ptr::null_mut(),
                std::ptr::null(),
                optional_ptr(&account),
                optional_ptr(&password),
            )
        };
        if handle.is_null() {
            return Err(last_error());
        }
        let service = ServiceHandle { handle };

        let mut description = get_utf16(identity.description());
        let mut sd = winapi::um::winsvc::SERVICE_DESCRIPTIONW {
            lpDescription: description.as_mut_ptr(),
        };
        let p_sd = &mut sd as *mut _ as LPVOID;
        if unsafe {
            winapi::um::winsvc::ChangeServiceConfig2W(
                service.handle,
                winapi::um::winsvc::SERVICE_CONFIG_DESCRIPTION,
                p_sd,
            )
        } == 0
        {
            log::warn!(
                "Unable to set the description of {}: {}",
                identity.id(),
                unsafe { GetLastError() }
            );
        }

        if let Err(e) = eventlog::register(&identity.log_source()) {
            log::warn!(
                "Unable to register event log source for {}: {:?}",
                identity.id(),
                e
            );
        }
        Ok(())
    }

    fn uninstall(&self, identity: &ServiceIdentity) -> Result<(), LifecycleError> {
        let service_manager = ServiceController::open(winapi::um::winsvc::SC_MANAGER_CONNECT)?;
        let service = service_manager.open_service(
            identity.id(),
            winapi::um::winsvc::SERVICE_STOP
                | winapi::um::winsvc::SERVICE_QUERY_STATUS
                | winapi::um::winnt::DELETE,
        )?;
        stop_and_wait(&service);
        if unsafe { winapi::um::winsvc::DeleteService(service.handle) } == 0 {
            return Err(last_error());
        }
        if let Err(e) = eventlog::deregister(&identity.log_source()) {
            log::warn!(
                "Unable to remove event log source for {}: {:?}",
                identity.id(),
                e
            );
        }
        Ok(())
    }

    fn is_installed(&self, identity: &ServiceIdentity) -> Result<bool, LifecycleError> {
        let service_manager = ServiceController::open(winapi::um::winsvc::SC_MANAGER_CONNECT)?;
        match service_manager.open_service(identity.id(), winapi::um::winsvc::SERVICE_QUERY_STATUS)
        {
            Ok(_) => Ok(true),
            Err(LifecycleError::NotInstalled) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn control_command(
        &self,
        identity: &ServiceIdentity,
        action: ControlAction,
    ) -> (PathBuf, String) {
        let verb = match action {
            ControlAction::Start => "START",
            ControlAction::Stop => "STOP",
        };
        (
            PathBuf::from("cmd.exe"),
            format!("/c NET {} \"{}\"", verb, identity.id()),
        )
    }
}

/// Launches commands through the shell with the runas verb, which raises a UAC prompt
pub struct RunasRunner;

impl CommandRunner for RunasRunner {
    fn run_elevated(&self, executable: &Path, arguments: &str) -> Result<(), LaunchError> {
        let verb = get_utf16("runas");
        let file = get_utf16(executable);
        let parameters = get_utf16(arguments);
        let mut info: winapi::um::shellapi::SHELLEXECUTEINFOW = unsafe { std::mem::zeroed() };
        info.cbSize = std::mem::size_of::<winapi::um::shellapi::SHELLEXECUTEINFOW>() as DWORD;
        info.fMask = winapi::um::shellapi::SEE_MASK_NOASYNC;
        info.lpVerb = verb.as_ptr();
        info.lpFile = file.as_ptr();
        info.lpParameters = parameters.as_ptr();
        info.nShow = winapi::um::winuser::SW_HIDE;
        if unsafe { winapi::um::shellapi::ShellExecuteExW(&mut info) } == 0 {
            match unsafe { GetLastError() } {
                ERROR_CANCELLED => Err(LaunchError::Declined),
                code => Err(LaunchError::Os(code)),
            }
        } else {
            Ok(())
        }
    }
}

/// A process is interactive when its window station is visible. Services run on an
/// invisible window station.
pub struct WindowStation;

impl SessionDetector for WindowStation {
    fn is_interactive(&self) -> bool {
        let station = unsafe { winapi::um::winuser::GetProcessWindowStation() };
        if station.is_null() {
            return true;
        }
        let mut flags: winapi::um::winuser::USEROBJECTFLAGS = unsafe { std::mem::zeroed() };
        let mut needed: DWORD = 0;
        let ok = unsafe {
            winapi::um::winuser::GetUserObjectInformationW(
                station as HANDLE,
                winapi::um::winuser::UOI_FLAGS as _,
                &mut flags as *mut _ as PVOID,
                std::mem::size_of::<winapi::um::winuser::USEROBJECTFLAGS>() as DWORD,
                &mut needed,
            )
        };
        if ok == 0 {
            return true;
        }
        flags.dwFlags & (winapi::um::winuser::WSF_VISIBLE as DWORD) != 0
    }
}

/// What the service main entry point runs
#[derive(Clone)]
struct Hosted {
    name: String,
    supervisor: Arc<WorkerSupervisor>,
}

lazy_static::lazy_static! {
    /// The service handed to the dispatcher, the service main entry point has no context argument
    static ref HOSTED: Mutex<Option<Hosted>> = Mutex::new(None);
}

/// Report the status of the service to windows
/// # Safety
///
/// status_handle must be valid
/// Service specific exit code for a worker that panicked
const EXIT_WORKER_PANICKED: DWORD = 1;
/// Service specific exit code for a worker that could not be started
const EXIT_START_FAILED: DWORD = 2;

/// The exit code reported along with `SERVICE_STOPPED`. `None` means the worker never started.
fn stopped_exit_code(outcome: Option<StopOutcome>) -> DWORD {
    match outcome {
        None => EXIT_START_FAILED,
        Some(StopOutcome::Panicked) => EXIT_WORKER_PANICKED,
        Some(_) => 0,
    }
}

unsafe fn set_service_status(
    status_handle: SERVICE_STATUS_HANDLE,
    current_state: DWORD,
    wait_hint: DWORD,
    exit_code: DWORD,
) {
    let mut service_status = empty_status();
    service_status.dwCurrentState = current_state;
    service_status.dwWaitHint = wait_hint;
    if current_state == winapi::um::winsvc::SERVICE_RUNNING {
        service_status.dwControlsAccepted =
            winapi::um::winsvc::SERVICE_ACCEPT_STOP | winapi::um::winsvc::SERVICE_ACCEPT_SHUTDOWN;
    }
    if exit_code != 0 {
        service_status.dwWin32ExitCode = ERROR_SERVICE_SPECIFIC_ERROR;
        service_status.dwServiceSpecificExitCode = exit_code;
    }
    if winapi::um::winsvc::SetServiceStatus(status_handle, &mut service_status) == 0 {
        log::error!(
            "Unable to report service state {}: {}",
            current_state,
            GetLastError()
        );
    }
}

/// Receives commands from windows to control the service being run
/// # Safety
///
/// context must be the `std::sync::mpsc::Sender<()>` handed to `RegisterServiceCtrlHandlerExW`
unsafe extern "system" fn control_handler(
    control: DWORD,
    _event_type: DWORD,
    _event_data: LPVOID,
    context: LPVOID,
) -> DWORD {
    let tx = &*(context as *const std::sync::mpsc::Sender<()>);
    log::debug!("The command for service handler is {}", control);
    match control {
        winapi::um::winsvc::SERVICE_CONTROL_STOP | winapi::um::winsvc::SERVICE_CONTROL_SHUTDOWN => {
            let _ = tx.send(());
            NO_ERROR
        }
        winapi::um::winsvc::SERVICE_CONTROL_INTERROGATE => NO_ERROR,
        _ => ERROR_CALL_NOT_IMPLEMENTED,
    }
}

/// Runs the hosted service: start the worker, wait for windows to ask for a stop, stop it
/// # Safety
///
/// Only called by the service control dispatcher
unsafe extern "system" fn service_main(argc: DWORD, argv: *mut LPWSTR) {
    let args = convert_args(argc, argv);
    let hosted = HOSTED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let hosted = match hosted {
        Some(hosted) => hosted,
        None => {
            log::error!("The service dispatcher started with nothing to run");
            return;
        }
    };

    let (tx, rx) = std::sync::mpsc::channel::<()>();
    // Left alive for the rest of the process, windows may call the handler until it exits
    let context = Box::into_raw(Box::new(tx));
    let handle = winapi::um::winsvc::RegisterServiceCtrlHandlerExW(
        get_utf16(&hosted.name).as_ptr(),
        Some(control_handler),
        context as LPVOID,
    );
    if handle.is_null() {
        log::error!(
            "Unable to register the control handler for {}: {}",
            hosted.name,
            GetLastError()
        );
        drop(Box::from_raw(context));
        return;
    }

    set_service_status(handle, winapi::um::winsvc::SERVICE_START_PENDING, 3000, 0);
    // the first argument is the service name
    if !hosted.supervisor.on_start(args.into_iter().skip(1).collect()) {
        log::error!("The service worker for {} did not start", hosted.name);
        let exit_code = stopped_exit_code(None);
        set_service_status(handle, winapi::um::winsvc::SERVICE_STOPPED, 0, exit_code);
        return;
    }
    set_service_status(handle, winapi::um::winsvc::SERVICE_RUNNING, 0, 0);

    let _ = rx.recv();
    let wait_hint = hosted.supervisor.stop_timeout().as_millis() as DWORD;
    set_service_status(handle, winapi::um::winsvc::SERVICE_STOP_PENDING, wait_hint, 0);
    let outcome = hosted.supervisor.on_stop();
    log::info!("{} stopped: {:?}", hosted.name, outcome);
    let exit_code = stopped_exit_code(Some(outcome));
    set_service_status(handle, winapi::um::winsvc::SERVICE_STOPPED, 0, exit_code);
}

/// Hands the process to the windows service control dispatcher
pub struct ScmHost;

impl ServiceHost for ScmHost {
    fn run(
        &self,
        identity: &ServiceIdentity,
        supervisor: Arc<WorkerSupervisor>,
        _args: Vec<String>,
    ) -> Result<(), HostError> {
        *HOSTED.lock().unwrap_or_else(PoisonError::into_inner) = Some(Hosted {
            name: identity.id().to_string(),
            supervisor,
        });
        let service_name = get_utf16(identity.id());
        let service_table: &[winapi::um::winsvc::SERVICE_TABLE_ENTRYW] = &[
            winapi::um::winsvc::SERVICE_TABLE_ENTRYW {
                lpServiceName: service_name.as_ptr() as _,
                lpServiceProc: Some(service_main),
            },
            // the last item has to be { null, null }
            winapi::um::winsvc::SERVICE_TABLE_ENTRYW {
                lpServiceName: std::ptr::null_mut(),
                lpServiceProc: None,
            },
        ];

        let result =
            unsafe { winapi::um::winsvc::StartServiceCtrlDispatcherW(service_table.as_ptr()) };
        HOSTED.lock().unwrap_or_else(PoisonError::into_inner).take();
        if result == 0 {
            match unsafe { GetLastError() } {
                ERROR_FAILED_SERVICE_CONTROLLER_CONNECT => Err(HostError::NotAService),
                code => Err(HostError::Dispatch(code)),
            }
        } else {
            Ok(())
        }
    }
}
