//! Linux specific code: systemd units, pkexec elevation and signal driven hosting

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use crate::config::{InstallOptions, ServiceAccount, StartMode};
use crate::dispatch::ServiceHost;
use crate::error::{HostError, LaunchError, LifecycleError, LogInitError};
use crate::identity::ServiceIdentity;
use crate::lifecycle::{ControlAction, ServiceRegistry};
use crate::runner::CommandRunner;
use crate::session::SessionDetector;
use crate::supervisor::WorkerSupervisor;
use crate::LogLevel;

/// Initialize a new log instance
pub fn init_log(_identity: &ServiceIdentity, level: LogLevel) -> Result<(), LogInitError> {
    simple_logger::SimpleLogger::new()
        .with_level(level.level_filter())
        .init()
        .map_err(|e| LogInitError(e.to_string()))
}

fn map_io(e: std::io::Error) -> LifecycleError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        LifecycleError::PermissionDenied
    } else {
        LifecycleError::Io(e)
    }
}

/// Registers services as systemd unit files
pub struct SystemdRegistry {
    /// Where unit files live
    unit_dir: PathBuf,
    /// The program told about changes to the unit files, none to leave systemd alone
    systemctl: Option<PathBuf>,
}

impl Default for SystemdRegistry {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
            systemctl: Some(PathBuf::from("systemctl")),
        }
    }
}

impl SystemdRegistry {
    /// Keep unit files in `unit_dir` without involving systemctl
    pub fn with_unit_dir(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            systemctl: None,
        }
    }

    /// Run `program` instead of systemctl after changing a unit file
    pub fn with_systemctl(self, program: impl Into<PathBuf>) -> Self {
        Self {
            systemctl: Some(program.into()),
            ..self
        }
    }

    /// The unit file for the service
    pub fn unit_path(&self, identity: &ServiceIdentity) -> PathBuf {
        self.unit_dir.join(format!("{}.service", identity.id()))
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), LifecycleError> {
        let program = match &self.systemctl {
            Some(program) => program,
            None => return Ok(()),
        };
        let o = std::process::Command::new(program)
            .args(args)
            .output()
            .map_err(LifecycleError::Io)?;
        if !o.status.success() {
            log::warn!(
                "systemctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&o.stderr).trim()
            );
            Err(LifecycleError::Os(o.status.code().unwrap_or(-1) as u32))
        } else {
            Ok(())
        }
    }

    /// Construct the systemd file with the specified config
    fn build_systemd_file(
        &self,
        identity: &ServiceIdentity,
        binary: &Path,
        options: &InstallOptions,
    ) -> String {
        let mut con = String::new();
        con.push_str("[Unit]\n");
        con.push_str(&format!("Description={}\n", identity.name()));
        if !identity.description().is_empty() {
            con.push_str(&format!("# {}\n", identity.description()));
        }
        con.push_str("\n[Service]\n");
        con.push_str("Type=simple\n");
        match &options.account {
            ServiceAccount::LocalSystem => {}
            ServiceAccount::LocalService | ServiceAccount::NetworkService => {
                con.push_str("DynamicUser=yes\n")
            }
            ServiceAccount::User { name, .. } => con.push_str(&format!("User={}\n", name)),
        }
        if let Some(dir) = &options.working_directory {
            con.push_str(&format!("WorkingDirectory={}\n", dir.display()));
        }
        let mut exec = vec![systemd_quote(&binary.to_string_lossy())];
        exec.extend(options.arguments.iter().map(|a| systemd_quote(a)));
        con.push_str(&format!("ExecStart={}\n", exec.join(" ")));
        con.push_str("\n[Install]\nWantedBy=multi-user.target\n");
        con
    }
}

/// Quote one word of an `ExecStart=` line. Specifiers and variables are escaped so the word
/// reaches the process unchanged.
fn systemd_quote(word: &str) -> String {
    let word = word.replace('%', "%%").replace('$', "$$");
    let plain = !word.is_empty()
        && !word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if plain {
        word
    } else {
        format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

impl ServiceRegistry for SystemdRegistry {
    fn install(
        &self,
        identity: &ServiceIdentity,
        binary: &Path,
        options: &InstallOptions,
    ) -> Result<(), LifecycleError> {
        use std::io::Write;
        let con = self.build_systemd_file(identity, binary, options);
        let pb = self.unit_path(identity);
        log::debug!("Saving service file as {}", pb.display());
        let mut fpw = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&pb)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => LifecycleError::AlreadyInstalled,
                _ => map_io(e),
            })?;
        let registered = fpw
            .write_all(con.as_bytes())
            .map_err(map_io)
            .and_then(|()| self.systemctl(&["daemon-reload"]))
            .and_then(|()| match options.start_mode {
                StartMode::Automatic => self.systemctl(&["enable", identity.id()]),
                StartMode::Manual => Ok(()),
                StartMode::Disabled => self.systemctl(&["mask", identity.id()]),
            });
        drop(fpw);
        if let Err(e) = registered {
            log::warn!("Install of {} failed, removing {}", identity.id(), pb.display());
            if let Err(re) = std::fs::remove_file(&pb) {
                log::error!("Could not remove {}: {}", pb.display(), re);
            } else if let Err(re) = self.systemctl(&["daemon-reload"]) {
                log::debug!("Reload after removing {} failed: {}", pb.display(), re);
            }
            return Err(e);
        }
        Ok(())
    }

    fn uninstall(&self, identity: &ServiceIdentity) -> Result<(), LifecycleError> {
        let pb = self.unit_path(identity);
        if !pb.exists() {
            return Err(LifecycleError::NotInstalled);
        }
        if let Err(e) = self.systemctl(&["stop", identity.id()]) {
            log::debug!("Stopping {} before removal failed: {}", identity.id(), e);
        }
        if let Err(e) = self.systemctl(&["disable", identity.id()]) {
            log::debug!("Disabling {} before removal failed: {}", identity.id(), e);
        }
        log::debug!("Deleting {}", pb.display());
        std::fs::remove_file(&pb).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LifecycleError::NotInstalled,
            _ => map_io(e),
        })?;
        if let Err(e) = self.systemctl(&["daemon-reload"]) {
            log::warn!("Removed {} but systemd was not reloaded: {}", pb.display(), e);
        }
        Ok(())
    }

    fn is_installed(&self, identity: &ServiceIdentity) -> Result<bool, LifecycleError> {
        Ok(self.unit_path(identity).exists())
    }

    fn control_command(
        &self,
        identity: &ServiceIdentity,
        action: ControlAction,
    ) -> (PathBuf, String) {
        let verb = match action {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
        };
        (
            PathBuf::from("systemctl"),
            format!("{} {}", verb, identity.id()),
        )
    }
}

/// Launches commands through pkexec, which asks the user for authorization
pub struct PkexecRunner;

impl CommandRunner for PkexecRunner {
    fn run_elevated(&self, executable: &Path, arguments: &str) -> Result<(), LaunchError> {
        std::process::Command::new("pkexec")
            .arg(executable)
            .args(arguments.split_whitespace())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_child| ())
            .map_err(LaunchError::Spawn)
    }
}

/// A process is interactive when its standard input is a terminal. systemd starts services
/// with stdin on /dev/null.
pub struct Terminal;

impl SessionDetector for Terminal {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }
}

/// systemd runs the binary directly, so hosting means starting the worker and waiting for
/// the termination signal.
pub struct SignalHost;

impl ServiceHost for SignalHost {
    fn run(
        &self,
        identity: &ServiceIdentity,
        supervisor: Arc<WorkerSupervisor>,
        args: Vec<String>,
    ) -> Result<(), HostError> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        let mut signals =
            signal_hook::iterator::Signals::new([SIGTERM, SIGINT]).map_err(HostError::Signal)?;
        supervisor.on_start(args);
        if let Some(signal) = signals.forever().next() {
            log::info!("{} received signal {}", identity.id(), signal);
        }
        let outcome = supervisor.on_stop();
        log::info!("{} stopped: {:?}", identity.id(), outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("test-service", "Test standalone service", "Writes timestamps")
            .unwrap()
    }

    #[test]
    fn install_then_uninstall_leaves_no_unit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SystemdRegistry::with_unit_dir(dir.path());
        let id = identity();
        assert!(!registry.is_installed(&id).unwrap());
        registry
            .install(&id, Path::new("/usr/bin/test-service"), &InstallOptions::default())
            .unwrap();
        assert!(registry.is_installed(&id).unwrap());
        registry.uninstall(&id).unwrap();
        assert!(!registry.is_installed(&id).unwrap());
        assert!(!dir.path().join("test-service.service").exists());
    }

    #[test]
    fn double_install_and_double_uninstall_are_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SystemdRegistry::with_unit_dir(dir.path());
        let id = identity();
        let opts = InstallOptions::default();
        registry.install(&id, Path::new("/bin/true"), &opts).unwrap();
        assert!(matches!(
            registry.install(&id, Path::new("/bin/true"), &opts),
            Err(LifecycleError::AlreadyInstalled)
        ));
        registry.uninstall(&id).unwrap();
        assert!(matches!(
            registry.uninstall(&id),
            Err(LifecycleError::NotInstalled)
        ));
    }

    #[test]
    fn unit_file_reflects_options() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SystemdRegistry::with_unit_dir(dir.path());
        let id = identity();
        let opts = InstallOptions {
            account: ServiceAccount::User {
                name: "svc".into(),
                password: None,
            },
            arguments: vec!["--verbose".into()],
            working_directory: Some(PathBuf::from("/var/lib/test")),
            ..Default::default()
        };
        registry
            .install(&id, Path::new("/usr/bin/test-service"), &opts)
            .unwrap();
        let unit = std::fs::read_to_string(registry.unit_path(&id)).unwrap();
        assert!(unit.contains("Description=Test standalone service\n"));
        assert!(unit.contains("User=svc\n"));
        assert!(unit.contains("WorkingDirectory=/var/lib/test\n"));
        assert!(unit.contains("ExecStart=/usr/bin/test-service --verbose\n"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn system_account_has_no_user_line() {
        let registry = SystemdRegistry::default();
        let unit = registry.build_systemd_file(
            &identity(),
            Path::new("/usr/bin/test-service"),
            &InstallOptions::default(),
        );
        assert!(!unit.contains("User="));
        assert!(unit.contains("ExecStart=/usr/bin/test-service\n"));
    }

    #[test]
    fn exec_start_quotes_paths_with_spaces() {
        let opts = InstallOptions {
            arguments: vec!["--name".into(), "two words".into(), "50%".into()],
            ..Default::default()
        };
        let unit = SystemdRegistry::default().build_systemd_file(
            &identity(),
            Path::new("/opt/My App/svc"),
            &opts,
        );
        assert!(unit.contains("ExecStart=\"/opt/My App/svc\" --name \"two words\" 50%%\n"));
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(systemd_quote("/usr/bin/svc"), "/usr/bin/svc");
        assert_eq!(systemd_quote(""), "\"\"");
        assert_eq!(systemd_quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(systemd_quote("C:\\dir"), "\"C:\\\\dir\"");
        assert_eq!(systemd_quote("$HOME"), "$$HOME");
    }

    #[test]
    fn failed_reload_removes_the_new_unit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SystemdRegistry::with_unit_dir(dir.path()).with_systemctl("false");
        let id = identity();
        assert!(matches!(
            registry.install(&id, Path::new("/bin/true"), &InstallOptions::default()),
            Err(LifecycleError::Os(_))
        ));
        assert!(!registry.is_installed(&id).unwrap());
        assert!(!dir.path().join("test-service.service").exists());
    }

    #[test]
    fn failed_reload_after_removal_still_uninstalls() {
        let dir = tempfile::tempdir().unwrap();
        let id = identity();
        SystemdRegistry::with_unit_dir(dir.path())
            .install(&id, Path::new("/bin/true"), &InstallOptions::default())
            .unwrap();
        let registry = SystemdRegistry::with_unit_dir(dir.path()).with_systemctl("false");
        registry.uninstall(&id).unwrap();
        assert!(!registry.is_installed(&id).unwrap());
    }

    #[test]
    fn missing_unit_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SystemdRegistry::with_unit_dir(dir.path().join("missing"));
        assert!(matches!(
            registry.install(&identity(), Path::new("/bin/true"), &InstallOptions::default()),
            Err(LifecycleError::Io(_))
        ));
    }

    #[test]
    fn control_commands_use_systemctl() {
        let registry = SystemdRegistry::default();
        assert_eq!(
            registry.control_command(&identity(), ControlAction::Start),
            (PathBuf::from("systemctl"), "start test-service".to_string())
        );
        assert_eq!(
            registry.control_command(&identity(), ControlAction::Stop),
            (PathBuf::from("systemctl"), "stop test-service".to_string())
        );
    }
}
