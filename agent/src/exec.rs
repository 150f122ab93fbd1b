//! Host command execution
//!
//! Every mutation of the host (package installs, service restarts, file
//! fixups) goes through the `Executor` seam so tests can fake the machine.

use std::collections::HashMap;
use std::path::Path;
use std::process::Output;

use appctl::errors::Error;
use async_trait::async_trait;
use tracing::{debug, error, info};

#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        envs: HashMap<String, String>,
    ) -> std::io::Result<Output>;
}

/// Runs commands on the real host.
pub struct SystemExecutor;

#[async_trait]
impl Executor for SystemExecutor {
    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        envs: HashMap<String, String>,
    ) -> std::io::Result<Output> {
        debug!("exec {program} {args:?}");
        tokio::process::Command::new(program)
            .args(&args)
            .envs(&envs)
            .output()
            .await
    }
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

async fn run_checked(
    executor: &dyn Executor,
    program: &str,
    arguments: Vec<String>,
    envs: HashMap<String, String>,
) -> Result<Output, String> {
    let output = executor
        .run(program, arguments, envs)
        .await
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(stderr_of(&output));
    }
    Ok(output)
}

fn noninteractive() -> HashMap<String, String> {
    HashMap::from([("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())])
}

pub async fn apt_update(executor: &dyn Executor) -> Result<(), Error> {
    run_checked(executor, "sudo", args(&["apt", "update"]), noninteractive())
        .await
        .map_err(|e| {
            error!("Apt update failed err={e}");
            Error::Package(format!("apt update failed: {e}"))
        })?;
    Ok(())
}

/// Version-pinned batch install. Keeps local config, assumes defaults and
/// allows downgrades so a deploy can roll a host backwards.
pub async fn apt_install(executor: &dyn Executor, targets: &[String]) -> Result<(), Error> {
    let mut arguments = args(&[
        "apt",
        "install",
        "-o",
        "Dpkg::Options::=--force-confold",
        "-o",
        "Dpkg::Options::=--force-confdef",
        "-y",
        "--allow-downgrades",
        "--allow-remove-essential",
        "--allow-change-held-packages",
        "--reinstall",
    ]);
    arguments.extend(targets.iter().cloned());
    run_checked(executor, "sudo", arguments, noninteractive())
        .await
        .map_err(|e| {
            error!("Apt install failed err={e}");
            Error::Package(format!("apt install failed: {e}"))
        })?;
    Ok(())
}

pub async fn systemd_reload(executor: &dyn Executor) -> Result<(), Error> {
    run_checked(
        executor,
        "sudo",
        args(&["/usr/bin/systemctl", "daemon-reload"]),
        HashMap::new(),
    )
    .await
    .map_err(|e| {
        error!("Systemctl daemon-reload failed err={e}");
        Error::ServiceControl(format!("systemd reload failed: {e}"))
    })?;
    Ok(())
}

pub async fn systemd_restart(executor: &dyn Executor, services: &[String]) -> Result<(), Error> {
    let mut arguments = args(&["/usr/bin/systemctl", "restart"]);
    arguments.extend(services.iter().cloned());
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| {
            error!("Systemctl restart failed err={e}");
            Error::ServiceControl(format!("systemd restart failed: {e}"))
        })?;
    Ok(())
}

pub async fn expand_config_tar_as_user(
    executor: &dyn Executor,
    user: &str,
    file_path: &Path,
    target_path: &Path,
) -> Result<(), Error> {
    info!(
        "expanding tar.gz filePath={} to dir targetPath={}",
        file_path.display(),
        target_path.display()
    );
    let arguments = args(&[
        "-u",
        user,
        "/usr/bin/tar",
        "-xzf",
        &file_path.to_string_lossy(),
        "-C",
        &target_path.to_string_lossy(),
    ]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("tar extract failed: {e}")))?;
    Ok(())
}

pub async fn fixup_directory_permissions(
    executor: &dyn Executor,
    user: &str,
    target_path: &Path,
) -> Result<(), Error> {
    let arguments = args(&[
        "-u",
        user,
        "/usr/bin/find",
        &target_path.to_string_lossy(),
        "-type",
        "d",
        "-exec",
        "chmod",
        "750",
        "{}",
        ";",
    ]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("chmod 750 on directories failed: {e}")))?;
    Ok(())
}

pub async fn fixup_file_permissions(
    executor: &dyn Executor,
    user: &str,
    target_path: &Path,
) -> Result<(), Error> {
    let arguments = args(&[
        "-u",
        user,
        "/usr/bin/find",
        &target_path.to_string_lossy(),
        "-type",
        "f",
        "-exec",
        "chmod",
        "640",
        "{}",
        ";",
    ]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("chmod 640 on files failed: {e}")))?;
    Ok(())
}

pub async fn fixup_control_permissions(
    executor: &dyn Executor,
    user: &str,
    target_path: &Path,
) -> Result<(), Error> {
    let control = target_path.join(".arryved/control");
    let arguments = args(&["-u", user, "/usr/bin/chmod", "750", &control.to_string_lossy()]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("chmod 750 on control script failed: {e}")))?;
    Ok(())
}

/// Legacy start scripts shipped as `*.sh` before the control convention.
pub async fn fixup_legacy_script_permissions(
    executor: &dyn Executor,
    user: &str,
    target_path: &Path,
) -> Result<(), Error> {
    let arguments = args(&[
        "-u",
        user,
        "/usr/bin/find",
        &target_path.to_string_lossy(),
        "-type",
        "f",
        "-name",
        "*.sh",
        "-exec",
        "chmod",
        "750",
        "{}",
        ";",
    ]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("chmod 750 on start scripts failed: {e}")))?;
    Ok(())
}

pub async fn fixup_ownership(
    executor: &dyn Executor,
    user: &str,
    group: &str,
    target_path: &Path,
) -> Result<(), Error> {
    let owner = format!("{user}.{group}");
    let arguments = args(&[
        "-u",
        user,
        "/usr/bin/find",
        &target_path.to_string_lossy(),
        "-exec",
        "chown",
        &owner,
        "{}",
        ";",
    ]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("chown {owner} failed: {e}")))?;
    Ok(())
}

pub async fn copy_file_as(
    executor: &dyn Executor,
    user: &str,
    src: &Path,
    dst: &Path,
) -> Result<(), Error> {
    let arguments = args(&[
        "-u",
        user,
        "cp",
        &src.to_string_lossy(),
        &dst.to_string_lossy(),
    ]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("copy file failed: {e}")))?;
    Ok(())
}

/// Recursive copy including dotfiles; src should end in `/.`.
pub async fn copy_dir_recurse(
    executor: &dyn Executor,
    user: &str,
    src: &Path,
    dst: &Path,
) -> Result<(), Error> {
    let src = format!("{}/.", src.to_string_lossy());
    let arguments = args(&["-u", user, "cp", "-R", &src, &dst.to_string_lossy()]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("copy dir failed: {e}")))?;
    Ok(())
}

pub async fn touch_file_as(
    executor: &dyn Executor,
    user: &str,
    path: &Path,
) -> Result<(), Error> {
    let arguments = args(&["-u", user, "touch", &path.to_string_lossy()]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("touch failed: {e}")))?;
    Ok(())
}

pub async fn remove_file_as(
    executor: &dyn Executor,
    user: &str,
    path: &Path,
) -> Result<(), Error> {
    let arguments = args(&["-u", user, "rm", "-f", &path.to_string_lossy()]);
    run_checked(executor, "sudo", arguments, HashMap::new())
        .await
        .map_err(|e| Error::FileSystem(format!("remove failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    /// Records invocations and replies from a script of canned outputs.
    pub struct FakeExecutor {
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
        pub stdout: Mutex<HashMap<String, String>>,
        pub fail_matching: Mutex<Option<String>>,
    }

    impl FakeExecutor {
        pub fn new() -> FakeExecutor {
            FakeExecutor {
                calls: Mutex::new(Vec::new()),
                stdout: Mutex::new(HashMap::new()),
                fail_matching: Mutex::new(None),
            }
        }

        pub fn with_stdout(self, needle: &str, out: &str) -> Self {
            self.stdout
                .lock()
                .unwrap()
                .insert(needle.to_string(), out.to_string());
            self
        }

        pub fn fail_when(self, needle: &str) -> Self {
            *self.fail_matching.lock().unwrap() = Some(needle.to_string());
            self
        }

        pub fn recorded(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn run(
            &self,
            program: &str,
            arguments: Vec<String>,
            _envs: HashMap<String, String>,
        ) -> std::io::Result<Output> {
            let line = format!("{program} {}", arguments.join(" "));
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), arguments));

            let fail = self
                .fail_matching
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|needle| line.contains(needle.as_str()));
            if fail {
                return Ok(Output {
                    status: ExitStatus::from_raw(256),
                    stdout: Vec::new(),
                    stderr: b"boom".to_vec(),
                });
            }

            let stdout = self
                .stdout
                .lock()
                .unwrap()
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default();
            Ok(Output {
                status: ExitStatus::from_raw(0),
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeExecutor;
    use super::*;

    #[tokio::test]
    async fn test_apt_install_pins_versions() {
        let executor = FakeExecutor::new();
        apt_install(&executor, &["arryved-api=1.2.3".to_string()])
            .await
            .unwrap();
        let calls = executor.recorded();
        assert_eq!(calls.len(), 1);
        let (program, arguments) = &calls[0];
        assert_eq!(program, "sudo");
        assert!(arguments.contains(&"--allow-downgrades".to_string()));
        assert!(arguments.contains(&"arryved-api=1.2.3".to_string()));
    }

    #[tokio::test]
    async fn test_failures_surface_stderr() {
        let executor = FakeExecutor::new().fail_when("apt update");
        let err = apt_update(&executor).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
